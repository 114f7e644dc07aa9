use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub max_upload_bytes: usize,
    pub enforce_token_owner: bool,
}

// Hand-written so the JWT secret never reaches the logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("enforce_token_owner", &self.enforce_token_owner)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Folder and file tree API")]
pub struct Args {
    /// Host to bind to (overrides FILE_TREE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_TREE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded payloads are stored (overrides FILE_TREE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_TREE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Secret used to sign access and refresh tokens (overrides FILE_TREE_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,

    /// Access token lifetime in seconds (overrides FILE_TREE_ACCESS_TOKEN_TTL_SECS)
    #[arg(long)]
    pub access_token_ttl_secs: Option<i64>,

    /// Refresh token lifetime in seconds (overrides FILE_TREE_REFRESH_TOKEN_TTL_SECS)
    #[arg(long)]
    pub refresh_token_ttl_secs: Option<i64>,

    /// Largest accepted request body in bytes (overrides FILE_TREE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Require a bearer token on /files routes and run them as the token's user
    /// (overrides FILE_TREE_ENFORCE_TOKEN_OWNER)
    #[arg(long)]
    pub enforce_token_owner: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |key| env::var(key))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values read through `lookup`.
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|_| default.into());

        let jwt_secret = match args.jwt_secret {
            Some(secret) => secret,
            None => match lookup("FILE_TREE_JWT_SECRET") {
                Ok(secret) => secret,
                Err(env::VarError::NotPresent) => {
                    bail!("FILE_TREE_JWT_SECRET or --jwt-secret must be set")
                }
                Err(err) => return Err(err).context("reading FILE_TREE_JWT_SECRET"),
            },
        };
        if jwt_secret.trim().is_empty() {
            bail!("JWT secret must not be empty");
        }

        let enforce_token_owner = args.enforce_token_owner
            || parse_env::<bool, _>(&lookup, "FILE_TREE_ENFORCE_TOKEN_OWNER", false)?;

        // --- Merge ---
        Ok(Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("FILE_TREE_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => parse_env(&lookup, "FILE_TREE_PORT", 5000)?,
            },
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("FILE_TREE_STORAGE_DIR", "./data/uploads")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_or(
                    "FILE_TREE_DATABASE_URL",
                    "sqlite://./data/meta/file_tree.db",
                )
            }),
            jwt_secret,
            access_token_ttl_secs: match args.access_token_ttl_secs {
                Some(ttl) => ttl,
                None => parse_env(&lookup, "FILE_TREE_ACCESS_TOKEN_TTL_SECS", 3600)?,
            },
            refresh_token_ttl_secs: match args.refresh_token_ttl_secs {
                Some(ttl) => ttl,
                None => parse_env(&lookup, "FILE_TREE_REFRESH_TOKEN_TTL_SECS", 7 * 24 * 3600)?,
            },
            max_upload_bytes: match args.max_upload_bytes {
                Some(max) => max,
                None => parse_env(&lookup, "FILE_TREE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            },
            enforce_token_owner,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse `key`, falling back to `default` when it is unset.
fn parse_env<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
