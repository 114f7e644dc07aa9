//! SQLite pool bootstrap and schema migration.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};

const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_init", include_str!("../migrations/0001_init.sql")),
    ("0002_uploads", include_str!("../migrations/0002_uploads.sql")),
];

/// Open the pool for `database_url`, creating the database file and its
/// parent directory when they are missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to `{}`", database_url))
}

/// Apply the embedded schema files in order. Every statement is
/// `IF NOT EXISTS`, so this is safe to run on each startup.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        let statements = sql
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running migration {} ({} statements)...", name, statements.len());

        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt)
                .execute(db)
                .await
                .with_context(|| format!("executing {} statement `{}`", name, stmt))?;
        }
    }

    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Single-connection in-memory database with the schema applied.
///
/// Each SQLite memory connection is its own database, so the pool is capped
/// at one connection.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    run_migrations(&pool).await.expect("apply schema");
    pool
}
