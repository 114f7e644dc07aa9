//! Identity provider: account sign-up/sign-in and bearer-token verification.
//!
//! The HTTP layer only sees the `IdentityProvider` trait. The bundled
//! `LocalIdentityProvider` keeps accounts in the `users` table, hashes
//! passwords with Argon2id and issues HS256 JWT access/refresh tokens.

use crate::{db::is_unique_violation, models::user::User};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0}")]
    Validation(String),
    #[error("User already registered")]
    EmailTaken,
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// The public face of an account.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
}

/// What a sign-up or sign-in hands back.
///
/// A provider may create an account without opening a session (pending
/// confirmation), and may in principle authenticate without returning the
/// user; callers handle both.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: Option<Identity>,
    pub session: Option<Session>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> IdentityResult<AuthOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<AuthOutcome>;

    /// Resolve an access token to the user id it was issued for.
    async fn verify_token(&self, token: &str) -> IdentityResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims carried by both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub typ: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Clone)]
pub struct LocalIdentityProvider {
    db: Arc<SqlitePool>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl LocalIdentityProvider {
    pub fn new(
        db: Arc<SqlitePool>,
        jwt_secret: &str,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        Self {
            db,
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    fn issue_token(&self, user: &User, typ: TokenType) -> IdentityResult<String> {
        let now = Utc::now();
        let ttl = match typ {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            typ,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    fn open_session(&self, user: &User) -> IdentityResult<AuthOutcome> {
        Ok(AuthOutcome {
            user: Some(Identity {
                id: user.id.to_string(),
                email: user.email.clone(),
            }),
            session: Some(Session {
                access_token: self.issue_token(user, TokenType::Access)?,
                refresh_token: self.issue_token(user, TokenType::Refresh)?,
            }),
        })
    }

    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&*self.db)
        .await?)
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> IdentityResult<AuthOutcome> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(IdentityError::Validation(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if self.find_by_email(&email).await?.is_some() {
            return Err(IdentityError::EmailTaken);
        }

        let user = User {
            id: Uuid::new_v4(),
            email,
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        };

        match sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(IdentityError::EmailTaken),
            Err(err) => return Err(IdentityError::Sqlx(err)),
        }

        info!(user_id = %user.id, "registered user");
        self.open_session(&user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<AuthOutcome> {
        let email = normalize_email(email)?;
        let user = self
            .find_by_email(&email)
            .await?
            .ok_or(IdentityError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash)? {
            debug!(user_id = %user.id, "password mismatch");
            return Err(IdentityError::InvalidCredentials);
        }

        self.open_session(&user)
    }

    async fn verify_token(&self, token: &str) -> IdentityResult<String> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!("JWT validation failed: {}", e);
            IdentityError::InvalidToken
        })?;
        if data.claims.typ != TokenType::Access {
            return Err(IdentityError::InvalidToken);
        }
        Ok(data.claims.sub)
    }
}

fn normalize_email(email: &str) -> IdentityResult<String> {
    let email = email.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(IdentityError::Validation(format!(
            "Unable to validate email address: invalid format `{}`",
            email
        ))),
    }
}

fn hash_password(password: &str) -> IdentityResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Hashing(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> IdentityResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| IdentityError::Hashing(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(IdentityError::Hashing(e.to_string())),
    }
}
