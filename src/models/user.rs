//! Local account record used by the built-in identity provider.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered account. Never serialized: the hash stays server side.
#[derive(Clone, FromRow, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
