//! Represents a file's metadata row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for an uploaded file.
///
/// The row does not hold the payload; `src` is the blob-store key written by
/// the upload step. Deleting the row must go together with removing the blob.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct File {
    pub id: Uuid,

    /// Original filename as supplied by the client.
    pub name: String,

    /// Containing folder, or `None` for the owner's root.
    pub folder_id: Option<Uuid>,

    pub owner_id: String,

    /// Blob-store key of the payload.
    pub src: String,

    pub created_at: DateTime<Utc>,
}
