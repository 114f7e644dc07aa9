//! Represents a folder — a node of an owner's tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A folder owned by a single user.
///
/// Folders nest through `parent_id`; a folder with no parent sits at the
/// owner's root. The parent is expected to belong to the same owner.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Folder {
    /// Unique identifier for this folder.
    pub id: Uuid,

    /// Display name. Not unique, not even among siblings.
    pub name: String,

    /// Parent folder, or `None` for a root folder.
    pub parent_id: Option<Uuid>,

    /// Opaque identity-provider user id that scopes every query.
    pub owner_id: String,

    /// When this folder was created.
    pub created_at: DateTime<Utc>,
}
