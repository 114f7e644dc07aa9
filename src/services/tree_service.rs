//! src/services/tree_service.rs
//!
//! TreeService — per-owner folder/file hierarchy backed by SQLite rows and a
//! `BlobStore` for payloads. Every query is scoped by `owner_id`.
//!
//! Multi-step mutations (file delete, folder delete) run their steps in a
//! fixed order and stop at the first failure. Nothing is rolled back: a
//! failure after the blob removal leaves an inert row behind.

use crate::{
    db::is_unique_violation,
    models::{file::File, folder::Folder},
    services::blob_store::{BlobError, BlobReader, BlobStore},
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upload retries when the timestamp-derived key is already taken.
const MAX_KEY_ATTEMPTS: i64 = 16;
/// Leaves room for the timestamp prefix under the usual 255-byte file name
/// limit.
const MAX_FILENAME_BYTES: usize = 200;
/// Upper bound on bound parameters per bulk statement.
const BULK_CHUNK: usize = 500;

const FOLDER_COLUMNS: &str = "id, name, parent_id, owner_id, created_at";
const FILE_COLUMNS: &str = "id, name, folder_id, owner_id, src, created_at";

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Persistence(#[from] sqlx::Error),
    #[error(transparent)]
    Storage(#[from] BlobError),
}

pub type TreeResult<T> = Result<T, TreeError>;

/// One level of an owner's tree.
#[derive(Debug, Default, Serialize)]
pub struct Listing {
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
}

/// Result of storing a payload. No metadata row exists yet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    pub src: String,
    pub owner_id: String,
    pub folder_id: Option<String>,
}

/// What a folder delete removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FolderDeletion {
    pub folders: u64,
    pub files: u64,
}

#[derive(Clone)]
pub struct TreeService {
    /// Shared SQLite pool for folder and file rows.
    pub db: Arc<SqlitePool>,

    /// Payload storage.
    pub blobs: Arc<dyn BlobStore>,
}

impl TreeService {
    pub fn new(db: Arc<SqlitePool>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { db, blobs }
    }

    /// Folders and files directly under `folder_id`, or at the root when it
    /// is absent. A folder the owner does not own lists as empty.
    pub async fn list_items(&self, owner_id: &str, folder_id: Option<&str>) -> TreeResult<Listing> {
        if is_blank(owner_id) {
            return Err(TreeError::Validation("ownerId is required".into()));
        }
        let parent = optional_id("folderId", folder_id)?;

        if let Some(id) = parent {
            if self.fetch_folder(id, owner_id).await?.is_none() {
                debug!(%id, owner_id, "listing folder not owned by caller");
                return Ok(Listing::default());
            }
        }

        // `IS` matches NULL as well as equal values.
        let folders = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE owner_id = ? AND parent_id IS ?
             ORDER BY created_at, name"
        ))
        .bind(owner_id)
        .bind(parent)
        .fetch_all(&*self.db)
        .await?;

        let files = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ? AND folder_id IS ?
             ORDER BY created_at, name"
        ))
        .bind(owner_id)
        .bind(parent)
        .fetch_all(&*self.db)
        .await?;

        Ok(Listing { folders, files })
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        owner_id: &str,
    ) -> TreeResult<Folder> {
        if is_blank(name) || is_blank(owner_id) {
            return Err(TreeError::Validation(
                "name and ownerId are required".into(),
            ));
        }
        let parent = optional_id("parentId", parent_id)?;
        if let Some(id) = parent {
            if self.fetch_folder(id, owner_id).await?.is_none() {
                return Err(TreeError::Validation(format!(
                    "parent folder `{}` not found",
                    id
                )));
            }
        }

        let folder = sqlx::query_as::<_, Folder>(&format!(
            "INSERT INTO folders ({FOLDER_COLUMNS}) VALUES (?, ?, ?, ?, ?)
             RETURNING {FOLDER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(parent)
        .bind(owner_id)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        info!(folder_id = %folder.id, owner_id, "created folder");
        Ok(folder)
    }

    /// Persist metadata for a payload that an earlier upload stored at `src`.
    pub async fn save_file_meta(
        &self,
        name: &str,
        folder_id: Option<&str>,
        owner_id: &str,
        src: &str,
    ) -> TreeResult<File> {
        if is_blank(name) || is_blank(owner_id) || is_blank(src) {
            return Err(TreeError::Validation(
                "name, ownerId and src are required".into(),
            ));
        }
        let folder = optional_id("folderId", folder_id)?;
        if let Some(id) = folder {
            if self.fetch_folder(id, owner_id).await?.is_none() {
                return Err(TreeError::Validation(format!("folder `{}` not found", id)));
            }
        }
        let not_uploaded =
            || TreeError::Validation(format!("src `{}` does not reference an uploaded file", src));

        // Only the uploader may claim a pending key.
        let uploader: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM uploads WHERE src = ?")
                .bind(src)
                .fetch_optional(&*self.db)
                .await?;
        if uploader.as_deref() != Some(owner_id) {
            debug!(src, owner_id, "save rejected: no pending upload for owner");
            return Err(not_uploaded());
        }
        match self.blobs.exists(src).await {
            Ok(true) => {}
            Ok(false) | Err(BlobError::InvalidKey(_)) => return Err(not_uploaded()),
            Err(err) => return Err(err.into()),
        }

        let file = sqlx::query_as::<_, File>(&format!(
            "INSERT INTO files ({FILE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(folder)
        .bind(owner_id)
        .bind(src)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                TreeError::Validation(format!("src `{}` is already saved", src))
            } else {
                TreeError::Persistence(err)
            }
        })?;

        // `files.src` is unique; a leftover pending row cannot be claimed twice.
        if let Err(err) = sqlx::query("DELETE FROM uploads WHERE src = ?")
            .bind(src)
            .execute(&*self.db)
            .await
        {
            warn!(src, error = %err, "file saved but pending upload row not cleared");
        }

        info!(file_id = %file.id, owner_id, src, "saved file metadata");
        Ok(file)
    }

    /// Store a payload under `{millis}-{filename}`. The metadata row is a
    /// separate `save_file_meta` call.
    pub async fn upload_file(
        &self,
        filename: &str,
        data: Bytes,
        owner_id: &str,
        folder_id: Option<&str>,
    ) -> TreeResult<UploadedFile> {
        if is_blank(owner_id) {
            return Err(TreeError::Validation("ownerId is required".into()));
        }
        let name = sanitize_filename(filename)?;

        let millis = Utc::now().timestamp_millis();
        let mut last_key = String::new();
        for attempt in 0..MAX_KEY_ATTEMPTS {
            let key = format!("{}-{}", millis + attempt, name);
            match self.blobs.put(&key, data.clone()).await {
                Ok(src) => {
                    self.record_upload(&src, owner_id).await?;
                    info!(src = %src, owner_id, bytes = data.len(), "uploaded file");
                    return Ok(UploadedFile {
                        name,
                        src,
                        owner_id: owner_id.to_string(),
                        folder_id: folder_id.filter(|id| !id.is_empty()).map(str::to_string),
                    });
                }
                Err(BlobError::AlreadyExists(_)) => {
                    debug!(key = %key, "upload key taken, bumping prefix");
                    last_key = key;
                }
                Err(BlobError::InvalidKey(key)) => {
                    return Err(TreeError::Validation(format!(
                        "file name gives an invalid storage key `{}`",
                        key
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(BlobError::AlreadyExists(last_key).into())
    }

    /// Remove the payload, then the row. A failed payload removal leaves the
    /// row untouched.
    pub async fn delete_file(&self, file_id: &str, owner_id: &str, src: &str) -> TreeResult<()> {
        if is_blank(file_id) || is_blank(owner_id) || is_blank(src) {
            return Err(TreeError::Validation(
                "fileId, ownerId and src are required".into(),
            ));
        }
        let id = parse_id("fileId", file_id)?;

        let file = self
            .fetch_file(id, owner_id)
            .await?
            .ok_or_else(|| TreeError::NotFound(format!("file `{}` not found", id)))?;
        if file.src != src {
            return Err(TreeError::Validation(
                "src does not match the stored file".into(),
            ));
        }

        if let Err(err) = self.blobs.remove(std::slice::from_ref(&file.src)).await {
            warn!(%id, src, error = %err, "blob removal failed; file row kept");
            return Err(err.into());
        }

        if let Err(err) = sqlx::query("DELETE FROM files WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&*self.db)
            .await
        {
            warn!(%id, src, error = %err, "blob removed but file row delete failed");
            return Err(err.into());
        }

        info!(file_id = %id, owner_id, "deleted file");
        Ok(())
    }

    pub async fn rename_folder(
        &self,
        folder_id: &str,
        new_name: &str,
        owner_id: &str,
    ) -> TreeResult<Folder> {
        if is_blank(folder_id) || is_blank(new_name) || is_blank(owner_id) {
            return Err(TreeError::Validation(
                "folderId, newName and ownerId are required".into(),
            ));
        }
        let id = parse_id("folderId", folder_id)?;

        let folder = sqlx::query_as::<_, Folder>(&format!(
            "UPDATE folders SET name = ? WHERE id = ? AND owner_id = ?
             RETURNING {FOLDER_COLUMNS}"
        ))
        .bind(new_name)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| TreeError::NotFound(format!("folder `{}` not found", id)))?;

        info!(folder_id = %id, owner_id, "renamed folder");
        Ok(folder)
    }

    /// Delete a folder.
    ///
    /// Shallow mode removes the folder's own files (payloads, then rows), the
    /// rows of its direct subfolders, then the folder. Deeper descendants are
    /// left behind with a dangling `parent_id`, and their payloads stay in
    /// storage.
    ///
    /// Recursive mode first collects the whole subtree and only then removes
    /// every payload, every file row and every folder row.
    pub async fn delete_folder(
        &self,
        folder_id: &str,
        owner_id: &str,
        recursive: bool,
    ) -> TreeResult<FolderDeletion> {
        if is_blank(folder_id) || is_blank(owner_id) {
            return Err(TreeError::Validation(
                "folderId and ownerId are required".into(),
            ));
        }
        let id = parse_id("folderId", folder_id)?;
        if self.fetch_folder(id, owner_id).await?.is_none() {
            return Err(TreeError::NotFound(format!("folder `{}` not found", id)));
        }

        let deleted = if recursive {
            self.delete_subtree(id, owner_id).await?
        } else {
            self.delete_shallow(id, owner_id).await?
        };

        info!(
            folder_id = %id,
            owner_id,
            recursive,
            folders = deleted.folders,
            files = deleted.files,
            "deleted folder"
        );
        Ok(deleted)
    }

    /// Open a stored payload for download. Only payloads referenced by one
    /// of the owner's file rows are served.
    pub async fn open_blob(&self, owner_id: &str, src: &str) -> TreeResult<(u64, BlobReader)> {
        if is_blank(owner_id) || is_blank(src) {
            return Err(TreeError::Validation("ownerId and src are required".into()));
        }
        let owned: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM files WHERE src = ? AND owner_id = ? LIMIT 1")
                .bind(src)
                .bind(owner_id)
                .fetch_optional(&*self.db)
                .await?;
        if owned.is_none() {
            return Err(TreeError::NotFound(format!("file `{}` not found", src)));
        }

        self.blobs.open(src).await.map_err(|err| match err {
            BlobError::NotFound(key) => TreeError::NotFound(format!("file `{}` not found", key)),
            BlobError::InvalidKey(key) => {
                TreeError::Validation(format!("invalid storage key `{}`", key))
            }
            other => TreeError::Storage(other),
        })
    }

    /// Record who stored `src`. On failure the payload is removed again.
    async fn record_upload(&self, src: &str, owner_id: &str) -> TreeResult<()> {
        let recorded =
            sqlx::query("INSERT INTO uploads (src, owner_id, created_at) VALUES (?, ?, ?)")
                .bind(src)
                .bind(owner_id)
                .bind(Utc::now())
                .execute(&*self.db)
                .await;
        if let Err(err) = recorded {
            warn!(src, error = %err, "upload record failed; removing payload");
            if let Err(cleanup) = self.blobs.remove(&[src.to_string()]).await {
                warn!(src, error = %cleanup, "payload cleanup failed");
            }
            return Err(err.into());
        }
        Ok(())
    }

    async fn delete_shallow(&self, id: Uuid, owner_id: &str) -> TreeResult<FolderDeletion> {
        // 1. files directly inside the folder
        let files = self.files_in(id, owner_id).await?;
        let files_removed = self.remove_files(&files, owner_id).await?;

        // 2. direct subfolders only
        let children = sqlx::query("DELETE FROM folders WHERE parent_id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&*self.db)
            .await?
            .rows_affected();

        // 3. the folder itself
        let own = sqlx::query("DELETE FROM folders WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&*self.db)
            .await?
            .rows_affected();

        Ok(FolderDeletion {
            folders: children + own,
            files: files_removed,
        })
    }

    async fn delete_subtree(&self, root: Uuid, owner_id: &str) -> TreeResult<FolderDeletion> {
        let mut folder_ids = vec![root];
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut files = Vec::new();

        while let Some(current) = queue.pop_front() {
            files.extend(self.files_in(current, owner_id).await?);

            let children: Vec<Uuid> = sqlx::query_scalar(
                "SELECT id FROM folders WHERE parent_id = ? AND owner_id = ?",
            )
            .bind(current)
            .bind(owner_id)
            .fetch_all(&*self.db)
            .await?;

            for child in children {
                if seen.insert(child) {
                    folder_ids.push(child);
                    queue.push_back(child);
                }
            }
        }
        debug!(
            %root,
            folders = folder_ids.len(),
            files = files.len(),
            "collected subtree"
        );

        let files_removed = self.remove_files(&files, owner_id).await?;
        let folders_removed = self.delete_by_ids("folders", &folder_ids, owner_id).await?;

        Ok(FolderDeletion {
            folders: folders_removed,
            files: files_removed,
        })
    }

    /// Bulk-remove the payloads, then bulk-delete the rows.
    async fn remove_files(&self, files: &[File], owner_id: &str) -> TreeResult<u64> {
        if files.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = files.iter().map(|f| f.src.clone()).collect();
        self.blobs.remove(&keys).await?;

        let ids: Vec<Uuid> = files.iter().map(|f| f.id).collect();
        self.delete_by_ids("files", &ids, owner_id).await
    }

    async fn delete_by_ids(&self, table: &str, ids: &[Uuid], owner_id: &str) -> TreeResult<u64> {
        let mut removed = 0;
        for chunk in ids.chunks(BULK_CHUNK) {
            let mut builder =
                QueryBuilder::<Sqlite>::new(format!("DELETE FROM {table} WHERE owner_id = "));
            builder.push_bind(owner_id);
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            removed += builder.build().execute(&*self.db).await?.rows_affected();
        }
        Ok(removed)
    }

    async fn files_in(&self, folder_id: Uuid, owner_id: &str) -> TreeResult<Vec<File>> {
        Ok(sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE folder_id = ? AND owner_id = ?"
        ))
        .bind(folder_id)
        .bind(owner_id)
        .fetch_all(&*self.db)
        .await?)
    }

    async fn fetch_folder(&self, id: Uuid, owner_id: &str) -> TreeResult<Option<Folder>> {
        Ok(sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?)
    }

    async fn fetch_file(&self, id: Uuid, owner_id: &str) -> TreeResult<Option<File>> {
        Ok(sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?)
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn parse_id(field: &str, value: &str) -> TreeResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| TreeError::Validation(format!("{} `{}` is not a valid id", field, value)))
}

/// Absent and empty both mean "root".
fn optional_id(field: &str, value: Option<&str>) -> TreeResult<Option<Uuid>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_id(field, v).map(Some),
    }
}

/// Reduce a client filename to its last path component.
fn sanitize_filename(filename: &str) -> TreeResult<String> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(TreeError::Validation("a file name is required".into()));
    }
    if name.len() > MAX_FILENAME_BYTES {
        return Err(TreeError::Validation(format!(
            "file name is longer than {} bytes",
            MAX_FILENAME_BYTES
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(TreeError::Validation(format!(
            "file name `{}` contains control characters",
            name.escape_debug()
        )));
    }
    Ok(name.to_string())
}
