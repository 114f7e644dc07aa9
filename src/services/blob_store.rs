//! Blob storage for uploaded file payloads.
//!
//! `BlobStore` is the narrow capability the tree needs: put bytes under a key,
//! remove a batch of keys, stream a key back out. `LocalBlobStore` keeps
//! payloads on disk sharded beneath `root/{shard}/{shard}/{key}`.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const MAX_BLOB_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("blob `{0}` already exists")]
    AlreadyExists(String),
    #[error("invalid blob key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Readable payload handed back by [`BlobStore::open`].
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`. Fails with `AlreadyExists` instead of
    /// overwriting. Returns the key the payload is reachable under.
    async fn put(&self, key: &str, data: Bytes) -> BlobResult<String>;

    /// Remove every key in one call. Keys that are already gone are skipped;
    /// the first other failure aborts the batch.
    async fn remove(&self, keys: &[String]) -> BlobResult<()>;

    /// Open a payload for streaming, with its size in bytes.
    async fn open(&self, key: &str) -> BlobResult<(u64, BlobReader)>;

    /// Whether a payload is stored under `key`.
    async fn exists(&self, key: &str) -> BlobResult<bool>;

    /// Cheap readiness probe.
    async fn health_check(&self) -> BlobResult<()>;
}

/// Basic key validation to avoid trivial path traversal vectors.
pub fn ensure_key_safe(key: &str) -> BlobResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_BLOB_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|part| part == "." || part == "..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Payloads stored as plain files under a root directory.
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Two-level shard identifiers: the first two bytes of MD5(key) as hex.
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Remove empty directories from `start` upwards, stopping below the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    /// Writes to a temp file, fsyncs, then hard-links into place so an
    /// existing key is never replaced.
    async fn put(&self, key: &str, data: Bytes) -> BlobResult<String> {
        ensure_key_safe(key)?;
        let path = self.blob_path(key);
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let written: io::Result<()> = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        let linked = fs::hard_link(&tmp_path, &path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match linked {
            Ok(()) => {
                debug!(key, bytes = data.len(), "stored blob");
                Ok(key.to_string())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(BlobError::AlreadyExists(key.to_string()))
            }
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    async fn remove(&self, keys: &[String]) -> BlobResult<()> {
        for key in keys {
            ensure_key_safe(key)?;
            let path = self.blob_path(key);
            match fs::remove_file(&path).await {
                Ok(_) => debug!("removed blob {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("blob {} already missing", path.display());
                }
                Err(err) => return Err(BlobError::Io(err)),
            }
            if let Some(parent) = path.parent() {
                self.prune_empty_dirs(parent).await;
            }
        }
        Ok(())
    }

    async fn open(&self, key: &str) -> BlobResult<(u64, BlobReader)> {
        ensure_key_safe(key)?;
        let file = File::open(self.blob_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(key.to_string())
            } else {
                BlobError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((len, Box::pin(file)))
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        ensure_key_safe(key)?;
        Ok(fs::try_exists(self.blob_path(key)).await?)
    }

    /// Write/read/delete a scratch file under the root.
    async fn health_check(&self) -> BlobResult<()> {
        fs::create_dir_all(&self.root).await?;
        let tmp_path = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "file content mismatch",
            )));
        }
        Ok(())
    }
}

/// In-memory doubles shared by the test modules.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::{
        collections::HashMap,
        io::Cursor,
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
    };

    #[derive(Default)]
    pub struct MemoryBlobStore {
        blobs: Mutex<HashMap<String, Bytes>>,
        fail_removes: AtomicBool,
        remove_calls: Mutex<Vec<Vec<String>>>,
    }

    impl MemoryBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent `remove` fail without touching anything.
        pub fn fail_removes(&self, fail: bool) {
            self.fail_removes.store(fail, Ordering::SeqCst);
        }

        pub fn contains(&self, key: &str) -> bool {
            self.blobs.lock().unwrap().contains_key(key)
        }

        pub fn len(&self) -> usize {
            self.blobs.lock().unwrap().len()
        }

        pub fn remove_calls(&self) -> Vec<Vec<String>> {
            self.remove_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn put(&self, key: &str, data: Bytes) -> BlobResult<String> {
            ensure_key_safe(key)?;
            let mut blobs = self.blobs.lock().unwrap();
            if blobs.contains_key(key) {
                return Err(BlobError::AlreadyExists(key.to_string()));
            }
            blobs.insert(key.to_string(), data);
            Ok(key.to_string())
        }

        async fn remove(&self, keys: &[String]) -> BlobResult<()> {
            self.remove_calls.lock().unwrap().push(keys.to_vec());
            if self.fail_removes.load(Ordering::SeqCst) {
                return Err(BlobError::Io(io::Error::new(
                    ErrorKind::PermissionDenied,
                    "storage unavailable",
                )));
            }
            let mut blobs = self.blobs.lock().unwrap();
            for key in keys {
                blobs.remove(key);
            }
            Ok(())
        }

        async fn open(&self, key: &str) -> BlobResult<(u64, BlobReader)> {
            let blobs = self.blobs.lock().unwrap();
            let data = blobs
                .get(key)
                .cloned()
                .ok_or_else(|| BlobError::NotFound(key.to_string()))?;
            Ok((data.len() as u64, Box::pin(Cursor::new(data.to_vec()))))
        }

        async fn exists(&self, key: &str) -> BlobResult<bool> {
            ensure_key_safe(key)?;
            Ok(self.blobs.lock().unwrap().contains_key(key))
        }

        async fn health_check(&self) -> BlobResult<()> {
            Ok(())
        }
    }
}
