use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use thiserror::Error;

/// Blob storage for rendered images and original backups, keyed by bucket and key.
///
/// Objects are base64 strings, the representation used by Twitter uploads and
/// the rendering service.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns `None` when the object does not exist.
    async fn download(&self, bucket: &str, key: &str) -> Result<Option<String>, ObjectStoreError>;
    async fn upload(&self, bucket: &str, key: &str, base64: &str) -> Result<(), ObjectStoreError>;
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object location {bucket}/{key}")]
    InvalidKey { bucket: String, key: String },
    #[error("object store io error: {0}")]
    Io(#[from] std::io::Error),
}

fn validate(bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
    let valid = |segment: &str| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && !segment.contains(['/', '\\'])
    };
    if valid(bucket) && valid(key) {
        Ok(())
    } else {
        Err(ObjectStoreError::InvalidKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Stores objects as files under `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, bucket: &str, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate(bucket, key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<Option<String>, ObjectStoreError> {
        let path = self.path(bucket, key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn upload(&self, bucket: &str, key: &str, base64: &str) -> Result<(), ObjectStoreError> {
        let path = self.path(bucket, key)?;
        tokio::fs::create_dir_all(self.root.join(bucket)).await?;
        // Write then rename so readers never observe a partial object.
        let staging = path.with_extension("partial");
        tokio::fs::write(&staging, base64).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}

/// In-process object store, used by tests and local runs without a disk root.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(bucket.to_string(), key.to_string()))
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<Option<String>, ObjectStoreError> {
        validate(bucket, key)?;
        Ok(self.get(bucket, key))
    }

    async fn upload(&self, bucket: &str, key: &str, base64: &str) -> Result<(), ObjectStoreError> {
        validate(bucket, key)?;
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((bucket.to_string(), key.to_string()), base64.to_string());
        Ok(())
    }
}
