//! Blob store contract and implementations.
//!
//! Objects are addressed by `(bucket, key)`. `FsBlobStore` maps them to
//! `<root>/<bucket>/<key>` on the local filesystem; `MemoryBlobStore` keeps
//! them in a map for tests.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use lumen_core::error::LumenError;

/// Read access to the object store holding photos and their metadata.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, LumenError>;
}

/// Filesystem-backed blob store.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `(bucket, key)` to a path under the root.
    ///
    /// Rejects empty, absolute and parent-relative components so a job cannot
    /// read outside the store.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, LumenError> {
        let mut path = self.root.clone();
        for part in [bucket, key] {
            let relative = Path::new(part);
            let safe = !part.is_empty()
                && relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
            if !safe {
                return Err(LumenError::BlobStore(format!(
                    "Invalid object address: {}/{}",
                    bucket, key
                )));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, LumenError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            LumenError::BlobStore(format!("Failed to read {}/{}: {}", bucket, key, e))
        })
    }
}

/// In-memory blob store. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert((bucket.to_string(), key.to_string()), bytes.into());
        }
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        if let Ok(mut objects) = self.objects.write() {
            objects.remove(&(bucket.to_string(), key.to_string()));
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, LumenError> {
        let objects = self
            .objects
            .read()
            .map_err(|e| LumenError::BlobStore(format!("Lock poisoned: {}", e)))?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| LumenError::BlobStore(format!("No such object: {}/{}", bucket, key)))
    }
}
