//! SQLite-backed [`VectorIndex`].
//!
//! Metadata predicates are evaluated by SQLite; cosine ranking happens here
//! over the filtered rows.

use std::sync::Arc;

use lumen_core::error::LumenError;
use lumen_core::types::{PhotoMetadata, PhotoRecord, SearchFilter};
use lumen_storage::{Database, PhotoRepository};

use crate::index::{rank, IndexHit, VectorIndex};

/// Persistent vector index over the `photo_vectors` table.
pub struct SqliteIndex {
    repo: PhotoRepository,
}

impl SqliteIndex {
    pub fn new(db: Arc<Database>, collection: impl Into<String>) -> Self {
        Self {
            repo: PhotoRepository::new(db, collection),
        }
    }
}

fn index_error(err: LumenError) -> LumenError {
    match err {
        LumenError::Index(_) => err,
        other => LumenError::Index(other.to_string()),
    }
}

impl VectorIndex for SqliteIndex {
    fn upsert(&self, id: &str, vector: &[f32], metadata: &PhotoMetadata) -> Result<(), LumenError> {
        let record = PhotoRecord {
            id: id.to_string(),
            vector: vector.to_vec(),
            metadata: metadata.clone(),
        };
        self.repo.upsert(&record).map_err(index_error)
    }

    fn query(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<IndexHit>, LumenError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.repo.scan(filter).map_err(index_error)?;
        Ok(rank(vector, candidates.iter(), k))
    }

    fn get(&self, id: &str) -> Result<Option<PhotoRecord>, LumenError> {
        self.repo.get(id).map_err(index_error)
    }

    fn delete(&self, ids: &[String]) -> Result<usize, LumenError> {
        self.repo.delete_ids(ids).map_err(index_error)
    }

    fn delete_where(&self, filter: &SearchFilter) -> Result<usize, LumenError> {
        self.repo.delete_where(filter).map_err(index_error)
    }

    fn count(&self) -> Result<u64, LumenError> {
        self.repo.count().map_err(index_error)
    }

    fn list_ids(&self) -> Result<Vec<String>, LumenError> {
        self.repo.list_ids().map_err(index_error)
    }

    fn peek(&self, limit: usize) -> Result<Vec<PhotoRecord>, LumenError> {
        self.repo.peek(limit).map_err(index_error)
    }

    fn find(&self, filter: &SearchFilter) -> Result<Vec<PhotoRecord>, LumenError> {
        self.repo.scan(filter).map_err(index_error)
    }
}
