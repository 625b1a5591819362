//! Vector index abstraction and the in-memory implementation.
//!
//! Search is brute-force cosine distance over the records that satisfy the
//! metadata filter. All operations are O(n), which is acceptable for the
//! collection sizes a single worker fleet produces.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lumen_core::error::LumenError;
use lumen_core::types::{PhotoMetadata, PhotoRecord, SearchFilter};

/// A single hit returned from a vector query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub metadata: PhotoMetadata,
    /// Cosine distance to the query; `None` if the backend did not report one.
    pub distance: Option<f64>,
}

/// Persistent store of photo vectors keyed by photo id.
///
/// Every fault is reported as [`LumenError::Index`]. Implementations do not
/// retry.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the record for `id`. Replacement is atomic.
    fn upsert(&self, id: &str, vector: &[f32], metadata: &PhotoMetadata) -> Result<(), LumenError>;

    /// Up to `k` nearest records satisfying `filter`, by ascending cosine
    /// distance with ties broken by id.
    fn query(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<IndexHit>, LumenError>;

    fn get(&self, id: &str) -> Result<Option<PhotoRecord>, LumenError>;

    /// Delete the given ids; returns how many existed.
    fn delete(&self, ids: &[String]) -> Result<usize, LumenError>;

    /// Delete every record matching `filter`; returns how many were removed.
    fn delete_where(&self, filter: &SearchFilter) -> Result<usize, LumenError>;

    fn count(&self) -> Result<u64, LumenError>;

    /// All ids in ascending order.
    fn list_ids(&self) -> Result<Vec<String>, LumenError>;

    /// The first `limit` records by id.
    fn peek(&self, limit: usize) -> Result<Vec<PhotoRecord>, LumenError>;

    /// Every record matching `filter`, by id.
    fn find(&self, filter: &SearchFilter) -> Result<Vec<PhotoRecord>, LumenError>;
}

/// Cosine distance `1 - cos(a, b)`, clamped to be non-negative.
///
/// Returns 1.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 1.0;
    }

    (1.0 - dot / denom).max(0.0)
}

/// Rank records against `vector` and keep the best `k`.
pub(crate) fn rank<'a>(
    vector: &[f32],
    records: impl Iterator<Item = &'a PhotoRecord>,
    k: usize,
) -> Vec<IndexHit> {
    let mut scored: Vec<(f64, &PhotoRecord)> = records
        .map(|record| (cosine_distance(vector, &record.vector), record))
        .collect();

    scored.sort_by(|(da, ra), (db, rb)| {
        da.partial_cmp(db)
            .unwrap_or(Ordering::Equal)
            .then_with(|| ra.id.cmp(&rb.id))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(distance, record)| IndexHit {
            id: record.id.clone(),
            metadata: record.metadata.clone(),
            distance: Some(distance),
        })
        .collect()
}

/// In-memory vector index.
///
/// Thread-safe via an interior RwLock; clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    records: Arc<RwLock<HashMap<String, PhotoRecord>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, PhotoRecord>>, LumenError> {
        self.records
            .read()
            .map_err(|e| LumenError::Index(format!("Lock poisoned: {}", e)))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, PhotoRecord>>, LumenError> {
        self.records
            .write()
            .map_err(|e| LumenError::Index(format!("Lock poisoned: {}", e)))
    }

    fn sorted_matching(&self, filter: &SearchFilter) -> Result<Vec<PhotoRecord>, LumenError> {
        let records = self.read()?;
        let mut matching: Vec<PhotoRecord> = records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }
}

impl VectorIndex for MemoryIndex {
    fn upsert(&self, id: &str, vector: &[f32], metadata: &PhotoMetadata) -> Result<(), LumenError> {
        let mut records = self.write()?;
        records.insert(
            id.to_string(),
            PhotoRecord {
                id: id.to_string(),
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<IndexHit>, LumenError> {
        let records = self.read()?;
        Ok(rank(
            vector,
            records.values().filter(|r| filter.matches(&r.metadata)),
            k,
        ))
    }

    fn get(&self, id: &str) -> Result<Option<PhotoRecord>, LumenError> {
        Ok(self.read()?.get(id).cloned())
    }

    fn delete(&self, ids: &[String]) -> Result<usize, LumenError> {
        let mut records = self.write()?;
        Ok(ids.iter().filter(|id| records.remove(*id).is_some()).count())
    }

    fn delete_where(&self, filter: &SearchFilter) -> Result<usize, LumenError> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|_, r| !filter.matches(&r.metadata));
        Ok(before - records.len())
    }

    fn count(&self) -> Result<u64, LumenError> {
        Ok(self.read()?.len() as u64)
    }

    fn list_ids(&self) -> Result<Vec<String>, LumenError> {
        let mut ids: Vec<String> = self.read()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn peek(&self, limit: usize) -> Result<Vec<PhotoRecord>, LumenError> {
        let mut records = self.sorted_matching(&SearchFilter::new())?;
        records.truncate(limit);
        Ok(records)
    }

    fn find(&self, filter: &SearchFilter) -> Result<Vec<PhotoRecord>, LumenError> {
        self.sorted_matching(filter)
    }
}
