//! SQLite persistence for photo vector records.
//!
//! Each row holds the embedding as a little-endian f32 BLOB and the scalar
//! metadata as JSON text. Equality filters are evaluated in SQL with
//! `json_extract`; similarity ranking happens in the caller.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use lumen_core::error::LumenError;
use lumen_core::types::{MetadataValue, PhotoMetadata, PhotoRecord, SearchFilter};

use crate::db::Database;

/// Repository for one collection of photo records.
pub struct PhotoRepository {
    db: Arc<Database>,
    collection: String,
}

impl PhotoRepository {
    pub fn new(db: Arc<Database>, collection: impl Into<String>) -> Self {
        Self {
            db,
            collection: collection.into(),
        }
    }

    /// Insert or replace the record with `record.id`, in a single statement.
    pub fn upsert(&self, record: &PhotoRecord) -> Result<(), LumenError> {
        let metadata = serde_json::to_string(&record.metadata)?;
        let bytes = embedding_to_bytes(&record.vector);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO photo_vectors (collection, id, embedding, dimensions, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (collection, id) DO UPDATE SET
                     embedding  = excluded.embedding,
                     dimensions = excluded.dimensions,
                     metadata   = excluded.metadata,
                     updated_at = excluded.updated_at",
                params![
                    self.collection,
                    record.id,
                    bytes,
                    record.vector.len() as i64,
                    metadata,
                    Utc::now().timestamp(),
                ],
            )
            .map_err(|e| LumenError::Storage(format!("Failed to upsert photo: {}", e)))?;
            Ok(())
        })
    }

    /// Find a record by id.
    pub fn get(&self, id: &str) -> Result<Option<PhotoRecord>, LumenError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, embedding, metadata FROM photo_vectors
                     WHERE collection = ?1 AND id = ?2",
                    params![self.collection, id],
                    read_row,
                )
                .optional()
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            row.map(decode_row).transpose()
        })
    }

    /// All records satisfying `filter`, ordered by id.
    pub fn scan(&self, filter: &SearchFilter) -> Result<Vec<PhotoRecord>, LumenError> {
        self.select(filter, None)
    }

    /// The first `limit` records by id.
    pub fn peek(&self, limit: usize) -> Result<Vec<PhotoRecord>, LumenError> {
        self.select(&SearchFilter::new(), Some(limit))
    }

    /// Every id in the collection, sorted.
    pub fn list_ids(&self) -> Result<Vec<String>, LumenError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM photo_vectors WHERE collection = ?1 ORDER BY id")
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![self.collection], |row| row.get::<_, String>(0))
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| LumenError::Storage(e.to_string()))
        })
    }

    /// Number of records in the collection.
    pub fn count(&self) -> Result<u64, LumenError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM photo_vectors WHERE collection = ?1",
                    params![self.collection],
                    |row| row.get(0),
                )
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Delete the given ids. Returns how many rows were removed.
    pub fn delete_ids(&self, ids: &[String]) -> Result<usize, LumenError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            let mut removed = 0;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM photo_vectors WHERE collection = ?1 AND id = ?2")
                    .map_err(|e| LumenError::Storage(e.to_string()))?;
                for id in ids {
                    removed += stmt
                        .execute(params![self.collection, id])
                        .map_err(|e| LumenError::Storage(format!("Failed to delete photo: {}", e)))?;
                }
            }
            tx.commit()
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }

    /// Delete every record satisfying `filter`. Returns how many rows were removed.
    pub fn delete_where(&self, filter: &SearchFilter) -> Result<usize, LumenError> {
        let (clause, values) = self.where_clause(filter)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM photo_vectors WHERE {}", clause),
                params_from_iter(values),
            )
            .map_err(|e| LumenError::Storage(format!("Failed to delete photos: {}", e)))
        })
    }

    fn select(
        &self,
        filter: &SearchFilter,
        limit: Option<usize>,
    ) -> Result<Vec<PhotoRecord>, LumenError> {
        let (clause, mut values) = self.where_clause(filter)?;
        let mut sql = format!(
            "SELECT id, embedding, metadata FROM photo_vectors WHERE {} ORDER BY id",
            clause
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT ?{}", values.len() + 1));
            values.push(SqlValue::Integer(limit as i64));
        }

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(values), read_row)
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| LumenError::Storage(e.to_string()))?;
                records.push(decode_row(raw)?);
            }
            Ok(records)
        })
    }

    /// Build `collection = ?1 AND json_extract(metadata, ?2) = ?3 ...` with
    /// every key and value bound as a parameter.
    fn where_clause(&self, filter: &SearchFilter) -> Result<(String, Vec<SqlValue>), LumenError> {
        let mut clause = String::from("collection = ?1");
        let mut values = vec![SqlValue::Text(self.collection.clone())];

        for (key, value) in filter.iter() {
            if key.is_empty() || key.contains('"') {
                return Err(LumenError::Storage(format!("Invalid filter key: {:?}", key)));
            }
            let path_idx = values.len() + 1;
            clause.push_str(&format!(
                " AND json_extract(metadata, ?{}) = ?{}",
                path_idx,
                path_idx + 1
            ));
            values.push(SqlValue::Text(format!("$.\"{}\"", key)));
            values.push(match value {
                MetadataValue::Int(i) => SqlValue::Integer(*i),
                MetadataValue::Float(f) => SqlValue::Real(*f),
                MetadataValue::Str(s) => SqlValue::Text(s.clone()),
            });
        }

        Ok((clause, values))
    }
}

type RawRow = (String, Vec<u8>, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_row((id, bytes, metadata): RawRow) -> Result<PhotoRecord, LumenError> {
    let metadata: PhotoMetadata = serde_json::from_str(&metadata)?;
    Ok(PhotoRecord {
        id,
        vector: bytes_to_embedding(&bytes),
        metadata,
    })
}

/// Encode an embedding as little-endian f32 bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes; a trailing partial value is ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo() -> PhotoRepository {
        PhotoRepository::new(Arc::new(Database::in_memory().unwrap()), "photos")
    }

    fn record(id: &str, vector: Vec<f32>, year: i64, period: &str) -> PhotoRecord {
        let mut metadata = PhotoMetadata::new();
        metadata.insert("year".into(), MetadataValue::Int(year));
        metadata.insert("period_of_day".into(), MetadataValue::from(period));
        metadata.insert("ratio".into(), MetadataValue::Float(1.5));
        PhotoRecord {
            id: id.to_string(),
            vector,
            metadata,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let repo = make_repo();
        let rec = record("p1", vec![0.6, 0.8], 2023, "morning");
        repo.upsert(&rec).unwrap();

        let loaded = repo.get("p1").unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(repo.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let repo = make_repo();
        repo.upsert(&record("p1", vec![1.0, 0.0], 2022, "night")).unwrap();
        let newer = record("p1", vec![0.0, 1.0], 2023, "morning");
        repo.upsert(&newer).unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.get("p1").unwrap().unwrap(), newer);
    }

    #[test]
    fn test_collections_are_isolated() {
        let db = Arc::new(Database::in_memory().unwrap());
        let a = PhotoRepository::new(Arc::clone(&db), "a");
        let b = PhotoRepository::new(db, "b");
        a.upsert(&record("p1", vec![1.0], 2023, "morning")).unwrap();

        assert_eq!(a.count().unwrap(), 1);
        assert_eq!(b.count().unwrap(), 0);
        assert!(b.get("p1").unwrap().is_none());
    }

    #[test]
    fn test_scan_with_filter() {
        let repo = make_repo();
        repo.upsert(&record("a", vec![1.0], 2023, "morning")).unwrap();
        repo.upsert(&record("b", vec![1.0], 2023, "evening")).unwrap();
        repo.upsert(&record("c", vec![1.0], 2022, "morning")).unwrap();

        let filter = SearchFilter::new().eq("year", 2023).eq("period_of_day", "morning");
        let ids: Vec<String> = repo.scan(&filter).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a"]);

        assert_eq!(repo.scan(&SearchFilter::new()).unwrap().len(), 3);
    }

    #[test]
    fn test_filter_does_not_coerce_types() {
        let repo = make_repo();
        repo.upsert(&record("a", vec![1.0], 2023, "morning")).unwrap();
        let filter = SearchFilter::new().eq("year", "2023");
        assert!(repo.scan(&filter).unwrap().is_empty());
    }

    #[test]
    fn test_filter_on_float_value() {
        let repo = make_repo();
        repo.upsert(&record("a", vec![1.0], 2023, "morning")).unwrap();
        let filter = SearchFilter::new().eq("ratio", 1.5);
        assert_eq!(repo.scan(&filter).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_filter_key() {
        let repo = make_repo();
        let filter = SearchFilter::new().eq("bad\"key", 1);
        assert!(repo.scan(&filter).is_err());
    }

    #[test]
    fn test_peek_and_list_ids() {
        let repo = make_repo();
        for id in ["c", "a", "b"] {
            repo.upsert(&record(id, vec![1.0], 2023, "morning")).unwrap();
        }
        assert_eq!(repo.list_ids().unwrap(), vec!["a", "b", "c"]);
        let peeked: Vec<String> = repo.peek(2).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(peeked, vec!["a", "b"]);
    }

    #[test]
    fn test_delete_ids_counts_removed() {
        let repo = make_repo();
        repo.upsert(&record("a", vec![1.0], 2023, "morning")).unwrap();
        repo.upsert(&record("b", vec![1.0], 2023, "morning")).unwrap();

        let removed = repo
            .delete_ids(&["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.list_ids().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_delete_where() {
        let repo = make_repo();
        repo.upsert(&record("a", vec![1.0], 2023, "morning")).unwrap();
        repo.upsert(&record("b", vec![1.0], 2022, "morning")).unwrap();

        let removed = repo.delete_where(&SearchFilter::new().eq("year", 2022)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.list_ids().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0e-7, 0.0];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&v)), v);
        assert!(bytes_to_embedding(&[1, 2, 3]).is_empty());
    }
}
