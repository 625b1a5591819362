//! Search engine: parameter validation, filter construction and result
//! shaping around a [`VectorIndex`].
//!
//! Invalid parameters never produce an error. They are logged and answered
//! with an empty result list, so callers report "no results" uniformly.
//! Index faults do propagate: "search is down" is not "no matches".

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lumen_core::error::LumenError;
use lumen_core::types::{PeriodOfDay, PhotoMetadata, SearchFilter};

use crate::embedding::DynEmbeddingService;
use crate::index::{IndexHit, VectorIndex};

/// Smallest and largest number of results a search may return.
pub const MIN_K: i64 = 1;
pub const MAX_K: i64 = 20;
pub const DEFAULT_K: i64 = 5;

/// Metadata fields copied into each [`SearchResult`].
pub const DISPLAY_FIELDS: &[&str] = &[
    "bucket",
    "photo_key",
    "thumbnail_key",
    "taken_at",
    "period_of_day",
    "year",
    "month",
    "month_name",
    "hour",
    "camera_make",
    "camera_model",
];

/// Caller-supplied search parameters. Absent fields impose no constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub time_of_day: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub k: i64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            year: None,
            month: None,
            time_of_day: None,
            camera_make: None,
            camera_model: None,
            k: DEFAULT_K,
        }
    }
}

impl SearchParams {
    /// Validate and translate into an index filter plus a clamped `k`.
    ///
    /// Returns `None` if any supplied predicate is out of range.
    pub fn to_filter(&self) -> Option<(SearchFilter, usize)> {
        let k = self.k.clamp(MIN_K, MAX_K) as usize;
        let mut filter = SearchFilter::new();

        if let Some(year) = self.year {
            filter = filter.eq("year", year);
        }

        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                warn!(month, "Rejected search: month out of range");
                return None;
            }
            filter = filter.eq("month", month);
        }

        // An empty time_of_day imposes no constraint.
        if let Some(time_of_day) = self.time_of_day.as_deref().filter(|t| !t.is_empty()) {
            match time_of_day.parse::<PeriodOfDay>() {
                Ok(period) if period != PeriodOfDay::Unknown => {
                    filter = filter.eq("period_of_day", period.as_str());
                }
                _ => {
                    warn!(time_of_day = %time_of_day, "Rejected search: invalid time_of_day");
                    return None;
                }
            }
        }

        for (field, value) in [
            ("camera_make", &self.camera_make),
            ("camera_model", &self.camera_model),
        ] {
            if let Some(value) = value {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    warn!(field, "Rejected search: empty camera filter");
                    return None;
                }
                filter = filter.eq(field, trimmed);
            }
        }

        Some((filter, k))
    }
}

/// A single search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub photo_id: String,
    /// The display subset of the stored metadata.
    pub metadata: PhotoMetadata,
    pub distance: Option<f64>,
    /// `1 - distance` rounded to three decimals.
    pub similarity_score: Option<f64>,
}

impl From<IndexHit> for SearchResult {
    fn from(hit: IndexHit) -> Self {
        let metadata = hit
            .metadata
            .into_iter()
            .filter(|(key, _)| DISPLAY_FIELDS.contains(&key.as_str()))
            .collect();

        Self {
            photo_id: hit.id,
            metadata,
            distance: hit.distance,
            similarity_score: hit.distance.map(similarity_score),
        }
    }
}

/// `round(1 - distance, 3)`.
pub fn similarity_score(distance: f64) -> f64 {
    ((1.0 - distance) * 1000.0).round() / 1000.0
}

/// Stateless search engine over a shared index and embedding handle.
///
/// Safe to call concurrently; every call re-queries the index.
pub struct SearchEngine {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl SearchEngine {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self { index, embedder }
    }

    /// Search with a precomputed query vector.
    pub fn search(
        &self,
        vector: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>, LumenError> {
        let Some((filter, k)) = params.to_filter() else {
            return Ok(Vec::new());
        };
        self.query(vector, &filter, k)
    }

    /// Embed `text` and search with it. Blank text yields no results.
    pub async fn search_text(
        &self,
        text: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>, LumenError> {
        let Some((filter, k)) = params.to_filter() else {
            return Ok(Vec::new());
        };
        if text.trim().is_empty() {
            warn!("Rejected search: empty text query");
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_text_boxed(text.trim()).await?;
        self.query(&vector, &filter, k)
    }

    /// Embed an example image and search with it.
    pub async fn search_image(
        &self,
        bytes: &[u8],
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>, LumenError> {
        let Some((filter, k)) = params.to_filter() else {
            return Ok(Vec::new());
        };

        let vector = self.embedder.embed_image_boxed(bytes).await?;
        self.query(&vector, &filter, k)
    }

    fn query(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<SearchResult>, LumenError> {
        let hits = self.index.query(vector, filter, k)?;
        debug!(predicates = filter.len(), k, hits = hits.len(), "Search completed");
        Ok(hits.into_iter().map(SearchResult::from).collect())
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingService, MockEmbedding};
    use crate::index::MemoryIndex;
    use lumen_core::types::{MetadataValue, PhotoRecord};

    struct FailingIndex;

    impl VectorIndex for FailingIndex {
        fn upsert(&self, _: &str, _: &[f32], _: &PhotoMetadata) -> Result<(), LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
        fn query(&self, _: &[f32], _: &SearchFilter, _: usize) -> Result<Vec<IndexHit>, LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
        fn get(&self, _: &str) -> Result<Option<PhotoRecord>, LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
        fn delete(&self, _: &[String]) -> Result<usize, LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
        fn delete_where(&self, _: &SearchFilter) -> Result<usize, LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
        fn count(&self) -> Result<u64, LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
        fn list_ids(&self) -> Result<Vec<String>, LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
        fn peek(&self, _: usize) -> Result<Vec<PhotoRecord>, LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
        fn find(&self, _: &SearchFilter) -> Result<Vec<PhotoRecord>, LumenError> {
            Err(LumenError::Index("unavailable".into()))
        }
    }

    fn meta(period: &str, year: i64, month: i64) -> PhotoMetadata {
        let mut m = PhotoMetadata::new();
        m.insert("period_of_day".into(), MetadataValue::from(period));
        m.insert("year".into(), MetadataValue::Int(year));
        m.insert("month".into(), MetadataValue::Int(month));
        m.insert("camera_make".into(), MetadataValue::from("Canon"));
        m.insert("exif".into(), MetadataValue::from("{\"ISO\":100}"));
        m
    }

    fn make_engine() -> (SearchEngine, MemoryIndex) {
        let index = MemoryIndex::new();
        let engine = SearchEngine::new(
            Arc::new(index.clone()),
            Arc::new(MockEmbedding::with_dimensions(32)),
        );
        (engine, index)
    }

    fn params(k: i64) -> SearchParams {
        SearchParams {
            k,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_index() {
        let (engine, _) = make_engine();
        let results = engine.search(&[1.0, 0.0], &SearchParams::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_k_is_clamped() {
        let (engine, index) = make_engine();
        for i in 0..30 {
            index
                .upsert(&format!("p{:02}", i), &[1.0, i as f32], &meta("night", 2023, 1))
                .unwrap();
        }

        assert_eq!(engine.search(&[1.0, 0.0], &params(0)).unwrap().len(), 1);
        assert_eq!(engine.search(&[1.0, 0.0], &params(-3)).unwrap().len(), 1);
        assert_eq!(engine.search(&[1.0, 0.0], &params(999)).unwrap().len(), 20);
        assert_eq!(engine.search(&[1.0, 0.0], &SearchParams::default()).unwrap().len(), 5);
    }

    #[test]
    fn test_invalid_parameters_yield_empty() {
        let (engine, index) = make_engine();
        index.upsert("p1", &[1.0, 0.0], &meta("morning", 2023, 6)).unwrap();

        let invalid = [
            SearchParams { month: Some(0), ..Default::default() },
            SearchParams { month: Some(13), ..Default::default() },
            SearchParams { time_of_day: Some("dusk".into()), ..Default::default() },
            SearchParams { time_of_day: Some("unknown".into()), ..Default::default() },
            SearchParams { time_of_day: Some("  ".into()), ..Default::default() },
            SearchParams { camera_make: Some("   ".into()), ..Default::default() },
            SearchParams { camera_model: Some(String::new()), ..Default::default() },
        ];
        for p in &invalid {
            assert!(engine.search(&[1.0, 0.0], p).unwrap().is_empty(), "{:?}", p);
        }
    }

    #[test]
    fn test_empty_time_of_day_is_no_constraint() {
        let (engine, index) = make_engine();
        index.upsert("p1", &[1.0, 0.0], &meta("morning", 2023, 6)).unwrap();

        let p = SearchParams { time_of_day: Some(String::new()), ..Default::default() };
        let (filter, _) = p.to_filter().unwrap();
        assert!(filter.get("period_of_day").is_none());

        let results = engine.search(&[1.0, 0.0], &p).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].photo_id, "p1");
    }

    #[test]
    fn test_filter_construction_only_supplied_predicates() {
        let p = SearchParams {
            year: Some(2023),
            time_of_day: Some("morning".into()),
            ..Default::default()
        };
        let (filter, k) = p.to_filter().unwrap();
        assert_eq!(k, 5);
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.get("year"), Some(&MetadataValue::Int(2023)));
        assert_eq!(filter.get("period_of_day"), Some(&MetadataValue::from("morning")));
        assert!(filter.get("month").is_none());
    }

    #[test]
    fn test_camera_filters_are_trimmed() {
        let p = SearchParams {
            camera_make: Some("  Canon ".into()),
            ..Default::default()
        };
        let (filter, _) = p.to_filter().unwrap();
        assert_eq!(filter.get("camera_make"), Some(&MetadataValue::from("Canon")));
    }

    #[test]
    fn test_filter_round_trip() {
        let (engine, index) = make_engine();
        index.upsert("hit", &[1.0, 0.0], &meta("morning", 2023, 5)).unwrap();
        index.upsert("wrong-year", &[1.0, 0.0], &meta("morning", 2022, 5)).unwrap();
        index.upsert("wrong-time", &[1.0, 0.0], &meta("evening", 2023, 5)).unwrap();

        let p = SearchParams {
            year: Some(2023),
            time_of_day: Some("morning".into()),
            ..Default::default()
        };
        let results = engine.search(&[1.0, 0.0], &p).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].photo_id, "hit");
    }

    #[test]
    fn test_morning_scenario_preserves_index_order() {
        let (engine, index) = make_engine();
        index.upsert("m-far", &[0.2, 1.0], &meta("morning", 2023, 1)).unwrap();
        index.upsert("m-near", &[1.0, 0.0], &meta("morning", 2023, 1)).unwrap();
        index.upsert("m-mid", &[1.0, 0.5], &meta("morning", 2023, 1)).unwrap();
        index.upsert("e-1", &[1.0, 0.0], &meta("evening", 2023, 1)).unwrap();
        index.upsert("e-2", &[1.0, 0.1], &meta("evening", 2023, 1)).unwrap();

        let p = SearchParams {
            time_of_day: Some("morning".into()),
            k: 5,
            ..Default::default()
        };
        let results = engine.search(&[1.0, 0.0], &p).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.photo_id.as_str()).collect();
        assert_eq!(ids, vec!["m-near", "m-mid", "m-far"]);

        let distances: Vec<f64> = results.iter().map(|r| r.distance.unwrap()).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_similarity_score_derivation() {
        assert_eq!(similarity_score(0.0), 1.0);
        assert_eq!(similarity_score(0.642), 0.358);
        assert_eq!(similarity_score(1.0), 0.0);
    }

    #[test]
    fn test_result_without_distance() {
        let result = SearchResult::from(IndexHit {
            id: "p1".into(),
            metadata: PhotoMetadata::new(),
            distance: None,
        });
        assert_eq!(result.distance, None);
        assert_eq!(result.similarity_score, None);
    }

    #[test]
    fn test_result_keeps_display_fields_only() {
        let (engine, index) = make_engine();
        index.upsert("p1", &[1.0, 0.0], &meta("morning", 2023, 5)).unwrap();

        let results = engine.search(&[1.0, 0.0], &SearchParams::default()).unwrap();
        let metadata = &results[0].metadata;
        assert!(metadata.contains_key("camera_make"));
        assert!(metadata.contains_key("period_of_day"));
        assert!(!metadata.contains_key("exif"));
        assert_eq!(results[0].similarity_score, Some(1.0));
    }

    #[test]
    fn test_index_errors_propagate() {
        let engine = SearchEngine::new(Arc::new(FailingIndex), Arc::new(MockEmbedding::new()));
        let err = engine.search(&[1.0], &SearchParams::default()).unwrap_err();
        assert!(matches!(err, LumenError::Index(_)));
    }

    #[tokio::test]
    async fn test_search_text_finds_matching_image() {
        let (engine, index) = make_engine();
        let embedder = MockEmbedding::with_dimensions(32);
        let cat = embedder.embed_image(b"cat").await.unwrap();
        let dog = embedder.embed_image(b"dog").await.unwrap();
        index.upsert("cat", &cat, &meta("morning", 2023, 1)).unwrap();
        index.upsert("dog", &dog, &meta("morning", 2023, 1)).unwrap();

        let results = engine.search_text("cat", &params(1)).await.unwrap();
        assert_eq!(results[0].photo_id, "cat");
        assert_eq!(results[0].similarity_score, Some(1.0));

        let results = engine.search_image(b"dog", &params(1)).await.unwrap();
        assert_eq!(results[0].photo_id, "dog");
    }

    #[tokio::test]
    async fn test_search_text_blank_query() {
        let (engine, index) = make_engine();
        index.upsert("p1", &[1.0; 32], &meta("morning", 2023, 1)).unwrap();
        assert!(engine.search_text("   ", &SearchParams::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_image_embedding_error_propagates() {
        let (engine, _) = make_engine();
        let err = engine
            .search_image(&[], &SearchParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LumenError::Embedding(_)));
    }
}
