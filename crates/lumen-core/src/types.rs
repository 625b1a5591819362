use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LumenError;

// =============================================================================
// Metadata
// =============================================================================

/// A single metadata value as stored in the vector index.
///
/// The index only accepts scalars; nulls and nested documents are mapped to
/// one of these variants by the metadata normalizer before storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    /// Parse a loosely typed value, trying integer, then float, then string.
    ///
    /// Used for `key=value` predicates typed on the command line.
    pub fn parse_loose(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(i) = raw.parse::<i64>() {
            return MetadataValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return MetadataValue::Float(f);
            }
        }
        MetadataValue::Str(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view: ints, integral finite floats, and strings that parse to
    /// either. `None` for anything else.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            MetadataValue::Float(f) => integral(*f),
            MetadataValue::Str(s) => match MetadataValue::parse_loose(s) {
                MetadataValue::Int(i) => Some(i),
                MetadataValue::Float(f) => integral(f),
                MetadataValue::Str(_) => None,
            },
        }
    }
}

fn integral(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound.
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

/// Flat scalar metadata attached to a photo record.
pub type PhotoMetadata = BTreeMap<String, MetadataValue>;

/// The unit of storage in the vector index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Stable photo identifier; the upsert key.
    pub id: String,
    /// L2-normalized embedding.
    pub vector: Vec<f32>,
    pub metadata: PhotoMetadata,
}

// =============================================================================
// Period of day
// =============================================================================

/// Coarse time-of-day bucket a photo was taken in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
    Unknown,
}

impl PeriodOfDay {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodOfDay::Morning => "morning",
            PeriodOfDay::Afternoon => "afternoon",
            PeriodOfDay::Evening => "evening",
            PeriodOfDay::Night => "night",
            PeriodOfDay::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PeriodOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodOfDay {
    type Err = LumenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(PeriodOfDay::Morning),
            "afternoon" => Ok(PeriodOfDay::Afternoon),
            "evening" => Ok(PeriodOfDay::Evening),
            "night" => Ok(PeriodOfDay::Night),
            "unknown" => Ok(PeriodOfDay::Unknown),
            other => Err(LumenError::Config(format!(
                "unknown period of day: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Ingestion job
// =============================================================================

/// A queued request to embed and index one photo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub bucket: String,
    pub image_key: String,
    pub metadata_key: String,
    pub photo_id: String,
}

impl IngestionJob {
    pub const REQUIRED_FIELDS: [&'static str; 4] = ["bucket", "image_key", "photo_id", "metadata_key"];

    /// Parse and validate a queue message body.
    ///
    /// The body must be a JSON object carrying every required field as a
    /// non-empty string. Anything else can never succeed and is reported as
    /// [`LumenError::InvalidJob`].
    pub fn parse(body: &str) -> Result<Self, LumenError> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| LumenError::InvalidJob(format!("invalid JSON: {}", e)))?;

        let obj = value
            .as_object()
            .ok_or_else(|| LumenError::InvalidJob("payload is not a JSON object".to_string()))?;

        let missing: Vec<&str> = Self::REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| {
                !obj.get(*field)
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| !s.trim().is_empty())
            })
            .collect();

        if !missing.is_empty() {
            return Err(LumenError::InvalidJob(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        // Every field was checked above.
        let field = |name: &str| {
            obj.get(name)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            bucket: field("bucket"),
            image_key: field("image_key"),
            metadata_key: field("metadata_key"),
            photo_id: field("photo_id"),
        })
    }

    /// Serialize to the queue wire format.
    pub fn to_body(&self) -> Result<String, LumenError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A message handed out by a job queue.
///
/// The message stays invisible to other consumers until its visibility
/// timeout elapses; deleting it with `receipt_handle` acknowledges it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: String,
    /// Handle for this delivery only; a redelivery gets a new one.
    pub receipt_handle: String,
    pub body: String,
    /// Number of times the message has been received, this delivery included.
    pub receive_count: u32,
}

// =============================================================================
// Search filter
// =============================================================================

/// Conjunction of equality predicates over metadata fields.
///
/// An empty filter matches every record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchFilter {
    predicates: BTreeMap<String, MetadataValue>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an equality predicate.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.predicates.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.predicates.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.predicates.iter()
    }

    /// True when every predicate holds for `metadata`.
    pub fn matches(&self, metadata: &PhotoMetadata) -> bool {
        self.predicates
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}
