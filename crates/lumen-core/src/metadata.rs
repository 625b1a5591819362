//! Metadata normalization.
//!
//! Turns the raw metadata document uploaded next to each photo into the flat,
//! null-free scalar map the vector index stores. Runs on every job before the
//! record is written; never fails.

use serde_json::Value;

use crate::types::{MetadataValue, PhotoMetadata};

/// Placeholder for string fields with no value.
pub const UNKNOWN: &str = "unknown";

/// Placeholder for integer fields with no value.
pub const NUMERIC_SENTINEL: i64 = -1;

/// Fields whose missing values become [`NUMERIC_SENTINEL`].
pub const NUMERIC_FIELDS: [&str; 3] = ["year", "month", "hour"];

/// String fields of the record schema, filled with [`UNKNOWN`] when missing.
pub const STRING_FIELDS: [&str; 7] = [
    "bucket",
    "photo_key",
    "thumbnail_key",
    "taken_at",
    "period_of_day",
    "camera_make",
    "camera_model",
];

const EXIF_KEY: &str = "exif";

/// Flatten and sanitize a raw metadata document.
///
/// - the nested `exif` document is serialized to a JSON string, or set to
///   `"unknown"` when absent or empty;
/// - null or missing `year`/`month`/`hour` become `-1`, every other null or
///   missing schema field becomes `"unknown"`;
/// - remaining non-scalar values are coerced (objects and arrays to JSON
///   strings, booleans to `"true"`/`"false"`).
///
/// A document that is not a JSON object is treated as `{}`.
pub fn normalize(raw: &Value) -> PhotoMetadata {
    let mut out = PhotoMetadata::new();

    let Some(doc) = raw.as_object() else {
        fill_schema(&mut out);
        out.insert(EXIF_KEY.to_string(), MetadataValue::from(UNKNOWN));
        return out;
    };

    for (key, value) in doc {
        if key == EXIF_KEY {
            continue;
        }
        out.insert(key.clone(), to_scalar(key, value));
    }

    let exif = match doc.get(EXIF_KEY) {
        Some(value) if !is_empty_value(value) => {
            MetadataValue::Str(serde_json::to_string(value).unwrap_or_else(|_| UNKNOWN.to_string()))
        }
        _ => MetadataValue::from(UNKNOWN),
    };
    out.insert(EXIF_KEY.to_string(), exif);

    fill_schema(&mut out);
    out
}

fn fill_schema(out: &mut PhotoMetadata) {
    for field in NUMERIC_FIELDS {
        out.entry(field.to_string())
            .or_insert(MetadataValue::Int(NUMERIC_SENTINEL));
    }
    for field in STRING_FIELDS {
        out.entry(field.to_string())
            .or_insert_with(|| MetadataValue::from(UNKNOWN));
    }
}

fn to_scalar(key: &str, value: &Value) -> MetadataValue {
    if NUMERIC_FIELDS.contains(&key) {
        return numeric_scalar(value);
    }
    match value {
        Value::Null => MetadataValue::from(UNKNOWN),
        Value::Bool(b) => MetadataValue::Str(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                // u64 above i64::MAX
                MetadataValue::Str(n.to_string())
            }
        }
        Value::String(s) => MetadataValue::Str(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            MetadataValue::Str(serde_json::to_string(value).unwrap_or_else(|_| UNKNOWN.to_string()))
        }
    }
}

/// `year`/`month`/`hour` are always stored as `Int`; values that are not
/// integral become the sentinel.
fn numeric_scalar(value: &Value) -> MetadataValue {
    let candidate = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(MetadataValue::Int(i)),
            None => n.as_f64().map(MetadataValue::Float),
        },
        Value::String(s) => Some(MetadataValue::from(s.as_str())),
        _ => None,
    };
    MetadataValue::Int(
        candidate
            .and_then(|v| v.as_i64())
            .unwrap_or(NUMERIC_SENTINEL),
    )
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_document() -> Value {
        json!({
            "bucket": "family-photos",
            "photo_key": "originals/p1.jpg",
            "thumbnail_key": "thumbs/p1.jpg",
            "taken_at": "2023-06-14T07:12:00",
            "period_of_day": "morning",
            "year": 2023,
            "month": 6,
            "month_name": "June",
            "hour": 7,
            "camera_make": "HUAWEI",
            "camera_model": "VOG-L29",
            "exif": {"FNumber": 1.8, "ISO": 50}
        })
    }

    #[test]
    fn test_full_document_passes_through() {
        let meta = normalize(&full_document());
        assert_eq!(meta["bucket"], MetadataValue::from("family-photos"));
        assert_eq!(meta["year"], MetadataValue::Int(2023));
        assert_eq!(meta["month"], MetadataValue::Int(6));
        assert_eq!(meta["hour"], MetadataValue::Int(7));
        assert_eq!(meta["month_name"], MetadataValue::from("June"));
        assert_eq!(meta["camera_model"], MetadataValue::from("VOG-L29"));
    }

    #[test]
    fn test_exif_serialized_to_json_string() {
        let meta = normalize(&full_document());
        let exif = meta["exif"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(exif).unwrap();
        assert_eq!(parsed, json!({"FNumber": 1.8, "ISO": 50}));
    }

    #[test]
    fn test_exif_absent_or_empty_is_unknown() {
        for doc in [
            json!({}),
            json!({"exif": {}}),
            json!({"exif": null}),
            json!({"exif": []}),
            json!({"exif": ""}),
        ] {
            assert_eq!(normalize(&doc)["exif"], MetadataValue::from(UNKNOWN), "{doc}");
        }
    }

    #[test]
    fn test_null_numeric_fields_become_sentinel() {
        let doc = json!({"year": null, "month": null, "hour": null});
        let meta = normalize(&doc);
        for field in NUMERIC_FIELDS {
            assert_eq!(meta[field], MetadataValue::Int(-1), "{field}");
        }
    }

    #[test]
    fn test_absent_numeric_fields_become_sentinel() {
        let meta = normalize(&json!({"camera_make": "Canon"}));
        for field in NUMERIC_FIELDS {
            assert_eq!(meta[field], MetadataValue::Int(-1), "{field}");
        }
    }

    #[test]
    fn test_null_and_absent_string_fields_become_unknown() {
        let doc = json!({"camera_make": null, "taken_at": null, "lens": null});
        let meta = normalize(&doc);
        assert_eq!(meta["camera_make"], MetadataValue::from(UNKNOWN));
        assert_eq!(meta["taken_at"], MetadataValue::from(UNKNOWN));
        assert_eq!(meta["lens"], MetadataValue::from(UNKNOWN));
        // Absent schema fields are filled too.
        assert_eq!(meta["camera_model"], MetadataValue::from(UNKNOWN));
        assert_eq!(meta["period_of_day"], MetadataValue::from(UNKNOWN));
    }

    #[test]
    fn test_nested_and_boolean_values_are_flattened() {
        let doc = json!({"gps": {"lat": 1.0}, "tags": ["a", "b"], "flash": true, "ratio": 1.5});
        let meta = normalize(&doc);
        assert_eq!(meta["gps"], MetadataValue::from(r#"{"lat":1.0}"#));
        assert_eq!(meta["tags"], MetadataValue::from(r#"["a","b"]"#));
        assert_eq!(meta["flash"], MetadataValue::from("true"));
        assert_eq!(meta["ratio"], MetadataValue::Float(1.5));
    }

    #[test]
    fn test_numeric_fields_are_coerced_to_integers() {
        let doc = json!({"year": 2023.0, "month": "6", "hour": " 7 "});
        let meta = normalize(&doc);
        assert_eq!(meta["year"], MetadataValue::Int(2023));
        assert_eq!(meta["month"], MetadataValue::Int(6));
        assert_eq!(meta["hour"], MetadataValue::Int(7));
    }

    #[test]
    fn test_unconvertible_numeric_fields_become_sentinel() {
        let doc = json!({"year": "last summer", "month": 6.5, "hour": true});
        let meta = normalize(&doc);
        for field in NUMERIC_FIELDS {
            assert_eq!(meta[field], MetadataValue::Int(-1), "{field}");
        }

        let meta = normalize(&json!({"year": [2023], "month": {"m": 6}, "hour": ""}));
        for field in NUMERIC_FIELDS {
            assert_eq!(meta[field], MetadataValue::Int(-1), "{field}");
        }
    }

    #[test]
    fn test_non_object_document_yields_schema_defaults() {
        for doc in [json!(null), json!([1, 2]), json!("text"), json!(12)] {
            let meta = normalize(&doc);
            assert_eq!(meta["year"], MetadataValue::Int(-1));
            assert_eq!(meta["bucket"], MetadataValue::from(UNKNOWN));
            assert_eq!(meta["exif"], MetadataValue::from(UNKNOWN));
            assert_eq!(meta.len(), NUMERIC_FIELDS.len() + STRING_FIELDS.len() + 1);
        }
    }

    #[test]
    fn test_input_is_not_mutated() {
        let doc = full_document();
        let before = doc.clone();
        let _ = normalize(&doc);
        assert_eq!(doc, before);
    }
}
