use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LumenError, Result};

/// Top-level configuration for Lumen.
///
/// Loaded from `~/.lumen/config.toml` by default. Each section maps to one
/// component of the ingestion/search pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LumenConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl LumenConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LumenConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file does not
    /// exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LumenError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Absolute path of the SQLite file holding the index and the job queue.
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.index.db_file)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.lumen/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Vector index settings. The distance metric is always cosine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Collection name records are stored under.
    pub collection: String,
    /// Database file name, relative to `general.data_dir`.
    pub db_file: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: "photos".to_string(),
            db_file: "lumen.db".to_string(),
        }
    }
}

/// Job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name within the database.
    pub name: String,
    /// Long-poll wait per receive, in seconds.
    pub wait_secs: u64,
    /// How long a received message stays hidden before redelivery.
    pub visibility_timeout_secs: u64,
    /// Interval between queue checks while long-polling.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "photo-embedding-jobs".to_string(),
            wait_secs: 20,
            visibility_timeout_secs: 300,
            poll_interval_ms: 500,
        }
    }
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Root directory; buckets are its subdirectories.
    pub root: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: "~/.lumen/blobs".to_string(),
        }
    }
}

/// Embedding backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend: "onnx" or "mock".
    pub backend: String,
    /// Directory with `vision.onnx`, `text.onnx` and `tokenizer.json`.
    pub model_dir: String,
    /// Embedding dimension.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "onnx".to_string(),
            model_dir: "~/.lumen/models/clip-vit-b32".to_string(),
            dimensions: 512,
        }
    }
}

/// Ingestion worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Directory for per-job staged bytes.
    pub staging_dir: String,
    /// Back-off after a queue receive error, in seconds.
    pub error_backoff_secs: u64,
    /// Receive count above which redeliveries are logged as suspected poison jobs.
    pub poison_warn_threshold: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            staging_dir: "~/.lumen/tmp".to_string(),
            error_backoff_secs: 5,
            poison_warn_threshold: 5,
        }
    }
}

/// Search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of results when the caller does not pass `k`.
    pub default_k: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_k: 5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = LumenConfig::default();
        assert_eq!(config.general.data_dir, "~/.lumen/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.index.collection, "photos");
        assert_eq!(config.queue.wait_secs, 20);
        assert_eq!(config.queue.visibility_timeout_secs, 300);
        assert_eq!(config.embedding.dimensions, 512);
        assert_eq!(config.worker.error_backoff_secs, 5);
        assert_eq!(config.search.default_k, 5);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/srv/lumen"
log_level = "debug"

[queue]
wait_secs = 5
visibility_timeout_secs = 60
poll_interval_ms = 100

[embedding]
backend = "mock"
"#;
        let file = create_temp_config(content);
        let config = LumenConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/srv/lumen");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.queue.wait_secs, 5);
        assert_eq!(config.queue.visibility_timeout_secs, 60);
        assert_eq!(config.embedding.backend, "mock");
        // Untouched fields keep their defaults.
        assert_eq!(config.embedding.dimensions, 512);
        assert_eq!(config.index.collection, "photos");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = LumenConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.lumen/data");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("general = [[[");
        let err = LumenConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, LumenError::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = LumenConfig::default();
        config.worker.poison_warn_threshold = 9;
        config.save(&path).unwrap();

        let reloaded = LumenConfig::load(&path).unwrap();
        assert_eq!(reloaded.worker.poison_warn_threshold, 9);
        assert_eq!(reloaded.index.db_file, config.index.db_file);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let config: LumenConfig = toml::from_str("").unwrap();
        assert_eq!(config.queue.poll_interval_ms, 500);
        assert_eq!(config.blob.root, "~/.lumen/blobs");
    }

    #[test]
    fn test_db_path_joins_data_dir() {
        let mut config = LumenConfig::default();
        config.general.data_dir = "/var/lib/lumen".to_string();
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/lumen/lumen.db"));
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        assert!(!expand_home("~/x").to_string_lossy().starts_with('~'));
    }
}
