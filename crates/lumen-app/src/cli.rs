//! CLI argument definitions for the Lumen application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

use lumen_core::types::MetadataValue;

/// Lumen - photo ingestion worker and semantic photo search.
#[derive(Parser, Debug)]
#[command(name = "lumen", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the ingestion worker until interrupted.
    Worker,

    /// Queue an ingestion job.
    Enqueue {
        #[arg(long)]
        bucket: String,
        #[arg(long = "image-key")]
        image_key: String,
        #[arg(long = "metadata-key")]
        metadata_key: String,
        #[arg(long = "photo-id")]
        photo_id: String,
    },

    /// Search photos by text or by an example image.
    Search(SearchArgs),

    /// Inspect and administer the vector index.
    #[command(subcommand)]
    Index(IndexCommand),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("query").required(true).args(["text", "image"])))]
pub struct SearchArgs {
    /// Natural-language description of the photo.
    #[arg(long)]
    pub text: Option<String>,

    /// Path to an example image.
    #[arg(long)]
    pub image: Option<PathBuf>,

    #[arg(long)]
    pub year: Option<i64>,

    /// Month, 1-12.
    #[arg(long)]
    pub month: Option<i64>,

    /// morning, afternoon, evening or night.
    #[arg(long = "time-of-day")]
    pub time_of_day: Option<String>,

    #[arg(long = "camera-make")]
    pub camera_make: Option<String>,

    #[arg(long = "camera-model")]
    pub camera_model: Option<String>,

    /// Number of results (clamped to 1-20).
    #[arg(short = 'k', allow_negative_numbers = true)]
    pub k: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum IndexCommand {
    /// Number of stored photos.
    Count,
    /// Collection summary.
    Stats,
    /// All photo ids.
    List,
    /// Show the first N records.
    Peek {
        #[arg(default_value_t = 5)]
        n: usize,
    },
    /// Show one record.
    Get { id: String },
    /// Records whose metadata matches KEY=VALUE.
    Find {
        #[arg(value_parser = parse_predicate)]
        predicate: (String, MetadataValue),
    },
    /// Delete one record by id.
    DeleteId {
        id: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Delete every record matching KEY=VALUE.
    DeleteWhere {
        #[arg(value_parser = parse_predicate)]
        predicate: (String, MetadataValue),
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Delete every record in the collection.
    DeleteAll {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

/// Parse `key=value`; the value is read as an integer, then a float, else a
/// string.
pub fn parse_predicate(raw: &str) -> Result<(String, MetadataValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), MetadataValue::parse_loose(value)))
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > LUMEN_CONFIG env var > ~/.lumen/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("LUMEN_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory override, if any.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".lumen").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".lumen").join("config.toml");
    }
    PathBuf::from("config.toml")
}
