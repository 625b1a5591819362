//! Lumen core - shared error type, configuration, domain types, and the
//! metadata normalizer used by the ingestion worker.

pub mod config;
pub mod error;
pub mod metadata;
pub mod types;

pub use config::LumenConfig;
pub use error::{LumenError, Result};
pub use metadata::normalize;
pub use types::*;
