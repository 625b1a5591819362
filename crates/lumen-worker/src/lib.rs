//! Lumen Worker crate - the queue-driven ingestion worker.
//!
//! Receives jobs from a `JobQueue`, fetches the photo and its metadata from a
//! `BlobStore`, normalizes the metadata, embeds the image and upserts the
//! record into a `VectorIndex`, acknowledging the job only after the upsert.

pub mod blob;
pub mod error;
pub mod queue;
pub mod staging;
pub mod worker;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use error::{JobStage, WorkerError};
pub use queue::{JobQueue, MemoryQueue, SqliteJobQueue};
pub use staging::{StagedFile, StagingArea};
pub use worker::{IngestionWorker, JobOutcome, WorkerSettings, WorkerStats};
