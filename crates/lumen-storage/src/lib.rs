//! Lumen Storage crate - SQLite persistence for photo vectors and the job queue.
//!
//! Provides a WAL-mode SQLite database with migrations, the photo vector
//! repository behind the persistent index, and a durable queue with
//! visibility timeouts and receipt handles.

pub mod db;
pub mod migrations;
pub mod photos;
pub mod queue;

pub use db::Database;
pub use photos::{bytes_to_embedding, embedding_to_bytes, PhotoRepository};
pub use queue::SqliteQueue;
