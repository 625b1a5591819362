//! Error types for the ingestion worker.

use std::fmt;

use lumen_core::error::LumenError;

/// The pipeline step a job failed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStage {
    Fetch,
    Embed,
    Store,
    Acknowledge,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Fetch => "fetch",
            JobStage::Embed => "embed",
            JobStage::Store => "store",
            JobStage::Acknowledge => "acknowledge",
        };
        f.write_str(name)
    }
}

/// A per-job failure: the stage it happened in and the underlying error.
///
/// These never stop the worker loop; the message is left unacknowledged
/// and reappears after its visibility timeout.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct WorkerError {
    pub stage: JobStage,
    #[source]
    pub source: LumenError,
}

impl WorkerError {
    pub fn new(stage: JobStage, source: LumenError) -> Self {
        Self { stage, source }
    }

    /// Adapter for `map_err`: tag an error with `stage`.
    pub fn at(stage: JobStage) -> impl FnOnce(LumenError) -> WorkerError {
        move |source| WorkerError::new(stage, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_display() {
        let err = WorkerError::new(
            JobStage::Fetch,
            LumenError::BlobStore("no such key: photos/a.jpg".into()),
        );
        assert_eq!(
            err.to_string(),
            "fetch failed: Blob store error: no such key: photos/a.jpg"
        );
    }

    #[test]
    fn test_worker_error_at() {
        let result: Result<(), LumenError> = Err(LumenError::Index("locked".into()));
        let err = result.map_err(WorkerError::at(JobStage::Store)).unwrap_err();
        assert_eq!(err.stage, JobStage::Store);
        assert!(matches!(err.source, LumenError::Index(_)));
    }

    #[test]
    fn test_worker_error_source_chain() {
        use std::error::Error;
        let err = WorkerError::new(JobStage::Embed, LumenError::Embedding("bad image".into()));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Embedding error: bad image"));
    }
}
