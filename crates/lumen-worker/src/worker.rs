//! The ingestion worker loop.
//!
//! Each job runs Receive -> Validate -> Fetch -> Normalize -> Embed -> Store
//! -> Acknowledge, strictly in order. The message is deleted only after the
//! upsert succeeded; any earlier failure leaves it unacknowledged so the queue
//! redelivers it after the visibility timeout. Upserts are idempotent, so a
//! redelivered job simply overwrites its own record.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lumen_core::config::{expand_home, LumenConfig};
use lumen_core::error::LumenError;
use lumen_core::metadata::normalize;
use lumen_core::types::{IngestionJob, QueueMessage};
use lumen_vector::embedding::DynEmbeddingService;
use lumen_vector::index::VectorIndex;

use crate::blob::BlobStore;
use crate::error::{JobStage, WorkerError};
use crate::queue::JobQueue;
use crate::staging::StagingArea;

/// Tunables for [`IngestionWorker`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Long-poll wait per receive.
    pub wait: Duration,
    pub visibility_timeout: Duration,
    /// Pause after a failed receive.
    pub error_backoff: Duration,
    /// Receive count above which deliveries are logged as suspected poison.
    pub poison_warn_threshold: u32,
    pub staging_dir: PathBuf,
}

impl WorkerSettings {
    pub fn from_config(config: &LumenConfig) -> Self {
        Self {
            wait: Duration::from_secs(config.queue.wait_secs),
            visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
            error_backoff: Duration::from_secs(config.worker.error_backoff_secs),
            poison_warn_threshold: config.worker.poison_warn_threshold,
            staging_dir: expand_home(&config.worker.staging_dir),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&LumenConfig::default())
    }
}

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Stored and deleted from the queue.
    Acknowledged,
    /// Malformed payload; deleted without processing.
    Rejected,
    /// Left on the queue for redelivery.
    Failed { stage: JobStage },
}

/// Running counters, logged when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub failed: u64,
    pub receive_errors: u64,
}

impl WorkerStats {
    pub fn record(&mut self, outcome: JobOutcome) {
        self.received += 1;
        match outcome {
            JobOutcome::Acknowledged => self.acknowledged += 1,
            JobOutcome::Rejected => self.rejected += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Consumes ingestion jobs and writes photo vectors to the index.
///
/// All handles are created once at start-up and shared; the worker itself
/// holds no per-job state between messages.
pub struct IngestionWorker {
    queue: Arc<dyn JobQueue>,
    blobs: Arc<dyn BlobStore>,
    embedder: Arc<dyn DynEmbeddingService>,
    index: Arc<dyn VectorIndex>,
    staging: StagingArea,
    settings: WorkerSettings,
}

impl IngestionWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn DynEmbeddingService>,
        index: Arc<dyn VectorIndex>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            blobs,
            embedder,
            index,
            staging: StagingArea::new(settings.staging_dir.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    ///
    /// The signal is observed between jobs only. A job that has been received
    /// always runs to completion; an idle long-poll is abandoned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!(
            wait_secs = self.settings.wait.as_secs(),
            visibility_timeout_secs = self.settings.visibility_timeout.as_secs(),
            staging_dir = %self.settings.staging_dir.display(),
            "Ingestion worker started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.queue.receive(self.settings.wait, self.settings.visibility_timeout) => received,
            };

            match received {
                Ok(Some(message)) => {
                    let outcome = self.process(message).await;
                    stats.record(outcome);
                }
                Ok(None) => {
                    debug!("No messages available");
                    // A zero wait returns without suspending.
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    stats.receive_errors += 1;
                    error!(error = %e, backoff_secs = self.settings.error_backoff.as_secs(), "Queue receive failed");
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }

        info!(
            received = stats.received,
            acknowledged = stats.acknowledged,
            rejected = stats.rejected,
            failed = stats.failed,
            receive_errors = stats.receive_errors,
            "Ingestion worker stopped"
        );
        stats
    }

    /// Receive and process at most one message.
    ///
    /// Returns `Ok(None)` if nothing arrived within the wait. Receive errors
    /// are returned to the caller.
    pub async fn poll_once(&self) -> Result<Option<JobOutcome>, LumenError> {
        let received = self
            .queue
            .receive(self.settings.wait, self.settings.visibility_timeout)
            .await?;
        match received {
            Some(message) => Ok(Some(self.process(message).await)),
            None => Ok(None),
        }
    }

    /// Process one delivered message to a terminal outcome. Never fails.
    pub async fn process(&self, message: QueueMessage) -> JobOutcome {
        if message.receive_count > self.settings.poison_warn_threshold {
            warn!(
                message_id = %message.message_id,
                receive_count = message.receive_count,
                threshold = self.settings.poison_warn_threshold,
                "Message redelivered repeatedly; possible poison job"
            );
        }

        let job = match IngestionJob::parse(&message.body) {
            Ok(job) => job,
            Err(e) => {
                error!(message_id = %message.message_id, error = %e, "Rejecting malformed job");
                self.discard(&message).await;
                return JobOutcome::Rejected;
            }
        };

        info!(photo_id = %job.photo_id, receive_count = message.receive_count, "Processing job");

        if let Err(e) = self.ingest(&job).await {
            error!(
                photo_id = %job.photo_id,
                stage = %e.stage,
                error = %e.source,
                "Job failed; leaving it for redelivery"
            );
            return JobOutcome::Failed { stage: e.stage };
        }

        match self.acknowledge(&message).await {
            Ok(()) => {
                info!(photo_id = %job.photo_id, "Job stored and acknowledged");
                JobOutcome::Acknowledged
            }
            Err(e) => {
                error!(
                    photo_id = %job.photo_id,
                    error = %e.source,
                    "Acknowledge failed after store; job will be redelivered"
                );
                JobOutcome::Failed { stage: e.stage }
            }
        }
    }

    /// Fetch, normalize, embed and store one job.
    async fn ingest(&self, job: &IngestionJob) -> Result<(), WorkerError> {
        let image = self
            .blobs
            .download(&job.bucket, &job.image_key)
            .await
            .map_err(WorkerError::at(JobStage::Fetch))?;
        let staged = self
            .staging
            .stage(&job.photo_id, &image)
            .await
            .map_err(WorkerError::at(JobStage::Fetch))?;
        drop(image);

        let raw_metadata = self
            .blobs
            .download(&job.bucket, &job.metadata_key)
            .await
            .map_err(WorkerError::at(JobStage::Fetch))?;
        let document: serde_json::Value = serde_json::from_slice(&raw_metadata)
            .map_err(|e| WorkerError::new(JobStage::Fetch, LumenError::from(e)))?;
        let metadata = normalize(&document);
        debug!(photo_id = %job.photo_id, fields = metadata.len(), "Metadata normalized");

        let bytes = staged.read().await.map_err(WorkerError::at(JobStage::Fetch))?;
        let vector = self
            .embedder
            .embed_image_boxed(&bytes)
            .await
            .map_err(WorkerError::at(JobStage::Embed))?;
        debug!(photo_id = %job.photo_id, dimensions = vector.len(), "Image embedded");

        self.index
            .upsert(&job.photo_id, &vector, &metadata)
            .map_err(WorkerError::at(JobStage::Store))?;
        debug!(photo_id = %job.photo_id, "Record upserted");

        Ok(())
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), WorkerError> {
        let deleted = self
            .queue
            .delete(&message.receipt_handle)
            .await
            .map_err(WorkerError::at(JobStage::Acknowledge))?;
        if deleted {
            Ok(())
        } else {
            Err(WorkerError::new(
                JobStage::Acknowledge,
                LumenError::Queue("receipt handle expired".to_string()),
            ))
        }
    }

    /// Delete a rejected message; a failure only means it comes back and is
    /// rejected again.
    async fn discard(&self, message: &QueueMessage) {
        match self.queue.delete(&message.receipt_handle).await {
            Ok(true) => {}
            Ok(false) => warn!(message_id = %message.message_id, "Rejected message receipt expired"),
            Err(e) => error!(message_id = %message.message_id, error = %e, "Failed to delete rejected message"),
        }
    }
}
