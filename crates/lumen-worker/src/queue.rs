//! Job queue contract and implementations.
//!
//! - `SqliteJobQueue` long-polls the durable `job_queue` table.
//! - `MemoryQueue` keeps messages in process for tests and local runs.
//!
//! Both give at-least-once delivery: a received message is hidden for its
//! visibility timeout and reappears unless it is deleted with the receipt
//! handle of its latest delivery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use lumen_core::error::LumenError;
use lumen_core::types::QueueMessage;
use lumen_storage::{Database, SqliteQueue};

/// A queue of ingestion jobs with visibility-timeout semantics.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Wait up to `wait` for one message and hide it for `visibility_timeout`.
    async fn receive(
        &self,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, LumenError>;

    /// Acknowledge a delivery. Returns `false` if the receipt is stale.
    async fn delete(&self, receipt_handle: &str) -> Result<bool, LumenError>;

    /// Enqueue a message body, returning its id.
    async fn send(&self, body: &str) -> Result<String, LumenError>;
}

// ---------------------------------------------------------------------------
// SqliteJobQueue
// ---------------------------------------------------------------------------

/// Long-polling adapter over [`SqliteQueue`].
pub struct SqliteJobQueue {
    inner: SqliteQueue,
    poll_interval: Duration,
}

impl SqliteJobQueue {
    pub fn new(db: Arc<Database>, name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            inner: SqliteQueue::new(db, name),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn inner(&self) -> &SqliteQueue {
        &self.inner
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn receive(
        &self,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, LumenError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.inner.try_receive(visibility_timeout)? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<bool, LumenError> {
        self.inner.delete(receipt_handle)
    }

    async fn send(&self, body: &str) -> Result<String, LumenError> {
        self.inner.send(body)
    }
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemoryMessage {
    id: String,
    body: String,
    receipt_handle: Option<String>,
    visible_at: Instant,
    receive_count: u32,
}

/// In-process queue with the same delivery semantics as the SQLite queue.
///
/// Clones share the same messages.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    messages: Arc<Mutex<Vec<MemoryMessage>>>,
}

const MEMORY_POLL_INTERVAL: Duration = Duration::from_millis(5);

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<MemoryMessage>>, LumenError> {
        self.messages
            .lock()
            .map_err(|e| LumenError::Queue(format!("Lock poisoned: {}", e)))
    }

    fn try_receive(&self, visibility_timeout: Duration) -> Result<Option<QueueMessage>, LumenError> {
        let mut messages = self.lock()?;
        let now = Instant::now();
        let Some(message) = messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        let receipt_handle = Uuid::new_v4().to_string();
        message.receipt_handle = Some(receipt_handle.clone());
        message.visible_at = now + visibility_timeout;
        message.receive_count += 1;

        Ok(Some(QueueMessage {
            message_id: message.id.clone(),
            receipt_handle,
            body: message.body.clone(),
            receive_count: message.receive_count,
        }))
    }

    /// Messages in the queue, visible or in flight.
    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every in-flight message visible again, as if its visibility
    /// timeout had elapsed.
    pub fn expire_all(&self) {
        if let Ok(mut messages) = self.lock() {
            let now = Instant::now();
            for message in messages.iter_mut() {
                message.visible_at = now;
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn receive(
        &self,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, LumenError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.try_receive(visibility_timeout)? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(MEMORY_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<bool, LumenError> {
        let mut messages = self.lock()?;
        let before = messages.len();
        messages.retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        Ok(messages.len() < before)
    }

    async fn send(&self, body: &str) -> Result<String, LumenError> {
        let id = Uuid::new_v4().to_string();
        self.lock()?.push(MemoryMessage {
            id: id.clone(),
            body: body.to_string(),
            receipt_handle: None,
            visible_at: Instant::now(),
            receive_count: 0,
        });
        Ok(id)
    }
}
