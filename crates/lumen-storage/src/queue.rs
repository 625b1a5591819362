//! Durable job queue on SQLite.
//!
//! Messages become invisible for a visibility timeout when received and
//! reappear if they are not deleted before it elapses. Every receive issues a
//! fresh receipt handle; deleting with a stale handle is a no-op, so a slow
//! consumer cannot acknowledge a delivery that has already been handed to
//! someone else.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use lumen_core::error::LumenError;
use lumen_core::types::QueueMessage;

use crate::db::Database;

/// A named queue stored in the `job_queue` table.
pub struct SqliteQueue {
    db: Arc<Database>,
    name: String,
}

impl SqliteQueue {
    pub fn new(db: Arc<Database>, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a message body. Returns the new message id.
    pub fn send(&self, body: &str) -> Result<String, LumenError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO job_queue (id, queue, body, visible_at, receive_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?4)",
                params![id, self.name, body, now],
            )
            .map_err(|e| LumenError::Queue(format!("Failed to send message: {}", e)))?;
            Ok(())
        })?;

        debug!(message_id = %id, queue = %self.name, "Message enqueued");
        Ok(id)
    }

    /// Claim the oldest visible message, hiding it for `visibility_timeout`.
    ///
    /// Returns `None` without waiting when nothing is visible. The claim runs
    /// in an IMMEDIATE transaction so two processes cannot claim the same
    /// delivery.
    pub fn try_receive(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, LumenError> {
        let now = Utc::now().timestamp_millis();
        let hidden_until = now.saturating_add(visibility_timeout.as_millis() as i64);

        self.db.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
                .map_err(|e| LumenError::Queue(e.to_string()))?;

            let candidate: Option<(String, String, i64)> = tx
                .query_row(
                    "SELECT id, body, receive_count FROM job_queue
                     WHERE queue = ?1 AND visible_at <= ?2
                     ORDER BY created_at, rowid
                     LIMIT 1",
                    params![self.name, now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| LumenError::Queue(e.to_string()))?;

            let Some((id, body, receive_count)) = candidate else {
                tx.commit().map_err(|e| LumenError::Queue(e.to_string()))?;
                return Ok(None);
            };

            let receipt_handle = Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE job_queue
                 SET receipt_handle = ?1, visible_at = ?2, receive_count = receive_count + 1
                 WHERE id = ?3",
                params![receipt_handle, hidden_until, id],
            )
            .map_err(|e| LumenError::Queue(format!("Failed to claim message: {}", e)))?;

            tx.commit().map_err(|e| LumenError::Queue(e.to_string()))?;

            Ok(Some(QueueMessage {
                message_id: id,
                receipt_handle,
                body,
                receive_count: (receive_count + 1) as u32,
            }))
        })
    }

    /// Delete the message delivered with `receipt_handle`.
    ///
    /// Returns `false` when the handle is unknown or stale.
    pub fn delete(&self, receipt_handle: &str) -> Result<bool, LumenError> {
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM job_queue WHERE queue = ?1 AND receipt_handle = ?2",
                params![self.name, receipt_handle],
            )
            .map_err(|e| LumenError::Queue(format!("Failed to delete message: {}", e)))
        })?;
        Ok(removed > 0)
    }

    /// Total messages in the queue, visible or in flight.
    pub fn len(&self) -> Result<u64, LumenError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM job_queue WHERE queue = ?1",
                    params![self.name],
                    |row| row.get(0),
                )
                .map_err(|e| LumenError::Queue(e.to_string()))?;
            Ok(count as u64)
        })
    }

    pub fn is_empty(&self) -> Result<bool, LumenError> {
        Ok(self.len()? == 0)
    }

    /// Messages currently received and not yet visible again.
    pub fn in_flight(&self) -> Result<u64, LumenError> {
        let now = Utc::now().timestamp_millis();
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM job_queue
                     WHERE queue = ?1 AND receipt_handle IS NOT NULL AND visible_at > ?2",
                    params![self.name, now],
                    |row| row.get(0),
                )
                .map_err(|e| LumenError::Queue(e.to_string()))?;
            Ok(count as u64)
        })
    }
}
