//! Database schema migrations.
//!
//! Version 1 creates the photo vector table and the durable job queue.

use rusqlite::Connection;
use tracing::info;

use lumen_core::error::LumenError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), LumenError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| LumenError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| LumenError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), LumenError> {
    conn.execute_batch(
        "
        BEGIN;

        -- One row per photo; (collection, id) is the upsert key.
        CREATE TABLE IF NOT EXISTS photo_vectors (
            collection  TEXT NOT NULL,
            id          TEXT NOT NULL,
            embedding   BLOB NOT NULL,
            dimensions  INTEGER NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        );

        -- Durable job queue with per-message visibility deadlines.
        CREATE TABLE IF NOT EXISTS job_queue (
            id              TEXT PRIMARY KEY NOT NULL,
            queue           TEXT NOT NULL,
            body            TEXT NOT NULL,
            receipt_handle  TEXT,
            visible_at      INTEGER NOT NULL,
            receive_count   INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_job_queue_visible
            ON job_queue (queue, visible_at, created_at);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_job_queue_receipt
            ON job_queue (receipt_handle)
            WHERE receipt_handle IS NOT NULL;

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');

        COMMIT;
        ",
    )
    .map_err(|e| LumenError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
