use super::traits::{BatchStore, StorageError};
use crate::batch::{Batch, BatchIndexEntry, BatchSummary};
use async_trait::async_trait;
use chrono::Utc;
use duckdb::{Connection, OptionalExt};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// DuckDB implementation of the BatchStore trait
pub struct DuckDbStorage {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    /// Open (or create) a database file, creating parent directories as needed
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            if e.to_string().contains("Could not set lock") {
                tracing::error!(path = %path.display(), "Database is locked by another process");
            }
            e
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

fn read_index(
    conn: &Connection,
    group_id: &str,
    range: Option<(f64, f64)>,
) -> Result<Vec<BatchIndexEntry>, StorageError> {
    let (start, end) = range.unwrap_or((f64::MIN, f64::MAX));
    let mut stmt = conn.prepare(
        "SELECT batch_id, timestamp FROM batch_index
         WHERE group_id = ? AND timestamp >= ? AND timestamp <= ?
         ORDER BY timestamp, batch_id",
    )?;

    let rows = stmt.query_map(duckdb::params![group_id, start, end], |row| {
        Ok(BatchIndexEntry {
            batch_id: row.get(0)?,
            timestamp: row.get(1)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Load bodies for the given index entries, dropping any that are missing or corrupt
fn load_bodies(
    conn: &Connection,
    group_id: &str,
    entries: &[BatchIndexEntry],
) -> Result<Vec<Batch>, StorageError> {
    let mut stmt =
        conn.prepare("SELECT body FROM batch_bodies WHERE group_id = ? AND batch_id = ?")?;

    let mut batches = Vec::with_capacity(entries.len());
    for entry in entries {
        let body: Option<String> = stmt
            .query_row(duckdb::params![group_id, entry.batch_id], |row| row.get(0))
            .optional()?;

        let Some(body) = body else {
            tracing::warn!(
                group_id = %group_id,
                batch_id = %entry.batch_id,
                "Batch body missing, skipping"
            );
            continue;
        };

        match serde_json::from_str::<Batch>(&body) {
            Ok(batch) => batches.push(batch),
            Err(e) => {
                tracing::warn!(
                    group_id = %group_id,
                    batch_id = %entry.batch_id,
                    error = %e,
                    "Batch body unreadable, skipping"
                );
            }
        }
    }
    Ok(batches)
}

#[async_trait]
impl BatchStore for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS batch_index (
                    group_id VARCHAR NOT NULL,
                    batch_id VARCHAR NOT NULL,
                    timestamp DOUBLE NOT NULL,
                    PRIMARY KEY (group_id, batch_id)
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_batch_index_time ON batch_index(group_id, timestamp)",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS batch_bodies (
                    group_id VARCHAR NOT NULL,
                    batch_id VARCHAR NOT NULL,
                    body TEXT NOT NULL,
                    PRIMARY KEY (group_id, batch_id)
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS watermarks (
                    group_id VARCHAR PRIMARY KEY,
                    last_message_timestamp BIGINT NOT NULL,
                    updated_at DOUBLE NOT NULL
                )",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn save_batch(&self, batch: &Batch) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let body = serde_json::to_string(batch)?;
        let group_id = batch.group_id.clone();
        let batch_id = batch.batch_id.clone();
        let timestamp = batch.timestamp;

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;

            // Body first, then the index pointer; both land in one commit
            tx.execute(
                "INSERT INTO batch_bodies (group_id, batch_id, body) VALUES (?, ?, ?)",
                duckdb::params![group_id, batch_id, body],
            )?;
            tx.execute(
                "INSERT INTO batch_index (group_id, batch_id, timestamp) VALUES (?, ?, ?)",
                duckdb::params![group_id, batch_id, timestamp],
            )?;

            tx.commit()?;
            tracing::debug!(group_id = %group_id, batch_id = %batch_id, "Batch saved");
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn query_batches(
        &self,
        group_id: &str,
        start: f64,
        end: f64,
    ) -> Result<Vec<Batch>, StorageError> {
        let conn = self.conn.clone();
        let group_id = group_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let entries = read_index(&conn, &group_id, Some((start, end)))?;
            load_bodies(&conn, &group_id, &entries)
        })
        .await
        .map_err(join_error)?
    }

    async fn get_last_analyzed_timestamp(&self, group_id: &str) -> Result<i64, StorageError> {
        let conn = self.conn.clone();
        let group_id = group_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let ts: Option<i64> = conn
                .query_row(
                    "SELECT last_message_timestamp FROM watermarks WHERE group_id = ?",
                    duckdb::params![group_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok::<i64, StorageError>(ts.unwrap_or(0))
        })
        .await
        .map_err(join_error)?
    }

    async fn update_last_analyzed_timestamp(
        &self,
        group_id: &str,
        timestamp: i64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let group_id = group_id.to_string();
        let updated_at = crate::batch::epoch_seconds(Utc::now());

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO watermarks (group_id, last_message_timestamp, updated_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT (group_id) DO UPDATE SET
                    last_message_timestamp = excluded.last_message_timestamp,
                    updated_at = excluded.updated_at",
                duckdb::params![group_id, timestamp, updated_at],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn cleanup_old_batches(&self, group_id: &str, before: f64) -> Result<usize, StorageError> {
        let conn = self.conn.clone();
        let group_id = group_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM batch_bodies
                 WHERE group_id = ? AND batch_id IN (
                    SELECT batch_id FROM batch_index WHERE group_id = ? AND timestamp < ?
                 )",
                duckdb::params![group_id, group_id, before],
            )?;
            let removed = tx.execute(
                "DELETE FROM batch_index WHERE group_id = ? AND timestamp < ?",
                duckdb::params![group_id, before],
            )?;

            tx.commit()?;
            if removed > 0 {
                tracing::info!(group_id = %group_id, removed, "Expired batches removed");
            }
            Ok::<usize, StorageError>(removed)
        })
        .await
        .map_err(join_error)?
    }

    async fn get_batch_count(&self, group_id: &str) -> Result<usize, StorageError> {
        let conn = self.conn.clone();
        let group_id = group_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM batch_index WHERE group_id = ?",
                duckdb::params![group_id],
                |row| row.get(0),
            )?;
            Ok::<usize, StorageError>(count as usize)
        })
        .await
        .map_err(join_error)?
    }

    async fn get_batch_index(&self, group_id: &str) -> Result<Vec<BatchIndexEntry>, StorageError> {
        let conn = self.conn.clone();
        let group_id = group_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            read_index(&conn, &group_id, None)
        })
        .await
        .map_err(join_error)?
    }

    async fn get_all_batch_summaries(
        &self,
        group_id: &str,
    ) -> Result<Vec<BatchSummary>, StorageError> {
        let conn = self.conn.clone();
        let group_id = group_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let entries = read_index(&conn, &group_id, None)?;
            let batches = load_bodies(&conn, &group_id, &entries)?;
            Ok::<Vec<BatchSummary>, StorageError>(batches.iter().map(Batch::summary).collect())
        })
        .await
        .map_err(join_error)?
    }
}
