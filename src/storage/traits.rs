use crate::batch::{Batch, BatchIndexEntry, BatchSummary};
use async_trait::async_trait;

/// Durable per-group batch storage.
///
/// Every group owns three pieces of state: an index of `{batch_id, timestamp}`
/// pointers, one body per batch, and a watermark holding the newest message
/// timestamp already folded into some batch. Groups never share state.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Persist the body and append to the group's index. Durable before return.
    async fn save_batch(&self, batch: &Batch) -> Result<(), StorageError>;

    /// Batches with `start <= timestamp <= end`, ascending by timestamp.
    /// Index entries whose body is missing or unreadable are skipped.
    async fn query_batches(
        &self,
        group_id: &str,
        start: f64,
        end: f64,
    ) -> Result<Vec<Batch>, StorageError>;

    /// Watermark for the group, `0` if nothing has been collected yet
    async fn get_last_analyzed_timestamp(&self, group_id: &str) -> Result<i64, StorageError>;

    async fn update_last_analyzed_timestamp(
        &self,
        group_id: &str,
        timestamp: i64,
    ) -> Result<(), StorageError>;

    /// Remove every batch older than `before`, returning how many were removed
    async fn cleanup_old_batches(&self, group_id: &str, before: f64) -> Result<usize, StorageError>;

    async fn get_batch_count(&self, group_id: &str) -> Result<usize, StorageError>;

    async fn get_batch_index(&self, group_id: &str) -> Result<Vec<BatchIndexEntry>, StorageError>;

    async fn get_all_batch_summaries(&self, group_id: &str)
        -> Result<Vec<BatchSummary>, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
