pub mod file;

use crate::batch::{EmojiValue, Quote, TokenUsage, Topic, UserTitle};
use crate::stats::{HourActivity, UserRank};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use file::FileReportSink;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

/// Which path produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    Incremental,
    Traditional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub message_count: u64,
    pub character_count: u64,
    pub participant_count: usize,
    pub most_active_period: Option<String>,
    pub hourly_activity: Vec<HourActivity>,
    pub peak_hours: Vec<HourActivity>,
    pub user_ranking: Vec<UserRank>,
    pub emoji_stats: BTreeMap<String, EmojiValue>,
    pub token_usage: TokenUsage,
    /// Number of batches merged; zero for traditional reports
    pub batch_count: usize,
}

/// Everything a renderer needs to present one group's digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub group_id: String,
    pub platform_id: String,
    pub mode: ReportMode,
    pub window_label: String,
    /// Epoch seconds
    pub generated_at: i64,
    pub statistics: ReportStatistics,
    pub topics: Vec<Topic>,
    pub quotes: Vec<Quote>,
    pub user_titles: Vec<UserTitle>,
}

/// Destination for finished reports. Rendering and delivery to the chat
/// platform live behind this trait.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn dispatch(
        &self,
        payload: &ReportPayload,
        group_id: &str,
        platform_id: &str,
    ) -> Result<(), ReportError>;
}
