pub mod http;
pub mod prompt;

use crate::batch::{Quote, TokenUsage, Topic, UserTitle};
use crate::config::types::{BackendConfig, BackendKind};
use crate::stats::UserRank;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use http::HttpBackend;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not parse backend reply: {0}")]
    Parse(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limiter closed")]
    LimiterClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionKind {
    Topics,
    Quotes,
    Titles,
}

impl ExtractionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionKind::Topics => "topics",
            ExtractionKind::Quotes => "quotes",
            ExtractionKind::Titles => "titles",
        }
    }
}

impl fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionInput {
    /// Chat lines formatted by [`prompt::transcript`]
    Transcript(String),
    /// Ranked participants, for title assignment
    Users(Vec<UserRank>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub kind: ExtractionKind,
    pub input: ExtractionInput,
    pub max_items: usize,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedItems {
    Topics(Vec<Topic>),
    Quotes(Vec<Quote>),
    Titles(Vec<UserTitle>),
}

impl ExtractedItems {
    pub fn len(&self) -> usize {
        match self {
            ExtractedItems::Topics(items) => items.len(),
            ExtractedItems::Quotes(items) => items.len(),
            ExtractedItems::Titles(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResponse {
    pub items: ExtractedItems,
    pub token_usage: TokenUsage,
}

impl ExtractionResponse {
    pub fn into_topics(self) -> Vec<Topic> {
        match self.items {
            ExtractedItems::Topics(items) => items,
            _ => Vec::new(),
        }
    }

    pub fn into_quotes(self) -> Vec<Quote> {
        match self.items {
            ExtractedItems::Quotes(items) => items,
            _ => Vec::new(),
        }
    }

    pub fn into_titles(self) -> Vec<UserTitle> {
        match self.items {
            ExtractedItems::Titles(items) => items,
            _ => Vec::new(),
        }
    }
}

/// A semantic extraction service (usually an LLM endpoint).
///
/// Only ever called through the resilience layer.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest)
        -> Result<ExtractionResponse, ExtractionError>;
}

pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn ExtractionBackend>, ExtractionError> {
    match config.kind {
        BackendKind::Http => Ok(Arc::new(HttpBackend::new(config)?)),
    }
}
