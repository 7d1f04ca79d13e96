pub mod emoji;
pub mod user;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use emoji::EmojiValue;
pub use user::UserStats;

/// One immutable record of statistics and extracted artifacts covering a
/// disjoint slice of a group's message history.
///
/// Field names on the wire follow the persisted schema; batches written by one
/// version of the service must stay readable by another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub group_id: String,

    /// Unique batch token (UUID v4)
    #[serde(default)]
    pub batch_id: String,

    /// Creation time, epoch seconds
    #[serde(default)]
    pub timestamp: f64,

    #[serde(default, rename = "messages_count")]
    pub message_count: u64,

    #[serde(default, rename = "characters_count")]
    pub character_count: u64,

    /// Hour of day ("0".."23") -> message count
    #[serde(default, rename = "hourly_msg_counts")]
    pub hourly_message_counts: BTreeMap<String, u64>,

    /// Hour of day ("0".."23") -> character count
    #[serde(default, rename = "hourly_char_counts")]
    pub hourly_character_counts: BTreeMap<String, u64>,

    #[serde(default)]
    pub user_stats: BTreeMap<String, UserStats>,

    #[serde(default)]
    pub emoji_stats: BTreeMap<String, EmojiValue>,

    #[serde(default)]
    pub topics: Vec<Topic>,

    #[serde(default, rename = "golden_quotes")]
    pub quotes: Vec<Quote>,

    #[serde(default)]
    pub token_usage: TokenUsage,

    /// Newest message timestamp folded into this batch (epoch seconds)
    #[serde(default)]
    pub last_message_timestamp: i64,

    #[serde(default)]
    pub participant_ids: Vec<String>,
}

impl Batch {
    /// Create an empty batch for a group, stamped with a fresh id and the current time
    pub fn new(group_id: impl Into<String>) -> Self {
        Self::with_timestamp(group_id, epoch_seconds(Utc::now()))
    }

    pub fn with_timestamp(group_id: impl Into<String>, timestamp: f64) -> Self {
        Self {
            group_id: group_id.into(),
            batch_id: Uuid::new_v4().to_string(),
            timestamp,
            message_count: 0,
            character_count: 0,
            hourly_message_counts: BTreeMap::new(),
            hourly_character_counts: BTreeMap::new(),
            user_stats: BTreeMap::new(),
            emoji_stats: BTreeMap::new(),
            topics: Vec::new(),
            quotes: Vec::new(),
            token_usage: TokenUsage::default(),
            last_message_timestamp: 0,
            participant_ids: Vec::new(),
        }
    }

    pub fn index_entry(&self) -> BatchIndexEntry {
        BatchIndexEntry {
            batch_id: self.batch_id.clone(),
            timestamp: self.timestamp,
        }
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id.chars().take(8).collect(),
            timestamp: self.timestamp,
            message_count: self.message_count,
            topics_count: self.topics.len(),
            quotes_count: self.quotes.len(),
            participants: self.participant_ids.len(),
        }
    }
}

/// Pointer into a group's batch index; lets range scans skip loading bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchIndexEntry {
    pub batch_id: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub timestamp: f64,
    pub message_count: u64,
    pub topics_count: usize,
    pub quotes_count: usize,
    pub participants: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default, rename = "topic")]
    pub name: String,

    #[serde(default, deserialize_with = "id_list")]
    pub contributor_ids: Vec<String>,

    #[serde(default, rename = "contributors")]
    pub contributor_names: Vec<String>,

    #[serde(default, rename = "detail")]
    pub detail_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, deserialize_with = "id_string")]
    pub user_id: String,
}

/// Title assigned to a top participant during final-report enrichment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserTitle {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "qq", deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub mbti: String,
    #[serde(default)]
    pub reason: String,
}

pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Platform ids arrive as either strings or numbers depending on the exporter
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Str(String),
    Int(i64),
    Float(f64),
}

impl IdRepr {
    fn into_string(self) -> String {
        match self {
            IdRepr::Str(s) => s,
            IdRepr::Int(i) => i.to_string(),
            IdRepr::Float(f) => f.to_string(),
        }
    }
}

pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(IdRepr::deserialize(deserializer)?.into_string())
}

fn id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = Vec::<IdRepr>::deserialize(deserializer)?;
    Ok(ids.into_iter().map(IdRepr::into_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_wire_field_names() {
        let mut batch = Batch::with_timestamp("g1", 1700000000.5);
        batch.message_count = 3;
        batch.quotes.push(Quote {
            content: "hello".to_string(),
            ..Default::default()
        });
        batch.hourly_message_counts.insert("13".to_string(), 3);

        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["messages_count"], 3);
        assert_eq!(value["hourly_msg_counts"]["13"], 3);
        assert_eq!(value["golden_quotes"][0]["content"], "hello");
        assert!(value.get("message_count").is_none());
    }

    #[test]
    fn test_batch_deserializes_with_missing_fields() {
        let batch: Batch = serde_json::from_str(r#"{"group_id": "g1", "batch_id": "abc"}"#).unwrap();
        assert_eq!(batch.group_id, "g1");
        assert_eq!(batch.message_count, 0);
        assert!(batch.topics.is_empty());
        assert_eq!(batch.token_usage, TokenUsage::default());
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let quote: Quote =
            serde_json::from_str(r#"{"content": "x", "sender": "a", "user_id": 12345}"#).unwrap();
        assert_eq!(quote.user_id, "12345");

        let topic: Topic =
            serde_json::from_str(r#"{"topic": "t", "contributor_ids": [1, "2"]}"#).unwrap();
        assert_eq!(topic.contributor_ids, vec!["1", "2"]);
    }

    #[test]
    fn test_summary_truncates_batch_id() {
        let batch = Batch::new("g1");
        let summary = batch.summary();
        assert_eq!(summary.batch_id.len(), 8);
        assert!(batch.batch_id.starts_with(&summary.batch_id));
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.accumulate(&TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });
        assert_eq!(total.total_tokens, 18);
        assert_eq!(total.prompt_tokens, 11);
    }
}
