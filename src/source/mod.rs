pub mod jsonl;

use crate::config::types::{PlatformConfig, PlatformKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use jsonl::JsonlSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("source error: {0}")]
    Other(String),
}

/// A chat message as delivered by a platform adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, deserialize_with = "crate::batch::id_string")]
    pub message_id: String,

    #[serde(deserialize_with = "crate::batch::id_string")]
    pub sender_id: String,

    #[serde(default)]
    pub sender_name: String,

    /// Group-specific nickname, preferred over `sender_name` when set
    #[serde(default)]
    pub sender_card: String,

    #[serde(default, deserialize_with = "crate::batch::id_string")]
    pub group_id: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub segments: Vec<Segment>,

    /// Epoch seconds
    pub timestamp: i64,

    #[serde(default)]
    pub reply_to: Option<String>,
}

impl Message {
    pub fn display_name(&self) -> &str {
        if !self.sender_card.trim().is_empty() {
            &self.sender_card
        } else if !self.sender_name.trim().is_empty() {
            &self.sender_name
        } else {
            &self.sender_id
        }
    }

    pub fn emojis(&self) -> impl Iterator<Item = (&str, EmojiKind)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Emoji { id, kind } => Some((id.as_str(), *kind)),
            _ => None,
        })
    }

    pub fn char_count(&self) -> u64 {
        self.text.chars().count() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text {
        text: String,
    },
    Emoji {
        #[serde(default, deserialize_with = "crate::batch::id_string")]
        id: String,
        #[serde(default)]
        kind: EmojiKind,
    },
    Image {
        #[serde(default)]
        url: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmojiKind {
    #[default]
    Face,
    MarketFace,
    BigFace,
    SmallFace,
    #[serde(other)]
    Other,
}

impl EmojiKind {
    /// Counter key used in batch emoji statistics
    pub fn stat_key(self) -> &'static str {
        match self {
            EmojiKind::Face => "face_count",
            EmojiKind::MarketFace => "mface_count",
            EmojiKind::BigFace => "bface_count",
            EmojiKind::SmallFace => "sface_count",
            EmojiKind::Other => "other_emoji_count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchWindow {
    /// Messages strictly newer than the given epoch second
    Since(i64),
    /// Messages from the trailing N days
    LastDays(u32),
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<String>, SourceError>;

    /// Messages ascending by timestamp. When more than `max_count` match,
    /// the newest `max_count` are kept.
    async fn fetch_messages(
        &self,
        group_id: &str,
        window: FetchWindow,
        max_count: usize,
    ) -> Result<Vec<Message>, SourceError>;
}

/// Message sources keyed by platform id
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn MessageSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(platforms: &HashMap<String, PlatformConfig>) -> Self {
        let mut registry = Self::new();
        for (platform_id, platform) in platforms {
            registry.register(platform_id.clone(), build_source(platform));
        }
        registry
    }

    pub fn register(&mut self, platform_id: impl Into<String>, source: Arc<dyn MessageSource>) {
        self.sources.insert(platform_id.into(), source);
    }

    pub fn get(&self, platform_id: &str) -> Option<Arc<dyn MessageSource>> {
        self.sources.get(platform_id).cloned()
    }

    pub fn contains(&self, platform_id: &str) -> bool {
        self.sources.contains_key(platform_id)
    }

    pub fn platform_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }
}

pub fn build_source(platform: &PlatformConfig) -> Arc<dyn MessageSource> {
    match platform.kind {
        PlatformKind::Jsonl => Arc::new(JsonlSource::new(platform.path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_deserialization() {
        let msg: Message = serde_json::from_str(
            r#"{
                "message_id": 1,
                "sender_id": 10001,
                "sender_name": "alice",
                "text": "hi",
                "timestamp": 1700000000,
                "segments": [
                    {"type": "text", "text": "hi"},
                    {"type": "emoji", "id": 14, "kind": "market_face"},
                    {"type": "at", "target": "10002"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(msg.sender_id, "10001");
        assert_eq!(msg.message_id, "1");
        assert_eq!(msg.segments.len(), 3);
        assert_eq!(msg.segments[2], Segment::Other);

        let emojis: Vec<_> = msg.emojis().collect();
        assert_eq!(emojis, vec![("14", EmojiKind::MarketFace)]);
    }

    #[test]
    fn test_display_name_preference() {
        let mut msg: Message =
            serde_json::from_str(r#"{"sender_id": "u1", "timestamp": 0}"#).unwrap();
        assert_eq!(msg.display_name(), "u1");
        msg.sender_name = "name".to_string();
        assert_eq!(msg.display_name(), "name");
        msg.sender_card = "card".to_string();
        assert_eq!(msg.display_name(), "card");
    }
}
