use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Emoji counter value: most categories are plain counts, some (such as
/// `face_details`) carry a per-id breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmojiValue {
    Count(u64),
    Breakdown(BTreeMap<String, u64>),
}

impl EmojiValue {
    pub fn as_count(&self) -> Option<u64> {
        match self {
            EmojiValue::Count(n) => Some(*n),
            EmojiValue::Breakdown(_) => None,
        }
    }

    /// Fold `other` into `self`. Returns false (and leaves `self` untouched) when
    /// one side is a breakdown and the other a plain count.
    pub fn merge_from(&mut self, other: &EmojiValue) -> bool {
        match (self, other) {
            (EmojiValue::Count(total), EmojiValue::Count(n)) => {
                *total += n;
                true
            }
            (EmojiValue::Breakdown(total), EmojiValue::Breakdown(detail)) => {
                for (key, n) in detail {
                    *total.entry(key.clone()).or_insert(0) += n;
                }
                true
            }
            _ => false,
        }
    }
}
