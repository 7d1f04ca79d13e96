use super::similarity::{is_duplicate_quote, is_duplicate_topic};
use crate::batch::{Batch, EmojiValue, Quote, TokenUsage, Topic, UserStats};
use crate::stats::{self, HourActivity, UserRank};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory fold of every batch in a window. Built fresh per merge, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateState {
    pub window_start: f64,
    pub window_end: f64,
    pub batch_count: usize,

    pub message_count: u64,
    pub character_count: u64,
    pub token_usage: TokenUsage,

    pub hourly_message_counts: BTreeMap<String, u64>,
    pub hourly_character_counts: BTreeMap<String, u64>,
    pub user_stats: BTreeMap<String, UserStats>,
    pub emoji_stats: BTreeMap<String, EmojiValue>,

    pub topics: Vec<Topic>,
    pub quotes: Vec<Quote>,

    pub participant_ids: BTreeSet<String>,
    pub last_message_timestamp: i64,
}

/// Read-only status view of a group's current window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub window_label: String,
    pub total_analyses: usize,
    pub total_messages: u64,
    pub topics_count: usize,
    pub quotes_count: usize,
    pub participants: usize,
    pub peak_hours: Vec<HourActivity>,
}

/// Fold `batches` into one aggregate.
///
/// Batches must already be ascending by timestamp: they are folded in the given
/// order, and topic/quote deduplication keeps whichever near-duplicate it sees
/// first. Counters do not depend on order.
pub fn merge_batches(batches: &[Batch], window_start: f64, window_end: f64) -> AggregateState {
    let mut state = AggregateState {
        window_start,
        window_end,
        batch_count: batches.len(),
        ..Default::default()
    };

    for batch in batches {
        state.fold(batch);
    }

    tracing::debug!(
        batches = state.batch_count,
        messages = state.message_count,
        topics = state.topics.len(),
        quotes = state.quotes.len(),
        "Merged window"
    );
    state
}

fn add_counts(into: &mut BTreeMap<String, u64>, from: &BTreeMap<String, u64>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_insert(0) += count;
    }
}

fn merge_user(into: &mut UserStats, from: &UserStats) {
    into.message_count += from.message_count;
    into.char_count += from.char_count;
    into.emoji_count += from.emoji_count;
    into.reply_count += from.reply_count;

    for (hour, count) in from.hour_counts() {
        *into.hours.entry(hour).or_insert(0) += count;
    }

    into.last_message_time = into.last_message_time.max(from.last_message_time);
    if !from.display_name.is_empty() {
        into.display_name = from.display_name.clone();
    }
}

impl AggregateState {
    fn fold(&mut self, batch: &Batch) {
        self.message_count += batch.message_count;
        self.character_count += batch.character_count;

        add_counts(&mut self.hourly_message_counts, &batch.hourly_message_counts);
        add_counts(&mut self.hourly_character_counts, &batch.hourly_character_counts);

        for (user_id, stats) in &batch.user_stats {
            merge_user(self.user_stats.entry(user_id.clone()).or_default(), stats);
        }

        for (key, value) in &batch.emoji_stats {
            match self.emoji_stats.get_mut(key) {
                Some(existing) => {
                    if !existing.merge_from(value) {
                        tracing::debug!(
                            batch_id = %batch.batch_id,
                            key = %key,
                            "Emoji counter shape mismatch, ignoring"
                        );
                    }
                }
                None => {
                    self.emoji_stats.insert(key.clone(), value.clone());
                }
            }
        }

        for topic in &batch.topics {
            if !is_duplicate_topic(topic, &self.topics) {
                self.topics.push(topic.clone());
            }
        }
        for quote in &batch.quotes {
            if !is_duplicate_quote(quote, &self.quotes) {
                self.quotes.push(quote.clone());
            }
        }

        self.token_usage.accumulate(&batch.token_usage);
        self.participant_ids.extend(batch.participant_ids.iter().cloned());
        self.last_message_timestamp = self.last_message_timestamp.max(batch.last_message_timestamp);
    }

    pub fn is_empty(&self) -> bool {
        self.batch_count == 0
    }

    pub fn hourly_activity(&self) -> Vec<HourActivity> {
        stats::hourly_table(&self.hourly_message_counts, &self.hourly_character_counts)
    }

    pub fn peak_hours(&self, n: usize) -> Vec<HourActivity> {
        stats::peak_hours(&self.hourly_activity(), n)
    }

    pub fn most_active_period(&self) -> Option<String> {
        stats::most_active_period(&self.hourly_activity())
    }

    pub fn user_ranking(&self, n: usize) -> Vec<UserRank> {
        stats::rank_users(&self.user_stats, n)
    }

    /// `YYYY-MM-DD` when the window sits in one local day, otherwise `start ~ end`
    pub fn window_label(&self, tz: &FixedOffset) -> String {
        window_label(self.window_start, self.window_end, tz)
    }

    pub fn summary(&self, tz: &FixedOffset) -> WindowSummary {
        WindowSummary {
            window_label: self.window_label(tz),
            total_analyses: self.batch_count,
            total_messages: self.message_count,
            topics_count: self.topics.len(),
            quotes_count: self.quotes.len(),
            participants: self.participant_ids.len(),
            peak_hours: self.peak_hours(3),
        }
    }
}

pub fn window_label(start: f64, end: f64, tz: &FixedOffset) -> String {
    let day = |ts: f64| {
        DateTime::from_timestamp(ts.floor() as i64, 0)
            .map(|utc| utc.with_timezone(tz).format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "?".to_string())
    };
    let (first, last) = (day(start), day(end));
    if first == last {
        first
    } else {
        format!("{} ~ {}", first, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(ts: f64, messages: u64, topics: &[&str], participants: &[&str]) -> Batch {
        let mut batch = Batch::with_timestamp("g1", ts);
        batch.message_count = messages;
        batch.character_count = messages * 10;
        batch.hourly_message_counts.insert("10".to_string(), messages);
        batch.topics = topics
            .iter()
            .map(|name| Topic {
                name: name.to_string(),
                ..Default::default()
            })
            .collect();
        batch.participant_ids = participants.iter().map(|p| p.to_string()).collect();
        batch.token_usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        };
        batch.last_message_timestamp = ts as i64 - 5;
        batch
    }

    #[test]
    fn test_merge_is_deterministic() {
        let batches = vec![
            batch(100.0, 5, &["部署流程", "午饭吃什么"], &["a", "b"]),
            batch(200.0, 7, &["部署的流程", "周末爬山"], &["b", "c"]),
        ];
        let first = merge_batches(&batches, 0.0, 300.0);
        let second = merge_batches(&batches, 0.0, 300.0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_counts_are_order_independent() {
        let a = batch(100.0, 5, &["alpha"], &["a", "b"]);
        let b = batch(200.0, 7, &["beta"], &["b", "c"]);
        let c = batch(300.0, 2, &[], &["d"]);

        let forward = merge_batches(&[a.clone(), b.clone(), c.clone()], 0.0, 400.0);
        let reversed = merge_batches(&[c, b, a], 0.0, 400.0);

        assert_eq!(forward.message_count, 14);
        assert_eq!(forward.message_count, reversed.message_count);
        assert_eq!(forward.character_count, reversed.character_count);
        assert_eq!(forward.token_usage, reversed.token_usage);
        assert_eq!(forward.token_usage.total_tokens, 360);
        assert_eq!(forward.participant_ids, reversed.participant_ids);
        assert_eq!(forward.participant_ids.len(), 4);
        assert_eq!(forward.hourly_message_counts.get("10"), Some(&14));
        assert_eq!(forward.last_message_timestamp, 295);
        assert_eq!(forward.batch_count, 3);
    }

    #[test]
    fn test_topic_dedup_keeps_first_accepted() {
        let a = batch(100.0, 1, &["服务器迁移讨论"], &[]);
        let b = batch(200.0, 1, &["服务器迁移的讨论"], &[]);

        let forward = merge_batches(&[a.clone(), b.clone()], 0.0, 300.0);
        assert_eq!(forward.topics.len(), 1);
        assert_eq!(forward.topics[0].name, "服务器迁移讨论");

        let reversed = merge_batches(&[b, a], 0.0, 300.0);
        assert_eq!(reversed.topics.len(), 1);
        assert_eq!(reversed.topics[0].name, "服务器迁移的讨论");
    }

    #[test]
    fn test_quote_dedup() {
        let mut a = batch(100.0, 1, &[], &[]);
        a.quotes.push(Quote {
            content: "代码能跑就别动".to_string(),
            sender: "a".to_string(),
            ..Default::default()
        });
        let mut b = batch(200.0, 1, &[], &[]);
        b.quotes.push(Quote {
            content: "代码能跑就别乱动".to_string(),
            sender: "b".to_string(),
            ..Default::default()
        });
        b.quotes.push(Quote {
            content: "今天天气真好".to_string(),
            sender: "c".to_string(),
            ..Default::default()
        });

        let merged = merge_batches(&[a, b], 0.0, 300.0);
        let senders: Vec<&str> = merged.quotes.iter().map(|q| q.sender.as_str()).collect();
        assert_eq!(senders, vec!["a", "c"]);
    }

    #[test]
    fn test_user_merge_with_legacy_hours() {
        let mut old: Batch = serde_json::from_value(serde_json::json!({
            "group_id": "g1",
            "batch_id": "old",
            "timestamp": 100.0,
            "user_stats": {
                "u1": {"nickname": "Old Name", "message_count": 2, "active_hours": [9, 9], "last_message_time": 90}
            }
        }))
        .unwrap();
        old.message_count = 2;

        let mut new = Batch::with_timestamp("g1", 200.0);
        new.user_stats.insert(
            "u1".to_string(),
            UserStats {
                display_name: "New Name".to_string(),
                message_count: 3,
                hours: BTreeMap::from([(9, 1), (10, 2)]),
                last_message_time: 190,
                ..Default::default()
            },
        );
        let mut anonymous = Batch::with_timestamp("g1", 300.0);
        anonymous.user_stats.insert(
            "u1".to_string(),
            UserStats {
                message_count: 1,
                last_message_time: 150,
                ..Default::default()
            },
        );

        let merged = merge_batches(&[old, new, anonymous], 0.0, 400.0);
        let user = &merged.user_stats["u1"];
        assert_eq!(user.message_count, 6);
        assert_eq!(user.hours.get(&9), Some(&3));
        assert_eq!(user.hours.get(&10), Some(&2));
        assert_eq!(user.last_message_time, 190);
        assert_eq!(user.display_name, "New Name");
    }

    #[test]
    fn test_emoji_merge() {
        let mut a = Batch::with_timestamp("g1", 100.0);
        a.emoji_stats.insert("face_count".to_string(), EmojiValue::Count(2));
        a.emoji_stats.insert(
            "face_details".to_string(),
            EmojiValue::Breakdown(BTreeMap::from([("14".to_string(), 2)])),
        );
        let mut b = Batch::with_timestamp("g1", 200.0);
        b.emoji_stats.insert("face_count".to_string(), EmojiValue::Count(3));
        b.emoji_stats.insert(
            "face_details".to_string(),
            EmojiValue::Breakdown(BTreeMap::from([("14".to_string(), 1), ("76".to_string(), 2)])),
        );
        b.emoji_stats.insert("mface_count".to_string(), EmojiValue::Count(1));
        let mut c = Batch::with_timestamp("g1", 300.0);
        c.emoji_stats.insert("face_details".to_string(), EmojiValue::Count(9));

        let merged = merge_batches(&[a, b, c], 0.0, 400.0);
        assert_eq!(merged.emoji_stats["face_count"], EmojiValue::Count(5));
        assert_eq!(merged.emoji_stats["mface_count"], EmojiValue::Count(1));
        assert_eq!(
            merged.emoji_stats["face_details"],
            EmojiValue::Breakdown(BTreeMap::from([("14".to_string(), 3), ("76".to_string(), 2)]))
        );
    }

    #[test]
    fn test_empty_merge_and_summary() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let merged = merge_batches(&[], 1_700_000_000.0, 1_700_050_000.0);
        assert!(merged.is_empty());

        let summary = merged.summary(&utc);
        assert_eq!(summary.total_analyses, 0);
        assert!(summary.peak_hours.is_empty());
        assert_eq!(summary.window_label, "2023-11-14 ~ 2023-11-15");
    }

    #[test]
    fn test_window_label_single_day() {
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(window_label(1_700_000_000.0, 1_700_003_000.0, &utc), "2023-11-14");
    }
}
