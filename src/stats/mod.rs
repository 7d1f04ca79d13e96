//! Local statistics computed from cleaned messages before any extraction call.

pub mod projection;

use crate::batch::{EmojiValue, UserStats};
use crate::source::{EmojiKind, Message};
use chrono::{DateTime, FixedOffset, Timelike};
use std::collections::{BTreeMap, BTreeSet};

pub use projection::{hourly_table, most_active_period, peak_hours, rank_users, HourActivity, UserRank};

/// Counters for one slice of messages, ready to be copied into a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub message_count: u64,
    pub character_count: u64,
    pub hourly_message_counts: BTreeMap<String, u64>,
    pub hourly_character_counts: BTreeMap<String, u64>,
    pub user_stats: BTreeMap<String, UserStats>,
    pub emoji_stats: BTreeMap<String, EmojiValue>,
    pub participant_ids: BTreeSet<String>,
    pub last_message_timestamp: i64,
}

/// Drop bot output, command invocations and messages with nothing to analyse
pub fn clean_messages(
    messages: Vec<Message>,
    bot_ids: &[String],
    command_prefixes: &[String],
) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|msg| !bot_ids.iter().any(|id| id == &msg.sender_id))
        .filter(|msg| {
            let text = msg.text.trim_start();
            !command_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && text.starts_with(prefix.as_str()))
        })
        .filter(|msg| !msg.text.trim().is_empty() || msg.emojis().next().is_some())
        .collect()
}

pub fn local_hour(timestamp: i64, tz: &FixedOffset) -> Option<u8> {
    DateTime::from_timestamp(timestamp, 0).map(|utc| utc.with_timezone(tz).hour() as u8)
}

pub fn compute_batch_stats(messages: &[Message], tz: &FixedOffset) -> BatchStats {
    let mut stats = BatchStats::default();
    let mut face_details: BTreeMap<String, u64> = BTreeMap::new();
    let mut emoji_counts: BTreeMap<&'static str, u64> = [
        EmojiKind::Face,
        EmojiKind::MarketFace,
        EmojiKind::BigFace,
        EmojiKind::SmallFace,
        EmojiKind::Other,
    ]
    .into_iter()
    .map(|kind| (kind.stat_key(), 0))
    .collect();

    for msg in messages {
        let chars = msg.char_count();
        stats.message_count += 1;
        stats.character_count += chars;
        stats.participant_ids.insert(msg.sender_id.clone());
        stats.last_message_timestamp = stats.last_message_timestamp.max(msg.timestamp);

        let hour = local_hour(msg.timestamp, tz);
        if let Some(hour) = hour {
            let key = hour.to_string();
            *stats.hourly_message_counts.entry(key.clone()).or_insert(0) += 1;
            *stats.hourly_character_counts.entry(key).or_insert(0) += chars;
        }

        let mut emoji_in_msg = 0;
        for (id, kind) in msg.emojis() {
            emoji_in_msg += 1;
            *emoji_counts.entry(kind.stat_key()).or_insert(0) += 1;
            if kind == EmojiKind::Face {
                *face_details.entry(id.to_string()).or_insert(0) += 1;
            }
        }

        let user = stats.user_stats.entry(msg.sender_id.clone()).or_default();
        user.display_name = msg.display_name().to_string();
        user.message_count += 1;
        user.char_count += chars;
        user.emoji_count += emoji_in_msg;
        if msg.reply_to.is_some() {
            user.reply_count += 1;
        }
        if let Some(hour) = hour {
            *user.hours.entry(hour).or_insert(0) += 1;
        }
        user.last_message_time = user.last_message_time.max(msg.timestamp);
    }

    for (key, count) in emoji_counts {
        stats.emoji_stats.insert(key.to_string(), EmojiValue::Count(count));
    }
    stats
        .emoji_stats
        .insert("face_details".to_string(), EmojiValue::Breakdown(face_details));
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Segment;

    fn msg(sender: &str, ts: i64, text: &str) -> Message {
        Message {
            message_id: format!("{}-{}", sender, ts),
            sender_id: sender.to_string(),
            sender_name: format!("{}-name", sender),
            sender_card: String::new(),
            group_id: "g1".to_string(),
            text: text.to_string(),
            segments: Vec::new(),
            timestamp: ts,
            reply_to: None,
        }
    }

    #[test]
    fn test_clean_messages() {
        let mut emoji_only = msg("u2", 4, "");
        emoji_only.segments.push(Segment::Emoji {
            id: "14".to_string(),
            kind: EmojiKind::Face,
        });

        let cleaned = clean_messages(
            vec![
                msg("bot", 1, "I am a bot"),
                msg("u1", 2, "/help"),
                msg("u1", 3, "   "),
                emoji_only,
                msg("u1", 5, "hello"),
            ],
            &["bot".to_string()],
            &["/".to_string()],
        );

        let stamps: Vec<i64> = cleaned.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![4, 5]);
    }

    #[test]
    fn test_compute_batch_stats() {
        let utc = FixedOffset::east_opt(0).unwrap();
        // 1700000000 is 22:13:20 UTC
        let mut reply = msg("u2", 1_700_000_100, "ok");
        reply.reply_to = Some("u1-1700000000".to_string());
        reply.segments = vec![
            Segment::Emoji {
                id: "14".to_string(),
                kind: EmojiKind::Face,
            },
            Segment::Emoji {
                id: "9".to_string(),
                kind: EmojiKind::MarketFace,
            },
        ];
        let messages = vec![msg("u1", 1_700_000_000, "hello"), reply, msg("u1", 1_700_004_000, "晚安")];

        let stats = compute_batch_stats(&messages, &utc);
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.character_count, 9);
        assert_eq!(stats.hourly_message_counts.get("22"), Some(&2));
        assert_eq!(stats.hourly_message_counts.get("23"), Some(&1));
        assert_eq!(stats.hourly_character_counts.get("23"), Some(&2));
        assert_eq!(stats.last_message_timestamp, 1_700_004_000);
        assert_eq!(stats.participant_ids.len(), 2);

        let u1 = &stats.user_stats["u1"];
        assert_eq!(u1.message_count, 2);
        assert_eq!(u1.hours.get(&22), Some(&1));
        assert_eq!(u1.last_message_time, 1_700_004_000);

        let u2 = &stats.user_stats["u2"];
        assert_eq!(u2.reply_count, 1);
        assert_eq!(u2.emoji_count, 2);
        assert_eq!(u2.display_name, "u2-name");

        assert_eq!(stats.emoji_stats["face_count"], EmojiValue::Count(1));
        assert_eq!(stats.emoji_stats["mface_count"], EmojiValue::Count(1));
        assert_eq!(
            stats.emoji_stats["face_details"],
            EmojiValue::Breakdown(BTreeMap::from([("14".to_string(), 1)]))
        );
    }

    #[test]
    fn test_timezone_shifts_hour_buckets() {
        let east8 = FixedOffset::east_opt(8 * 3600).unwrap();
        let stats = compute_batch_stats(&[msg("u1", 1_700_000_000, "x")], &east8);
        assert_eq!(stats.hourly_message_counts.get("6"), Some(&1));
    }
}
