use crate::batch::UserStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the 24-hour activity table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourActivity {
    pub hour: u8,
    pub message_count: u64,
    pub character_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRank {
    pub user_id: String,
    pub display_name: String,
    pub message_count: u64,
    pub char_count: u64,
    pub avg_chars: f64,
    pub emoji_ratio: f64,
    /// Share of messages sent between 00:00 and 06:00
    pub night_ratio: f64,
    pub reply_ratio: f64,
}

impl UserRank {
    fn from_stats(user_id: &str, stats: &UserStats) -> Self {
        let ratio = |n: u64| {
            if stats.message_count == 0 {
                0.0
            } else {
                n as f64 / stats.message_count as f64
            }
        };
        let hours = stats.hour_counts();
        let night: u64 = (0..6).filter_map(|h| hours.get(&h)).sum();

        Self {
            user_id: user_id.to_string(),
            display_name: if stats.display_name.is_empty() {
                user_id.to_string()
            } else {
                stats.display_name.clone()
            },
            message_count: stats.message_count,
            char_count: stats.char_count,
            avg_chars: round_to(ratio(stats.char_count), 1),
            emoji_ratio: round_to(ratio(stats.emoji_count), 2),
            night_ratio: round_to(ratio(night), 2),
            reply_ratio: round_to(ratio(stats.reply_count), 2),
        }
    }
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

fn hour_of(key: &str) -> Option<u8> {
    key.trim().parse::<u8>().ok().filter(|h| *h < 24)
}

/// Expand string-keyed hourly maps into a full table, zero-filling missing hours
pub fn hourly_table(
    messages: &BTreeMap<String, u64>,
    characters: &BTreeMap<String, u64>,
) -> Vec<HourActivity> {
    let mut table: Vec<HourActivity> = (0..24)
        .map(|hour| HourActivity {
            hour,
            message_count: 0,
            character_count: 0,
        })
        .collect();

    for (key, count) in messages {
        if let Some(hour) = hour_of(key) {
            table[hour as usize].message_count += count;
        }
    }
    for (key, count) in characters {
        if let Some(hour) = hour_of(key) {
            table[hour as usize].character_count += count;
        }
    }
    table
}

/// Busiest hours first; ties go to the earlier hour. Idle hours are never peaks.
pub fn peak_hours(table: &[HourActivity], n: usize) -> Vec<HourActivity> {
    let mut busy: Vec<HourActivity> = table
        .iter()
        .copied()
        .filter(|row| row.message_count > 0)
        .collect();
    busy.sort_by(|a, b| {
        b.message_count
            .cmp(&a.message_count)
            .then(a.hour.cmp(&b.hour))
    });
    busy.truncate(n);
    busy
}

/// `"HH:00-HH:00"` span of the single busiest hour
pub fn most_active_period(table: &[HourActivity]) -> Option<String> {
    peak_hours(table, 1)
        .first()
        .map(|row| format!("{:02}:00-{:02}:00", row.hour, row.hour + 1))
}

/// Users ordered by message count, ties broken by user id
pub fn rank_users(users: &BTreeMap<String, UserStats>, n: usize) -> Vec<UserRank> {
    let mut ranked: Vec<(&String, &UserStats)> = users.iter().collect();
    ranked.sort_by(|(id_a, a), (id_b, b)| {
        b.message_count
            .cmp(&a.message_count)
            .then_with(|| id_a.cmp(id_b))
    });
    ranked
        .into_iter()
        .take(n)
        .map(|(id, stats)| UserRank::from_stats(id, stats))
        .collect()
}
