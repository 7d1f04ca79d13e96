use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Per-user activity inside one batch (or folded across a window)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    #[serde(default, rename = "nickname", alias = "name")]
    pub display_name: String,

    #[serde(default)]
    pub message_count: u64,

    #[serde(default)]
    pub char_count: u64,

    #[serde(default)]
    pub emoji_count: u64,

    #[serde(default)]
    pub reply_count: u64,

    /// Hour of day -> message count
    #[serde(default, deserialize_with = "deserialize_hours")]
    pub hours: BTreeMap<u8, u64>,

    /// Older batches only recorded which hours a user was active in
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "deserialize_hour_list")]
    pub active_hours: Vec<u8>,

    #[serde(default)]
    pub last_message_time: i64,
}

impl UserStats {
    /// Hour activity with the legacy `active_hours` list folded in as one per occurrence
    pub fn hour_counts(&self) -> BTreeMap<u8, u64> {
        let mut counts = self.hours.clone();
        for hour in &self.active_hours {
            *counts.entry(*hour).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HourKey {
    Int(u64),
    Str(String),
}

impl HourKey {
    fn to_hour(&self) -> Option<u8> {
        let hour = match self {
            HourKey::Int(h) => *h,
            HourKey::Str(s) => s.trim().parse().ok()?,
        };
        (hour < 24).then_some(hour as u8)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HoursRepr {
    Map(BTreeMap<String, u64>),
    List(Vec<HourKey>),
}

fn deserialize_hours<'de, D>(deserializer: D) -> Result<BTreeMap<u8, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut hours = BTreeMap::new();
    match HoursRepr::deserialize(deserializer)? {
        HoursRepr::Map(map) => {
            for (key, count) in map {
                if let Some(hour) = HourKey::Str(key).to_hour() {
                    *hours.entry(hour).or_insert(0) += count;
                }
            }
        }
        HoursRepr::List(list) => {
            for key in list {
                if let Some(hour) = key.to_hour() {
                    *hours.entry(hour).or_insert(0) += 1;
                }
            }
        }
    }
    Ok(hours)
}

fn deserialize_hour_list<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let keys = Vec::<HourKey>::deserialize(deserializer)?;
    Ok(keys.iter().filter_map(HourKey::to_hour).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hours_map_form() {
        let stats: UserStats =
            serde_json::from_str(r#"{"nickname": "alice", "hours": {"9": 2, "21": 5}}"#).unwrap();
        assert_eq!(stats.hours.get(&9), Some(&2));
        assert_eq!(stats.hours.get(&21), Some(&5));
        assert_eq!(stats.display_name, "alice");
    }

    #[test]
    fn test_legacy_active_hours_list() {
        let stats: UserStats =
            serde_json::from_str(r#"{"name": "bob", "active_hours": [9, "9", 10]}"#).unwrap();
        assert!(stats.hours.is_empty());
        let counts = stats.hour_counts();
        assert_eq!(counts.get(&9), Some(&2));
        assert_eq!(counts.get(&10), Some(&1));
        assert_eq!(stats.display_name, "bob");
    }

    #[test]
    fn test_hours_list_under_hours_key() {
        let stats: UserStats = serde_json::from_str(r#"{"hours": [1, 1, 23, 30]}"#).unwrap();
        assert_eq!(stats.hours.get(&1), Some(&2));
        assert_eq!(stats.hours.get(&23), Some(&1));
        assert_eq!(stats.hours.len(), 2);
    }

    #[test]
    fn test_hours_serialize_as_string_keys() {
        let mut stats = UserStats::default();
        stats.hours.insert(7, 3);
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["hours"]["7"], 3);
        assert!(value.get("active_hours").is_none());
    }
}
