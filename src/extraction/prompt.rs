use super::{ExtractedItems, ExtractionError, ExtractionInput, ExtractionKind, ExtractionRequest};
use crate::batch::{Quote, Topic, UserTitle};
use crate::source::Message;
use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// `[HH:MM] [name](id): text`, one line per message
pub fn transcript(messages: &[Message], tz: &FixedOffset) -> String {
    let mut out = String::new();
    for msg in messages {
        let time = DateTime::from_timestamp(msg.timestamp, 0)
            .map(|utc| utc.with_timezone(tz).format("%H:%M").to_string())
            .unwrap_or_default();
        let text = msg.text.replace('\n', " ");
        out.push_str(&format!("[{}] [{}]({}): {}\n", time, msg.display_name(), msg.sender_id, text.trim()));
    }
    out
}

pub fn system_prompt(kind: ExtractionKind) -> &'static str {
    match kind {
        ExtractionKind::Topics => {
            "You summarise group chat logs. Reply with a JSON array only. Each element is an \
             object with keys \"topic\" (short title), \"contributors\" (display names), \
             \"contributor_ids\" (user ids from the log) and \"detail\" (two or three sentences)."
        }
        ExtractionKind::Quotes => {
            "You pick memorable lines from group chat logs. Reply with a JSON array only. Each \
             element is an object with keys \"content\" (the exact line), \"sender\" (display \
             name), \"user_id\" and \"reason\" (why it stands out)."
        }
        ExtractionKind::Titles => {
            "You give playful titles to chat participants based on their activity statistics. \
             Reply with a JSON array only. Each element is an object with keys \"name\", \
             \"user_id\", \"title\" (two to four words), \"mbti\" and \"reason\"."
        }
    }
}

pub fn user_prompt(request: &ExtractionRequest) -> String {
    let body = match &request.input {
        ExtractionInput::Transcript(text) => text.clone(),
        ExtractionInput::Users(users) => users
            .iter()
            .map(|u| {
                format!(
                    "- {} ({}): {} messages, {:.1} chars/message, emoji ratio {:.2}, night ratio {:.2}, reply ratio {:.2}",
                    u.display_name, u.user_id, u.message_count, u.avg_chars, u.emoji_ratio, u.night_ratio, u.reply_ratio
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };

    format!(
        "Return at most {} {}.\n\n{}",
        request.max_items,
        request.kind.as_str(),
        body
    )
}

/// First JSON array found in `reply`, truncated to `max_items`.
///
/// Replies often wrap the array in prose or code fences, so every `[` is tried
/// as a starting point until one parses.
pub fn parse_items(
    kind: ExtractionKind,
    reply: &str,
    max_items: usize,
) -> Result<ExtractedItems, ExtractionError> {
    let array = first_json_array(reply)
        .ok_or_else(|| ExtractionError::Parse("no JSON array in reply".to_string()))?;

    let items = match kind {
        ExtractionKind::Topics => ExtractedItems::Topics(
            typed_items::<Topic>(array, max_items)?
                .into_iter()
                .filter(|t| !t.name.trim().is_empty())
                .collect(),
        ),
        ExtractionKind::Quotes => ExtractedItems::Quotes(
            typed_items::<Quote>(array, max_items)?
                .into_iter()
                .filter(|q| !q.content.trim().is_empty())
                .collect(),
        ),
        ExtractionKind::Titles => ExtractedItems::Titles(typed_items::<UserTitle>(array, max_items)?),
    };
    Ok(items)
}

fn first_json_array(reply: &str) -> Option<Vec<Value>> {
    reply.match_indices('[').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&reply[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Array(items))) => Some(items),
            _ => None,
        }
    })
}

/// Elements that do not fit `T` are dropped; the reply only fails when none
/// of its elements could be used.
fn typed_items<T: DeserializeOwned>(array: Vec<Value>, max_items: usize) -> Result<Vec<T>, ExtractionError> {
    let mut items = Vec::new();
    let mut last_error = None;
    for value in array {
        if items.len() >= max_items {
            break;
        }
        match serde_json::from_value(value) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed extraction item");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) if items.is_empty() => Err(ExtractionError::Parse(e.to_string())),
        _ => Ok(items),
    }
}
