//! Boundary normalization of loosely-typed remote payloads.
//!
//! The remote may answer with one object or an array of objects. Everything
//! is turned into a sequence of records here so the merge and diff code never
//! branches on shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::types::{Conversation, Message};

/// A JSON object received from the remote.
pub type Record = Map<String, Value>;

/// Fields tried, in order, when a side-specific timestamp is missing.
const SHARED_TIME_FIELDS: [&str; 3] = ["timestamp", "created_at", "time"];

/// Normalize a payload into zero or more object records.
///
/// Arrays keep their object elements in order; a single object becomes a
/// one-element sequence; anything else is empty.
#[must_use]
pub fn records(payload: Value) -> Vec<Record> {
    match payload {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(record) => Some(record),
                _ => None,
            })
            .collect(),
        Value::Object(record) => vec![record],
        _ => Vec::new(),
    }
}

/// Normalize a conversation-summary payload.
///
/// Records without a usable `chat_id` are skipped.
#[must_use]
pub fn conversations(payload: Value) -> Vec<Conversation> {
    records(payload)
        .iter()
        .filter_map(conversation_from_record)
        .collect()
}

/// Build a conversation from the fixed field set of a summary record.
#[must_use]
pub fn conversation_from_record(record: &Record) -> Option<Conversation> {
    let id = record.get("chat_id").and_then(id_string)?;

    Some(Conversation {
        id,
        display_name: record
            .get("user_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        last_message_time: record.get("last_message_time").and_then(parse_timestamp),
        unread_count: record.get("unread_count").map_or(0, count),
    })
}

/// Normalize a message-history payload into display order.
///
/// `user_message` maps to an outbound message and `bot_message` to an
/// inbound one; a record carrying both yields the outbound message first.
#[must_use]
pub fn messages(payload: Value) -> Vec<Message> {
    let mut out = Vec::new();
    for record in records(payload) {
        if let Some(text) = non_empty_text(&record, "user_message") {
            out.push(Message::outbound(text, side_timestamp(&record, "user_timestamp")));
        }
        if let Some(text) = non_empty_text(&record, "bot_message") {
            out.push(Message::inbound(text, side_timestamp(&record, "bot_timestamp")));
        }
    }
    out
}

/// Parse a remote timestamp: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), or epoch millis.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

fn side_timestamp(record: &Record, side_field: &str) -> Option<DateTime<Utc>> {
    std::iter::once(side_field)
        .chain(SHARED_TIME_FIELDS)
        .filter_map(|field| record.get(field))
        .find(|value| !value.is_null() && value.as_str() != Some(""))
        .and_then(parse_timestamp)
}

fn non_empty_text(record: &Record, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// A non-empty string id as-is, or a numeric id in its decimal form.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn count(value: &Value) -> u32 {
    let raw = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    raw.map_or(0, |n| u32::try_from(n.max(0)).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use serde_json::json;

    #[test]
    fn test_single_object_and_array_normalize_alike() {
        let single = json!({"chat_id": "7", "user_name": "Ada"});
        let many = json!([{"chat_id": "7", "user_name": "Ada"}]);
        assert_eq!(conversations(single), conversations(many));
    }

    #[test]
    fn test_malformed_payloads_are_empty() {
        assert!(conversations(Value::Null).is_empty());
        assert!(conversations(json!("oops")).is_empty());
        assert!(conversations(json!({"user_name": "no id"})).is_empty());
        assert!(conversations(json!([1, "two", null])).is_empty());
    }

    #[test]
    fn test_conversation_fields() {
        let convs = conversations(json!([{
            "chat_id": 12345,
            "user_name": "Bob",
            "last_message_time": "2024-05-01T10:00:00Z",
            "unread_count": "3",
            "extra": "ignored"
        }]));
        assert_eq!(convs.len(), 1);
        let conv = &convs[0];
        assert_eq!(conv.id, "12345");
        assert_eq!(conv.display_name, "Bob");
        assert_eq!(conv.unread_count, 3);
        assert_eq!(
            conv.last_message_time.map(|t| t.to_rfc3339()),
            Some("2024-05-01T10:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_unread_count_defaults_to_zero() {
        let convs = conversations(json!([
            {"chat_id": "a"},
            {"chat_id": "b", "unread_count": -4},
            {"chat_id": "c", "unread_count": null}
        ]));
        assert!(convs.iter().all(|c| c.unread_count == 0));
    }

    #[test]
    fn test_timestamp_formats() {
        let rfc = parse_timestamp(&json!("2024-05-01T10:00:00+02:00")).unwrap();
        let naive = parse_timestamp(&json!("2024-05-01 08:00:00")).unwrap();
        let millis = parse_timestamp(&json!(rfc.timestamp_millis())).unwrap();
        assert_eq!(rfc, naive);
        assert_eq!(rfc, millis);
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(true)).is_none());
    }

    #[test]
    fn test_message_record_mapping() {
        let msgs = messages(json!([
            {
                "user_message": "hello",
                "user_timestamp": "2024-05-01T10:00:00Z",
                "bot_message": "hi there",
                "created_at": "2024-05-01T10:00:05Z"
            },
            {"bot_message": "", "user_message": null},
            {"bot_message": "anything else?"}
        ]));

        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].direction, Direction::Outbound);
        assert_eq!(msgs[0].text, "hello");
        assert_eq!(msgs[1].direction, Direction::Inbound);
        assert_eq!(
            msgs[1].timestamp.map(|t| t.to_rfc3339()),
            Some("2024-05-01T10:00:05+00:00".to_string())
        );
        assert!(msgs[2].timestamp.is_none());
    }

    #[test]
    fn test_single_message_object() {
        let msgs = messages(json!({"bot_message": "only one", "time": 1_000}));
        assert_eq!(msgs, vec![Message::inbound("only one", DateTime::from_timestamp_millis(1_000))]);
    }
}
