//! Core data types for conversations, messages and toggles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of a tracked remote conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Opaque conversation identifier.
    pub id: String,
    /// Name shown in the list (may be empty).
    pub display_name: String,
    /// Time of the most recent message, if known.
    pub last_message_time: Option<DateTime<Utc>>,
    /// Unread message count.
    pub unread_count: u32,
}

impl Conversation {
    /// Create a conversation with no activity.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            last_message_time: None,
            unread_count: 0,
        }
    }

    /// Set the last message time.
    #[must_use]
    pub const fn with_last_message_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_message_time = Some(at);
        self
    }

    /// Set the unread count.
    #[must_use]
    pub const fn with_unread_count(mut self, count: u32) -> Self {
        self.unread_count = count;
        self
    }

    /// Name to render, falling back to a generic label.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            "User"
        } else {
            &self.display_name
        }
    }

    /// Sort key for recency; an absent time sorts as the epoch.
    #[must_use]
    pub fn recency_millis(&self) -> i64 {
        self.last_message_time.map_or(0, |t| t.timestamp_millis())
    }
}

/// Which side of the conversation a message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sent by the remote party.
    Inbound,
    /// Sent from the operator side.
    Outbound,
}

/// A single chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message origin.
    pub direction: Direction,
    /// Message body.
    pub text: String,
    /// When the message was sent, if known.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create an inbound message.
    #[must_use]
    pub fn inbound(text: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            direction: Direction::Inbound,
            text: text.into(),
            timestamp,
        }
    }

    /// Create an outbound message.
    #[must_use]
    pub fn outbound(text: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            direction: Direction::Outbound,
            text: text.into(),
            timestamp,
        }
    }
}

/// Delivery lifecycle of an optimistic echo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Submitted, waiting for the send endpoint.
    Pending,
    /// Accepted by the send endpoint, not yet seen in a poll.
    Confirmed,
    /// The send endpoint rejected or never received the message.
    Failed,
}

/// An operator message rendered ahead of server confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Client-assigned identifier.
    pub id: Uuid,
    /// The echoed message.
    pub message: Message,
    /// Current delivery state.
    pub state: DeliveryState,
    /// Outbound messages with the same text already on the server when sent.
    pub(crate) baseline: usize,
}

/// A message as presented to the operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayMessage {
    /// The message.
    pub message: Message,
    /// Delivery state for local echoes, `None` for server content.
    pub delivery: Option<DeliveryState>,
    /// Client id for local echoes.
    pub local_id: Option<Uuid>,
}

/// Per-conversation enable flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggle {
    /// Conversation the flag applies to.
    pub conversation_id: String,
    /// Whether outbound messaging is enabled.
    pub enabled: bool,
    /// When the flag last changed.
    pub updated_at: DateTime<Utc>,
}

/// Change notification published by a sync session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// The conversation list cache changed.
    ChatListChanged,
    /// The visible message stream of a conversation changed.
    MessagesChanged {
        /// Conversation whose stream changed.
        conversation_id: String,
    },
    /// A local echo resolved.
    DeliveryChanged {
        /// Conversation the echo belongs to.
        conversation_id: String,
        /// Client id of the echo.
        local_id: Uuid,
        /// New delivery state.
        state: DeliveryState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_label_fallback() {
        assert_eq!(Conversation::new("42", "").label(), "User");
        assert_eq!(Conversation::new("42", "Ada").label(), "Ada");
    }

    #[test]
    fn test_recency_of_absent_time_is_epoch() {
        let at = DateTime::from_timestamp_millis(200).unwrap();
        assert_eq!(Conversation::new("a", "A").recency_millis(), 0);
        assert_eq!(
            Conversation::new("b", "B")
                .with_last_message_time(at)
                .recency_millis(),
            200
        );
    }

    #[test]
    fn test_direction_serializes_snake_case() {
        let json = serde_json::to_string(&Direction::Outbound).unwrap();
        assert_eq!(json, "\"outbound\"");
    }
}
