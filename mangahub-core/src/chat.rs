//! Chat messages routed by room.

use serde::{Deserialize, Serialize};

pub const ANONYMOUS_USER: &str = "anonymous";
pub const GUEST_USERNAME: &str = "guest";

/// A chat message. Clients may send only `{"message": "..."}`; the hub
/// fills in identity, room and time from the sending connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub user_id: String,
    pub username: String,
    pub room_id: String,
    pub message: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Identity attached to a chat connection when it joins a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatIdentity {
    pub user_id: String,
    pub username: String,
    pub room_id: String,
}

impl ChatIdentity {
    /// Build from join parameters; blank user fields fall back to
    /// `anonymous` / `guest`.
    pub fn new(user_id: Option<&str>, username: Option<&str>, room_id: impl Into<String>) -> Self {
        let pick = |value: Option<&str>, fallback: &str| {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        Self {
            user_id: pick(user_id, ANONYMOUS_USER),
            username: pick(username, GUEST_USERNAME),
            room_id: room_id.into(),
        }
    }

    /// Overwrite the identity fields of an inbound message with this
    /// connection's identity. Whatever the client claimed is discarded.
    pub fn stamp(&self, mut msg: ChatMessage, now: i64) -> ChatMessage {
        msg.user_id = self.user_id.clone();
        msg.username = self.username.clone();
        msg.room_id = self.room_id.clone();
        msg.timestamp = now;
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_defaults() {
        let id = ChatIdentity::new(None, Some(""), "general");
        assert_eq!(id.user_id, ANONYMOUS_USER);
        assert_eq!(id.username, GUEST_USERNAME);
        assert_eq!(id.room_id, "general");
    }

    #[test]
    fn test_stamp_discards_spoofed_fields() {
        let id = ChatIdentity::new(Some("u1"), Some("luffy"), "one-piece");
        let spoofed = ChatMessage {
            user_id: "admin".into(),
            username: "root".into(),
            room_id: "general".into(),
            message: "gum gum".into(),
            timestamp: 1,
        };
        let stamped = id.stamp(spoofed, 1_700_000_000);
        assert_eq!(stamped.user_id, "u1");
        assert_eq!(stamped.username, "luffy");
        assert_eq!(stamped.room_id, "one-piece");
        assert_eq!(stamped.message, "gum gum");
        assert_eq!(stamped.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_partial_message_decodes() {
        let msg: ChatMessage = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(msg, ChatMessage::text("hi"));
    }
}
