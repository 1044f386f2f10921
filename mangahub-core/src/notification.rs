//! Notification payloads pushed over the connectionless broadcast domain.

use serde::{Deserialize, Serialize};

/// A notification event fanned out to every registered endpoint.
///
/// Wire form: `{"type":"chapter_release","manga_id":"op","message":"...","timestamp":1700000000}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Event kind, e.g. `chapter_release`. Empty kinds are not broadcast.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manga_id: Option<String>,
    #[serde(default)]
    pub message: String,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: i64,
}

impl NotificationPayload {
    /// Payload stamped with the current unix time.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            manga_id: None,
            message: message.into(),
            timestamp: crate::unix_now(),
        }
    }

    pub fn with_manga(mut self, manga_id: impl Into<String>) -> Self {
        self.manga_id = Some(manga_id.into());
        self
    }

    /// Whether this payload is eligible for broadcast.
    pub fn is_well_formed(&self) -> bool {
        !self.kind.is_empty()
    }
}
