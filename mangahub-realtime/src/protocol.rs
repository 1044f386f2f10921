//! Wire formats for the three broadcast domains.
//!
//! ```text
//! Sync (TCP)          one JSON object per line, both directions
//!                     {"user_id":..,"manga_id":..,"chapter":..,"timestamp":..,"device_id":..}\n
//!
//! Notify (UDP)        one datagram per message
//!                     "register" | "unregister" | {"type":..,"manga_id":..,"message":..,"timestamp":..}
//!
//! Chat (WebSocket)    one JSON ChatMessage per text frame; room chosen by join path
//! ```
//!
//! None of the formats has a handshake, length prefix or heartbeat.

use mangahub_core::NotificationPayload;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Control token enrolling the sender for notifications.
pub const REGISTER_TOKEN: &str = "register";
/// Control token withdrawing the sender.
pub const UNREGISTER_TOKEN: &str = "unregister";

/// Confirmation sent in reply to [`REGISTER_TOKEN`].
pub const REGISTERED_REPLY: &str =
    r#"{"type":"registered","message":"Successfully registered for notifications"}"#;
/// Confirmation sent in reply to [`UNREGISTER_TOKEN`].
pub const UNREGISTERED_REPLY: &str =
    r#"{"type":"unregistered","message":"Successfully unregistered from notifications"}"#;

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Empty frame")]
    EmptyFrame,
}

/// Encode a value as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line (with or without its terminator).
pub fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<T, ProtocolError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    Ok(serde_json::from_slice(trimmed)?)
}

/// An inbound notification datagram, classified in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Register,
    Unregister,
    Notification(NotificationPayload),
    /// Anything else, lossily decoded for logging
    Unrecognized(String),
}

impl Datagram {
    /// Classify a datagram: control tokens first, then a payload with a
    /// non-empty `type`, otherwise unrecognized.
    pub fn parse(bytes: &[u8]) -> Self {
        let trimmed = bytes.trim_ascii();
        if trimmed == REGISTER_TOKEN.as_bytes() {
            return Datagram::Register;
        }
        if trimmed == UNREGISTER_TOKEN.as_bytes() {
            return Datagram::Unregister;
        }
        match serde_json::from_slice::<NotificationPayload>(trimmed) {
            Ok(payload) if payload.is_well_formed() => Datagram::Notification(payload),
            _ => Datagram::Unrecognized(String::from_utf8_lossy(trimmed).into_owned()),
        }
    }
}
