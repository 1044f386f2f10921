//! Transport clients for the three servers.
//!
//! Each client speaks exactly the server's wire format and nothing more:
//! there is no reconnect, retry or offline queue. A dropped connection
//! surfaces as [`ClientError::Closed`] or `None`.

pub mod chat;
pub mod notify;
pub mod sync;

pub use chat::{ChatClient, RECENT_MESSAGES};
pub use notify::NotifyClient;
pub use sync::SyncClient;

/// Client-side errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Invalid server URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Server URL cannot carry a path: {0}")]
    NotABase(String),
    #[error("Connection closed")]
    Closed,
}

impl From<crate::protocol::ProtocolError> for ClientError {
    fn from(e: crate::protocol::ProtocolError) -> Self {
        match e {
            crate::protocol::ProtocolError::Json(e) => ClientError::Json(e),
            crate::protocol::ProtocolError::EmptyFrame => ClientError::Closed,
        }
    }
}
