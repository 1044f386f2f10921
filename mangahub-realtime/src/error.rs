//! Server lifecycle errors.
//!
//! Only start-up and lifecycle failures surface as errors. Failures inside
//! a running broadcast path are logged and never reach a client.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Server is already running")]
    AlreadyRunning,
    #[error("Broadcast queue closed")]
    QueueClosed,
}
