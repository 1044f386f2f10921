//! # mangahub-realtime: Broadcast servers for MangaHub
//!
//! Three independent broadcast domains, each with its own registry and a
//! single broadcast worker draining a bounded queue.
//!
//! ## Architecture
//!
//! ```text
//!   TCP :9090                  UDP :9091                  WebSocket :9093
//! ┌─────────────┐          ┌───────────────┐          ┌────────────────┐
//! │ SyncServer  │          │ NotifyServer  │          │ ChatServer     │
//! │ JSON lines  │          │ tokens / JSON │          │ /ws/<room>     │
//! └──────┬──────┘          └───────┬───────┘          └───────┬────────┘
//!        │ persist                 │ auto-register            │ stamp identity
//!        ▼                         ▼                          ▼
//! ┌─────────────┐          ┌───────────────┐          ┌────────────────┐
//! │ Registry    │          │ Registry      │          │ ChatHub loop   │
//! │ conn → half │          │ addr → addr   │          │ room-filtered  │
//! └──────┬──────┘          └───────┬───────┘          └───────┬────────┘
//!        ▼                         ▼                          ▼
//!   every device              every endpoint            peers in room R
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: `ConnectionRegistry`, the shared connection map
//! - [`protocol`]: line codec, datagram classification, confirmations
//! - [`sync`]: TCP progress sync server
//! - [`notify`]: UDP notification server
//! - [`chat`]: chat hub and WebSocket front end
//! - [`client`]: clients for the three servers
//! - [`storage`]: RocksDB `ProgressStore`

pub mod chat;
pub mod client;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod storage;
pub mod sync;

mod shutdown;

pub use chat::{ChatHub, ChatServer, ChatServerConfig};
pub use client::{ChatClient, ClientError, NotifyClient, SyncClient};
pub use error::ServerError;
pub use notify::{NotifyServer, NotifyServerConfig, NotifyStats};
pub use protocol::{Datagram, ProtocolError};
pub use registry::ConnectionRegistry;
pub use storage::{RocksProgressStore, StoreConfig};
pub use sync::{SyncServer, SyncServerConfig, SyncStats};
