//! Chat broadcast domain: a room-partitioned hub behind a WebSocket
//! listener.

pub mod hub;
pub mod server;

pub use hub::{ChatHub, Frame, PeerId};
pub use server::{parse_join, ChatServer, ChatServerConfig};
