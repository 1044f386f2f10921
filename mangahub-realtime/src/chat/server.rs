//! WebSocket front end for the chat hub.
//!
//! Clients join with `GET /ws/<room>?user_id=..&username=..`. The room and
//! identity are fixed at the handshake; other paths are refused with 404.
//! Each accepted socket gets two tasks:
//!
//! ```text
//!  socket ─► read loop ─► stamp(identity, now) ─► hub.send_message
//!  socket ◄─ writer    ◄─ outbound mpsc (bounded) ◄─ hub broadcast
//! ```

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use mangahub_core::{unix_now, ChatIdentity, ChatMessage};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::Message;
use url::form_urlencoded;

use super::hub::{ChatHub, Frame};
use crate::error::ServerError;
use crate::shutdown::{self, stopped};

/// Chat server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatServerConfig {
    pub bind_addr: String,
    /// Hub event channel capacity
    pub event_capacity: usize,
    /// Outbound frames buffered per peer before it is dropped
    pub peer_buffer: usize,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9093".to_string(),
            event_capacity: 100,
            peer_buffer: 64,
        }
    }
}

/// Parse a join URI into the connection identity.
///
/// Returns `None` unless the path is exactly `/ws/<room>` with a non-empty
/// room.
pub fn parse_join(uri: &Uri) -> Option<ChatIdentity> {
    let room = uri.path().strip_prefix("/ws/")?;
    if room.is_empty() || room.contains('/') {
        return None;
    }

    let mut user_id = None;
    let mut username = None;
    let query = uri.query().unwrap_or_default();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "user_id" => user_id = Some(value.into_owned()),
            "username" => username = Some(value.into_owned()),
            _ => {}
        }
    }

    let room = percent_decode_str(room).decode_utf8_lossy();
    Some(ChatIdentity::new(user_id.as_deref(), username.as_deref(), room.into_owned()))
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("expected /ws/<room>".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// The chat server: a WebSocket listener in front of a [`ChatHub`].
pub struct ChatServer {
    config: ChatServerConfig,
    hub: ChatHub,
    shutdown: watch::Sender<bool>,
}

impl ChatServer {
    /// Create the server and spawn its hub loop. Must be called inside a
    /// Tokio runtime.
    pub fn new(config: ChatServerConfig) -> Self {
        let shutdown = shutdown::channel();
        let hub = ChatHub::spawn(config.event_capacity, shutdown.subscribe());
        Self {
            config,
            hub,
            shutdown,
        }
    }

    pub fn hub(&self) -> &ChatHub {
        &self.hub
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        log::info!("Chat server listening on {}", listener.local_addr()?);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stopped(&mut shutdown) => break,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let hub = self.hub.clone();
                    let peer_buffer = self.config.peer_buffer;
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, addr, hub, peer_buffer, shutdown).await
                        {
                            log::warn!("Chat connection from {addr} failed: {e}");
                        }
                    });
                }
                Err(e) => log::error!("Error accepting chat connection: {e}"),
            }
        }

        log::info!("Chat server stopped accepting connections");
        Ok(())
    }

    /// Deliver a server-originated message to its room.
    pub async fn send_message(&self, msg: ChatMessage) -> Result<(), ServerError> {
        self.hub.send_message(msg).await
    }

    pub async fn client_count(&self) -> usize {
        self.hub.client_count().await
    }

    pub async fn room_client_count(&self, room: &str) -> usize {
        self.hub.room_client_count(room).await
    }

    /// Stop the listener and the hub. Every peer's writer ends, closing its
    /// socket.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: ChatHub,
    peer_buffer: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut identity = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        match parse_join(req.uri()) {
            Some(joined) => {
                identity = Some(joined);
                Ok(resp)
            }
            None => {
                log::warn!("Rejected chat handshake from {addr}: {}", req.uri());
                Err(not_found())
            }
        }
    })
    .await?;
    let Some(identity) = identity else {
        return Ok(());
    };

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (peer_id, outbound) = hub.register(identity.clone(), peer_buffer).await?;
    log::debug!("Chat peer {peer_id} connected from {addr}");

    let writer = tokio::spawn(write_frames(ws_sender, outbound));

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = stopped(&mut shutdown) => break,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ChatMessage>(text.as_str()) {
                    Ok(msg) => {
                        let stamped = identity.stamp(msg, unix_now());
                        if hub.send_message(stamped).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Malformed chat message from {peer_id}: {e}"),
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::warn!("WebSocket error from {peer_id}: {e}");
                break;
            }
        }
    }

    hub.unregister(peer_id).await;
    if let Err(e) = writer.await {
        log::debug!("Chat writer for {peer_id} ended abnormally: {e}");
    }
    log::debug!("Chat peer {peer_id} disconnected");
    Ok(())
}

/// Forward outbound frames to the socket until the hub drops the sender.
async fn write_frames<S>(mut sink: S, mut outbound: mpsc::Receiver<Frame>)
where
    S: SinkExt<Message> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if sink.send(Message::text(frame.as_str().to_owned())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
