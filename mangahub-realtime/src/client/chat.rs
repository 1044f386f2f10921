//! WebSocket client for the chat server.

use std::collections::VecDeque;

use futures_util::{SinkExt, StreamExt};
use mangahub_core::ChatMessage;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::ClientError;

/// Messages kept for [`ChatClient::recent`].
pub const RECENT_MESSAGES: usize = 50;

/// A member of one chat room.
pub struct ChatClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    recent: VecDeque<ChatMessage>,
}

impl ChatClient {
    /// Join `room` on the server at `base_url` (e.g. `ws://127.0.0.1:9093`).
    pub async fn connect(
        base_url: &str,
        room: &str,
        user_id: &str,
        username: &str,
    ) -> Result<Self, ClientError> {
        let url = join_url(base_url, room, user_id, username)?;
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        log::debug!("Joined chat room {room} as {username}");
        Ok(Self {
            stream,
            recent: VecDeque::with_capacity(RECENT_MESSAGES),
        })
    }

    /// Send a message. Identity, room and time are assigned by the server.
    pub async fn send(&mut self, text: &str) -> Result<(), ClientError> {
        let json = serde_json::to_string(&ChatMessage::text(text))?;
        self.stream.send(Message::text(json)).await?;
        Ok(())
    }

    /// Next message delivered to this room. Malformed frames are skipped;
    /// `None` once the server closes the connection.
    pub async fn next_message(&mut self) -> Result<Option<ChatMessage>, ClientError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<ChatMessage>(text.as_str()) {
                    Ok(msg) => {
                        if self.recent.len() == RECENT_MESSAGES {
                            self.recent.pop_front();
                        }
                        self.recent.push_back(msg.clone());
                        return Ok(Some(msg));
                    }
                    Err(e) => log::warn!("Skipping malformed chat frame: {e}"),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// The last [`RECENT_MESSAGES`] received messages, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &ChatMessage> {
        self.recent.iter()
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

fn join_url(base_url: &str, room: &str, user_id: &str, username: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|()| ClientError::NotABase(base_url.to_string()))?
        .pop_if_empty()
        .extend(["ws", room]);
    url.query_pairs_mut()
        .clear()
        .append_pair("user_id", user_id)
        .append_pair("username", username);
    Ok(url)
}
