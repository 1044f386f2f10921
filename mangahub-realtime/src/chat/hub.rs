//! Room-partitioned chat hub.
//!
//! ```text
//!  read loops ──► Register / Unregister / Broadcast / Count ──► mpsc ──► hub loop
//!                                                                          │
//!                                             HashMap<PeerId, Peer> (owned by the loop)
//!                                                                          │
//!                                       room == msg.room_id ? try_send : skip
//!                                                                          │
//!                                          per-peer outbound mpsc ──► writer task
//! ```
//!
//! Every mutation and every broadcast goes through the one loop, so the peer
//! map is never read and written concurrently and hub events are totally
//! ordered. A peer whose outbound buffer is full or closed is unregistered
//! asynchronously by posting an `Unregister` back onto the event channel.

use std::collections::HashMap;
use std::sync::Arc;

use mangahub_core::{ChatIdentity, ChatMessage};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::error::ServerError;
use crate::shutdown::stopped;

/// Identifier of one chat connection.
pub type PeerId = Uuid;

/// Pre-encoded JSON frame shared by every recipient of a broadcast.
pub type Frame = Arc<String>;

enum HubEvent {
    Register {
        peer_id: PeerId,
        identity: ChatIdentity,
        outbound: mpsc::Sender<Frame>,
    },
    Unregister {
        peer_id: PeerId,
    },
    Broadcast(ChatMessage),
    Count {
        room: Option<String>,
        reply: oneshot::Sender<usize>,
    },
}

struct Peer {
    identity: ChatIdentity,
    outbound: mpsc::Sender<Frame>,
}

/// Handle to a running hub loop. Cloning shares the loop.
#[derive(Clone)]
pub struct ChatHub {
    events: mpsc::Sender<HubEvent>,
}

impl ChatHub {
    /// Spawn the hub loop on the current runtime. The loop ends when
    /// `shutdown` fires or every handle is dropped.
    pub fn spawn(event_capacity: usize, shutdown: watch::Receiver<bool>) -> Self {
        let (events, rx) = mpsc::channel(event_capacity.max(1));
        let state = HubState {
            peers: HashMap::new(),
            events: events.downgrade(),
        };
        tokio::spawn(state.run(rx, shutdown));
        Self { events }
    }

    /// Attach a peer to `identity.room_id`. Returns its id and the receiving
    /// end of its outbound buffer.
    pub async fn register(
        &self,
        identity: ChatIdentity,
        buffer: usize,
    ) -> Result<(PeerId, mpsc::Receiver<Frame>), ServerError> {
        let peer_id = Uuid::new_v4();
        let (outbound, rx) = mpsc::channel(buffer.max(1));
        self.post(HubEvent::Register {
            peer_id,
            identity,
            outbound,
        })
        .await?;
        Ok((peer_id, rx))
    }

    /// Detach a peer. Dropping its outbound sender ends its writer.
    pub async fn unregister(&self, peer_id: PeerId) {
        let _ = self.post(HubEvent::Unregister { peer_id }).await;
    }

    /// Deliver `msg` to every peer in `msg.room_id`.
    pub async fn send_message(&self, msg: ChatMessage) -> Result<(), ServerError> {
        self.post(HubEvent::Broadcast(msg)).await
    }

    pub async fn client_count(&self) -> usize {
        self.count(None).await
    }

    pub async fn room_client_count(&self, room: &str) -> usize {
        self.count(Some(room.to_string())).await
    }

    async fn count(&self, room: Option<String>) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.post(HubEvent::Count { room, reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn post(&self, event: HubEvent) -> Result<(), ServerError> {
        self.events
            .send(event)
            .await
            .map_err(|_| ServerError::QueueClosed)
    }
}

struct HubState {
    peers: HashMap<PeerId, Peer>,
    /// Used to post deferred unregisters without keeping the loop alive
    events: mpsc::WeakSender<HubEvent>,
}

impl HubState {
    async fn run(mut self, mut rx: mpsc::Receiver<HubEvent>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let event = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = stopped(&mut shutdown) => break,
            };
            self.handle(event);
        }
        drop(rx);
        log::info!("Chat hub stopped, closing {} peers", self.peers.len());
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register {
                peer_id,
                identity,
                outbound,
            } => {
                log::info!(
                    "Chat client {} ({}) joined room {}",
                    identity.username,
                    identity.user_id,
                    identity.room_id
                );
                self.peers.insert(peer_id, Peer { identity, outbound });
            }
            HubEvent::Unregister { peer_id } => {
                if let Some(peer) = self.peers.remove(&peer_id) {
                    log::info!(
                        "Chat client {} left room {}",
                        peer.identity.username,
                        peer.identity.room_id
                    );
                }
            }
            HubEvent::Broadcast(msg) => self.broadcast(&msg),
            HubEvent::Count { room, reply } => {
                let count = match room {
                    Some(room) => self
                        .peers
                        .values()
                        .filter(|p| p.identity.room_id == room)
                        .count(),
                    None => self.peers.len(),
                };
                let _ = reply.send(count);
            }
        }
    }

    fn broadcast(&self, msg: &ChatMessage) {
        let frame: Frame = match serde_json::to_string(msg) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                log::error!("Failed to encode chat message: {e}");
                return;
            }
        };

        let mut delivered = 0;
        for (peer_id, peer) in &self.peers {
            if peer.identity.room_id != msg.room_id {
                continue;
            }
            match peer.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::warn!("Dropping chat client {peer_id}: {e}");
                    self.defer_unregister(*peer_id);
                }
            }
        }
        log::debug!(
            "Chat message from {} delivered to {delivered} peers in room {}",
            msg.username,
            msg.room_id
        );
    }

    fn defer_unregister(&self, peer_id: PeerId) {
        if let Some(events) = self.events.upgrade() {
            tokio::spawn(async move {
                let _ = events.send(HubEvent::Unregister { peer_id }).await;
            });
        }
    }
}
