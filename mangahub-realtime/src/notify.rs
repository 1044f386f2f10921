//! UDP notification server.
//!
//! ```text
//!            datagram                 ┌─────────────────────┐
//! client ───────────────► recv loop ──┤ Datagram::parse     │
//!                                     ├─ Register   ──► registry + "registered" reply
//!                                     ├─ Unregister ──► registry - "unregistered" reply
//!                                     ├─ Notification ─► auto-register, enqueue
//!                                     └─ Unrecognized ─► warn
//!
//! queue (100) ──► broadcast worker ──► send_to every registered address
//! ```
//!
//! Addresses stay registered until they unregister. There is no liveness
//! check, so unreachable endpoints accumulate until the server restarts.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mangahub_core::NotificationPayload;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::error::ServerError;
use crate::protocol::{Datagram, REGISTERED_REPLY, UNREGISTERED_REPLY};
use crate::registry::ConnectionRegistry;
use crate::shutdown::{self, stopped};

/// Registered notification endpoints. The key is also the handle.
pub type NotifyRegistry = ConnectionRegistry<SocketAddr, SocketAddr>;

/// Notification server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyServerConfig {
    pub bind_addr: String,
    pub queue_capacity: usize,
    /// Receive buffer size; longer datagrams are truncated by the OS
    pub max_datagram_size: usize,
}

impl Default for NotifyServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9091".to_string(),
            queue_capacity: 100,
            max_datagram_size: 4096,
        }
    }
}

/// Notification server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyStats {
    pub datagrams_received: u64,
    pub notifications_broadcast: u64,
    pub auto_registrations: u64,
    pub unrecognized: u64,
    pub send_failures: u64,
    pub registered_clients: usize,
}

#[derive(Default)]
struct AtomicNotifyStats {
    datagrams_received: AtomicU64,
    notifications_broadcast: AtomicU64,
    auto_registrations: AtomicU64,
    unrecognized: AtomicU64,
    send_failures: AtomicU64,
}

/// The notification server.
pub struct NotifyServer {
    config: NotifyServerConfig,
    socket: Arc<UdpSocket>,
    registry: NotifyRegistry,
    queue_tx: mpsc::Sender<NotificationPayload>,
    queue_rx: std::sync::Mutex<Option<mpsc::Receiver<NotificationPayload>>>,
    stats: Arc<AtomicNotifyStats>,
    shutdown: watch::Sender<bool>,
}

impl NotifyServer {
    /// Bind the configured UDP address.
    pub async fn bind(config: NotifyServerConfig) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        Ok(Self {
            config,
            socket: Arc::new(socket),
            registry: ConnectionRegistry::new(),
            queue_tx,
            queue_rx: std::sync::Mutex::new(Some(queue_rx)),
            stats: Arc::new(AtomicNotifyStats::default()),
            shutdown: shutdown::channel(),
        })
    }

    /// Use an externally owned registry.
    pub fn with_registry(mut self, registry: NotifyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive and dispatch datagrams until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let queue_rx = self
            .queue_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(ServerError::AlreadyRunning)?;

        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(broadcast_worker(
            queue_rx,
            self.socket.clone(),
            self.registry.clone(),
            self.stats.clone(),
            shutdown.clone(),
        ));

        log::info!("Notification server listening on {}", self.local_addr()?);

        let mut buf = vec![0u8; self.config.max_datagram_size.max(1)];
        loop {
            let received = tokio::select! {
                received = self.socket.recv_from(&mut buf) => received,
                _ = stopped(&mut shutdown) => break,
            };
            match received {
                Ok((len, addr)) => {
                    self.stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
                    self.dispatch(Datagram::parse(&buf[..len]), addr).await;
                }
                Err(e) => log::error!("Error receiving notification datagram: {e}"),
            }
        }

        log::info!("Notification server stopped");
        Ok(())
    }

    async fn dispatch(&self, datagram: Datagram, addr: SocketAddr) {
        match datagram {
            Datagram::Register => {
                self.registry.register(addr, addr).await;
                log::info!("Client registered for notifications: {addr}");
                self.reply(REGISTERED_REPLY, addr).await;
            }
            Datagram::Unregister => {
                self.registry.unregister(&addr).await;
                log::info!("Client unregistered from notifications: {addr}");
                self.reply(UNREGISTERED_REPLY, addr).await;
            }
            Datagram::Notification(payload) => {
                if !self.registry.contains(&addr).await {
                    self.registry.register(addr, addr).await;
                    self.stats.auto_registrations.fetch_add(1, Ordering::Relaxed);
                    log::info!("Auto-registered notification client {addr}");
                }
                log::debug!("Notification {} from {addr}", payload.kind);
                if self.queue_tx.send(payload).await.is_err() {
                    log::debug!("Notification queue closed; dropping payload from {addr}");
                }
            }
            Datagram::Unrecognized(text) => {
                self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                log::warn!("Unrecognized datagram from {addr}: {text}");
            }
        }
    }

    async fn reply(&self, body: &str, addr: SocketAddr) {
        if let Err(e) = self.socket.send_to(body.as_bytes(), addr).await {
            log::error!("Failed to send confirmation to {addr}: {e}");
        }
    }

    /// Enqueue a payload for broadcast. Waits while the queue is full.
    pub async fn send_notification(&self, payload: NotificationPayload) -> Result<(), ServerError> {
        self.queue_tx
            .send(payload)
            .await
            .map_err(|_| ServerError::QueueClosed)
    }

    pub async fn register_client(&self, addr: SocketAddr) {
        self.registry.register(addr, addr).await;
    }

    pub async fn unregister_client(&self, addr: SocketAddr) {
        self.registry.unregister(&addr).await;
    }

    pub async fn client_count(&self) -> usize {
        self.registry.count().await
    }

    pub fn registry(&self) -> &NotifyRegistry {
        &self.registry
    }

    pub async fn stats(&self) -> NotifyStats {
        let s = &self.stats;
        NotifyStats {
            datagrams_received: s.datagrams_received.load(Ordering::Relaxed),
            notifications_broadcast: s.notifications_broadcast.load(Ordering::Relaxed),
            auto_registrations: s.auto_registrations.load(Ordering::Relaxed),
            unrecognized: s.unrecognized.load(Ordering::Relaxed),
            send_failures: s.send_failures.load(Ordering::Relaxed),
            registered_clients: self.registry.count().await,
        }
    }

    /// Stop receiving and forget every registered address.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let dropped = self.registry.drain().await.len();
        log::info!("Notification server shutting down, {dropped} clients dropped");
    }
}

async fn broadcast_worker(
    mut queue: mpsc::Receiver<NotificationPayload>,
    socket: Arc<UdpSocket>,
    registry: NotifyRegistry,
    stats: Arc<AtomicNotifyStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            next = queue.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
            _ = stopped(&mut shutdown) => break,
        };

        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                log::error!("Failed to encode notification: {e}");
                continue;
            }
        };

        let recipients = registry.snapshot().await;
        for (addr, _) in &recipients {
            if let Err(e) = socket.send_to(&body, addr).await {
                stats.send_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to send notification to {addr}: {e}");
            }
        }
        stats.notifications_broadcast.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Broadcast notification {} to {} clients",
            payload.kind,
            recipients.len()
        );
    }
    log::debug!("Notification broadcast worker stopped");
}
