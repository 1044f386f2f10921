//! TCP progress sync server.
//!
//! Architecture:
//! ```text
//! Device A ──┐  JSON line   ┌──────────────┐  persist (best effort)  ┌──────────────┐
//! Device B ──┼────────────► │ read loop    │ ──────────────────────► │ ProgressStore│
//! Device C ──┘  per conn    │ (one task    │                          └──────────────┘
//!                           │  per conn)   │ ──► bounded queue (100) ──► broadcast worker
//!                           └──────────────┘                                   │
//!                                                     registry snapshot ◄──────┘
//!                                                            │
//!                                          ┌─────────────────┼─────────────────┐
//!                                          ▼                 ▼                 ▼
//!                                       Device A          Device B          Device C
//! ```
//!
//! Every well-formed update is persisted, then republished to every
//! registered connection, the sender included. Persistence and delivery
//! fail independently: a storage error is logged and the update is still
//! broadcast. A full queue blocks the read loop that is enqueuing, not the
//! remote client.
//!
//! Per connection: `Connected → Streaming → Closed`. There is no handshake,
//! acknowledgement, retry, or read timeout.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mangahub_core::{persist_update, ProgressStore, ProgressUpdate};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::error::ServerError;
use crate::protocol::{decode_line, encode_line, ProtocolError};
use crate::registry::ConnectionRegistry;
use crate::shutdown::{self, stopped};

/// Connection identifier assigned on accept.
pub type ConnId = Uuid;

/// Outbound half of a sync connection. Only the broadcast worker writes
/// to it; the lock is per connection.
pub type SyncHandle = Arc<Mutex<OwnedWriteHalf>>;

/// Registry of live sync connections.
pub type SyncRegistry = ConnectionRegistry<ConnId, SyncHandle>;

/// Sync server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast queue capacity
    pub queue_capacity: usize,
}

impl Default for SyncServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9090".to_string(),
            queue_capacity: 100,
        }
    }
}

/// Sync server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub connections_accepted: u64,
    pub active_connections: usize,
    pub updates_received: u64,
    pub updates_broadcast: u64,
    pub decode_errors: u64,
    pub persist_failures: u64,
    pub write_failures: u64,
}

#[derive(Default)]
struct AtomicSyncStats {
    connections_accepted: AtomicU64,
    updates_received: AtomicU64,
    updates_broadcast: AtomicU64,
    decode_errors: AtomicU64,
    persist_failures: AtomicU64,
    write_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State every connection task needs.
#[derive(Clone)]
struct ConnectionContext {
    registry: SyncRegistry,
    store: Option<Arc<dyn ProgressStore>>,
    queue: mpsc::Sender<ProgressUpdate>,
    stats: Arc<AtomicSyncStats>,
    shutdown: watch::Receiver<bool>,
}

/// The sync server.
pub struct SyncServer {
    config: SyncServerConfig,
    registry: SyncRegistry,
    store: Option<Arc<dyn ProgressStore>>,
    queue_tx: mpsc::Sender<ProgressUpdate>,
    /// Taken by the broadcast worker when the server starts
    queue_rx: std::sync::Mutex<Option<mpsc::Receiver<ProgressUpdate>>>,
    stats: Arc<AtomicSyncStats>,
    shutdown: watch::Sender<bool>,
}

impl SyncServer {
    /// Create a server with its own registry and no persistence.
    pub fn new(config: SyncServerConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            registry: ConnectionRegistry::new(),
            store: None,
            queue_tx,
            queue_rx: std::sync::Mutex::new(Some(queue_rx)),
            stats: Arc::new(AtomicSyncStats::default()),
            shutdown: shutdown::channel(),
        }
    }

    /// Persist every received update into `store` before broadcasting it.
    pub fn with_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an externally owned registry.
    pub fn with_registry(mut self, registry: SyncRegistry) -> Self {
        self.registry = registry;
        self
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
        let queue_rx = self
            .queue_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(ServerError::AlreadyRunning)?;

        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(broadcast_worker(
            queue_rx,
            self.registry.clone(),
            self.stats.clone(),
            shutdown.clone(),
        ));

        log::info!("Sync server listening on {}", listener.local_addr()?);

        let ctx = ConnectionContext {
            registry: self.registry.clone(),
            store: self.store.clone(),
            queue: self.queue_tx.clone(),
            stats: self.stats.clone(),
            shutdown: shutdown.clone(),
        };

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stopped(&mut shutdown) => break,
            };
            match accepted {
                Ok((stream, addr)) => {
                    bump(&self.stats.connections_accepted);
                    tokio::spawn(handle_connection(stream, addr, ctx.clone()));
                }
                Err(e) => log::error!("Error accepting sync connection: {e}"),
            }
        }

        log::info!("Sync server stopped accepting connections");
        Ok(())
    }

    /// Enqueue an update for broadcast. Waits while the queue is full.
    pub async fn publish(&self, update: ProgressUpdate) -> Result<(), ServerError> {
        self.queue_tx
            .send(update)
            .await
            .map_err(|_| ServerError::QueueClosed)
    }

    /// Stop accepting, close every registered connection and abandon
    /// whatever is still queued.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        for (conn_id, handle) in self.registry.drain().await {
            // A handle held by a stalled write is released once the worker
            // sees the signal; its read loop closes it then.
            let Ok(mut writer) = handle.try_lock() else {
                log::debug!("Sync connection {conn_id} busy; left to its read loop");
                continue;
            };
            if let Err(e) = writer.shutdown().await {
                log::debug!("Error closing sync connection {conn_id}: {e}");
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn stats(&self) -> SyncStats {
        let s = &self.stats;
        SyncStats {
            connections_accepted: s.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.registry.count().await,
            updates_received: s.updates_received.load(Ordering::Relaxed),
            updates_broadcast: s.updates_broadcast.load(Ordering::Relaxed),
            decode_errors: s.decode_errors.load(Ordering::Relaxed),
            persist_failures: s.persist_failures.load(Ordering::Relaxed),
            write_failures: s.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Read loop for one connection.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, mut ctx: ConnectionContext) {
    let conn_id = Uuid::new_v4();
    let (read_half, write_half) = stream.into_split();
    let handle: SyncHandle = Arc::new(Mutex::new(write_half));

    ctx.registry.register(conn_id, handle.clone()).await;
    log::info!("Sync connection {conn_id} established from {addr}");

    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut line) => read,
            _ = stopped(&mut ctx.shutdown) => break,
        };
        match read {
            Ok(0) => break,
            Ok(_) => ctx.process_line(conn_id, &line).await,
            Err(e) => {
                log::warn!("Read error on sync connection {conn_id}: {e}");
                break;
            }
        }
    }

    ctx.registry.unregister(&conn_id).await;
    let _ = handle.lock().await.shutdown().await;
    log::info!("Sync connection {conn_id} closed");
}

impl ConnectionContext {
    async fn process_line(&self, conn_id: ConnId, line: &[u8]) {
        let update: ProgressUpdate = match decode_line(line) {
            Ok(update) => update,
            Err(ProtocolError::EmptyFrame) => return,
            Err(e) => {
                bump(&self.stats.decode_errors);
                log::warn!("Malformed update from {conn_id}: {e}");
                return;
            }
        };
        bump(&self.stats.updates_received);

        if let Some(store) = &self.store {
            if let Err(e) = persist_update(store.as_ref(), &update) {
                bump(&self.stats.persist_failures);
                log::error!(
                    "Failed to persist progress for user {} manga {}: {e}",
                    update.user_id,
                    update.manga_id
                );
            }
        }

        if self.queue.send(update).await.is_err() {
            log::debug!("Broadcast queue closed; dropping update from {conn_id}");
        }
    }
}

async fn write_line(handle: &SyncHandle, line: &[u8]) -> std::io::Result<()> {
    handle.lock().await.write_all(line).await
}

/// Drain the queue and write each update to every registered connection.
async fn broadcast_worker(
    mut queue: mpsc::Receiver<ProgressUpdate>,
    registry: SyncRegistry,
    stats: Arc<AtomicSyncStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let update = tokio::select! {
            next = queue.recv() => match next {
                Some(update) => update,
                None => break,
            },
            _ = stopped(&mut shutdown) => break,
        };

        let line = match encode_line(&update) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to encode update: {e}");
                continue;
            }
        };

        // Snapshot first; writes happen with the registry lock released
        let peers = registry.snapshot().await;
        for (conn_id, handle) in &peers {
            // A peer that stops reading stalls the write; shutdown abandons it
            let written = tokio::select! {
                written = write_line(handle, line.as_bytes()) => written,
                _ = stopped(&mut shutdown) => {
                    log::debug!("Sync broadcast worker stopped mid-broadcast");
                    return;
                }
            };
            if let Err(e) = written {
                bump(&stats.write_failures);
                log::error!("Failed to deliver update to {conn_id}: {e}");
            }
        }
        bump(&stats.updates_broadcast);

        log::debug!(
            "Broadcast update: user {} manga {} chapter {} to {} peers",
            update.user_id,
            update.manga_id,
            update.chapter,
            peers.len()
        );
    }
    log::debug!("Sync broadcast worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_config_default() {
        let config = SyncServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:9090");
        assert_eq!(config.queue_capacity, 100);
    }

    #[test]
    fn test_config_partial_json() {
        let config: SyncServerConfig =
            serde_json::from_str(r#"{"bind_addr":"127.0.0.1:7000"}"#).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:7000");
        assert_eq!(config.queue_capacity, 100);
    }

    #[tokio::test]
    async fn test_stats_initial() {
        let server = SyncServer::new(SyncServerConfig::default());
        assert_eq!(server.stats().await, SyncStats::default());
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_queue_blocks_when_full() {
        let server = SyncServer::new(SyncServerConfig::default());
        for chapter in 0..100 {
            server
                .publish(ProgressUpdate::new("u1", "op", chapter, 0, "d"))
                .await
                .unwrap();
        }

        // No worker draining: the 101st enqueue waits instead of failing
        let blocked = timeout(
            Duration::from_millis(100),
            server.publish(ProgressUpdate::new("u1", "op", 100, 0, "d")),
        )
        .await;
        assert!(blocked.is_err(), "101st publish should block");
    }

    #[tokio::test]
    async fn test_injected_registry_is_shared() {
        let registry = SyncRegistry::new();
        let server = Arc::new(
            SyncServer::new(SyncServerConfig::default()).with_registry(registry.clone()),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = server.clone();
        tokio::spawn(async move { running.run_on(listener).await });

        let _client = TcpStream::connect(addr).await.unwrap();
        timeout(Duration::from_secs(2), async {
            while registry.count().await != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(server.connection_count().await, 1);

        server.shutdown().await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let server = Arc::new(SyncServer::new(SyncServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = server.clone();
        let task = tokio::spawn(async move { running.run_on(listener).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            server.run_on(second).await,
            Err(ServerError::AlreadyRunning)
        ));

        server.shutdown().await;
        timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
