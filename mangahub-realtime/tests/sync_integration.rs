//! End-to-end tests for the TCP sync server: real listener, real clients.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use mangahub_core::{MemoryStore, ProgressStore, ProgressUpdate, ReadingStatus};
use mangahub_realtime::client::SyncClient;
use mangahub_realtime::sync::{SyncServer, SyncServerConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(2);

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn start(store: Arc<MemoryStore>) -> (Arc<SyncServer>, SocketAddr) {
    let server = Arc::new(SyncServer::new(SyncServerConfig::default()).with_store(store));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = server.clone();
    tokio::spawn(async move { running.run_on(listener).await });
    (server, addr)
}

async fn connect_all(server: &SyncServer, addr: SocketAddr, n: usize) -> Vec<SyncClient> {
    let mut clients = Vec::new();
    for _ in 0..n {
        clients.push(SyncClient::connect(addr).await.unwrap());
    }
    eventually(|| async { server.connection_count().await == n }).await;
    clients
}

async fn next(client: &mut SyncClient) -> ProgressUpdate {
    timeout(WAIT, client.next_update())
        .await
        .expect("no update in time")
        .unwrap()
        .expect("connection closed")
}

#[tokio::test]
async fn test_update_reaches_every_connection_including_sender() {
    let store = Arc::new(MemoryStore::new());
    let (server, addr) = start(store.clone()).await;
    let mut clients = connect_all(&server, addr, 3).await;

    let update = ProgressUpdate::new("u1", "one-piece", 1100, 1_700_000_000, "phone");
    clients[0].send_update(&update).await.unwrap();

    for client in clients.iter_mut() {
        assert_eq!(next(client).await, update);
    }

    let record = store.load("u1", "one-piece").unwrap().unwrap();
    assert_eq!(record.current_chapter, 1100);
    assert_eq!(record.status, ReadingStatus::Reading);

    let stats = server.stats().await;
    assert_eq!(stats.updates_received, 1);
    assert_eq!(stats.updates_broadcast, 1);
    assert_eq!(stats.active_connections, 3);
}

#[tokio::test]
async fn test_updates_arrive_in_send_order() {
    let (server, addr) = start(Arc::new(MemoryStore::new())).await;
    let mut clients = connect_all(&server, addr, 2).await;

    for chapter in 1..=20 {
        clients[0]
            .send_update(&ProgressUpdate::new("u1", "op", chapter, chapter as i64, "phone"))
            .await
            .unwrap();
    }
    for chapter in 1..=20 {
        assert_eq!(next(&mut clients[1]).await.chapter, chapter);
    }
}

#[tokio::test]
async fn test_persistence_failure_still_broadcasts() {
    let store = Arc::new(MemoryStore::new());
    store.fail_writes(true);
    let (server, addr) = start(store.clone()).await;
    let mut clients = connect_all(&server, addr, 2).await;

    let update = ProgressUpdate::new("u1", "nk", 3, 10, "tablet");
    clients[0].send_update(&update).await.unwrap();

    assert_eq!(next(&mut clients[1]).await, update);
    assert!(store.is_empty());
    assert_eq!(server.stats().await.persist_failures, 1);
}

#[tokio::test]
async fn test_malformed_line_keeps_connection_open() {
    let (server, addr) = start(Arc::new(MemoryStore::new())).await;
    let mut clients = connect_all(&server, addr, 2).await;
    let mut raw = TcpStream::connect(addr).await.unwrap();
    eventually(|| async { server.connection_count().await == 3 }).await;

    raw.write_all(b"{this is not json}\n\n").await.unwrap();
    let good = ProgressUpdate::new("u2", "op", 7, 70, "laptop");
    let mut line = serde_json::to_string(&good).unwrap();
    line.push('\n');
    raw.write_all(line.as_bytes()).await.unwrap();

    assert_eq!(next(&mut clients[0]).await, good);
    let stats = server.stats().await;
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.active_connections, 3);
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let (server, addr) = start(Arc::new(MemoryStore::new())).await;
    let mut clients = connect_all(&server, addr, 2).await;

    clients.pop().unwrap().close().await.unwrap();
    eventually(|| async { server.connection_count().await == 1 }).await;

    // Remaining peer still receives broadcasts
    let update = ProgressUpdate::new("u1", "op", 2, 2, "phone");
    clients[0].send_update(&update).await.unwrap();
    assert_eq!(next(&mut clients[0]).await, update);
}

#[tokio::test]
async fn test_server_side_publish() {
    let (server, addr) = start(Arc::new(MemoryStore::new())).await;
    let mut clients = connect_all(&server, addr, 1).await;

    let update = ProgressUpdate::new("u9", "op", 50, 5, "server");
    server.publish(update.clone()).await.unwrap();
    assert_eq!(next(&mut clients[0]).await, update);
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let (server, addr) = start(Arc::new(MemoryStore::new())).await;
    let mut clients = connect_all(&server, addr, 2).await;

    server.shutdown().await;
    assert_eq!(server.connection_count().await, 0);
    for client in clients.iter_mut() {
        let closed = timeout(WAIT, client.next_update()).await.unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
    }
}

#[tokio::test]
async fn test_shutdown_with_peer_that_never_reads() {
    let (server, addr) = start(Arc::new(MemoryStore::new())).await;
    let _stalled = TcpStream::connect(addr).await.unwrap();
    eventually(|| async { server.connection_count().await == 1 }).await;

    // Enough to fill both socket buffers and park the worker mid-write
    let device = "d".repeat(256 * 1024);
    for chapter in 0..99 {
        server
            .publish(ProgressUpdate::new("u1", "op", chapter, 0, device.as_str()))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    timeout(Duration::from_secs(3), server.shutdown())
        .await
        .expect("shutdown waited on a stalled peer");
    assert_eq!(server.connection_count().await, 0);
}
