//! Sync server persisting through RocksDB, and store-to-store
//! reconciliation between two on-disk stores.

use std::sync::Arc;

use mangahub_core::{reconcile_stores, ProgressRecord, ProgressStore, ProgressUpdate};
use mangahub_realtime::client::SyncClient;
use mangahub_realtime::storage::{RocksProgressStore, StoreConfig};
use mangahub_realtime::sync::{SyncServer, SyncServerConfig};
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn test_sync_updates_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RocksProgressStore::open(StoreConfig::for_testing(dir.path())).unwrap());

    let server = Arc::new(SyncServer::new(SyncServerConfig::default()).with_store(store.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = server.clone();
    tokio::spawn(async move { running.run_on(listener).await });

    let mut client = SyncClient::connect(addr).await.unwrap();
    for chapter in [10, 11, 12] {
        client
            .send_update(&ProgressUpdate::new("u1", "op", chapter, 1_000 + chapter as i64, "phone"))
            .await
            .unwrap();
        // Persisted before the echo is enqueued
        timeout(Duration::from_secs(2), client.next_update())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
    server.shutdown().await;
    drop(server);
    // Connection tasks release their handles once they observe shutdown
    timeout(Duration::from_secs(2), async {
        while Arc::strong_count(&store) > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    store.flush().unwrap();
    drop(store);

    let reopened = RocksProgressStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let record = reopened.load("u1", "op").unwrap().unwrap();
    assert_eq!(record.current_chapter, 12);
    assert_eq!(record.updated_at.timestamp(), 1_012);
    assert_eq!(record.started_at.timestamp(), 1_010);
}

#[test]
fn test_reconcile_two_rocks_stores() {
    use chrono::{TimeZone, Utc};

    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let local = RocksProgressStore::open(StoreConfig::for_testing(local_dir.path())).unwrap();
    let remote = RocksProgressStore::open(StoreConfig::for_testing(remote_dir.path())).unwrap();

    let at = |s| Utc.timestamp_opt(s, 0).unwrap();
    let mut op_local = ProgressRecord::new("u1", "op", at(0));
    op_local.record_chapter(10, at(100));
    let mut op_remote = ProgressRecord::new("u1", "op", at(0));
    op_remote.record_chapter(12, at(105));
    let mut nk_local = ProgressRecord::new("u1", "nk", at(0));
    nk_local.record_chapter(3, at(50));

    local.save(&op_local).unwrap();
    local.save(&nk_local).unwrap();
    remote.save(&op_remote).unwrap();

    let report = reconcile_stores(&local, &remote, "u1").unwrap();
    assert_eq!((report.pulled, report.pushed), (1, 1));

    assert_eq!(local.list_records("u1").unwrap(), remote.list_records("u1").unwrap());
    assert_eq!(local.load("u1", "op").unwrap().unwrap().current_chapter, 12);
}
