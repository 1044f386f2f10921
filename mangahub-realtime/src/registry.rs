//! Concurrency-safe connection registry.
//!
//! Maps a connection key (connection id, peer address) to a live handle.
//! One reader/writer lock guards the map; broadcasters take an owned
//! snapshot under the read lock and do their network writes after the lock
//! is released, so a slow peer never blocks registration.
//!
//! ```text
//!   accept ──► register ──┐
//!                         ├──► RwLock<HashMap<K, H>> ──► snapshot() ──► fan-out writes
//!   EOF    ──► unregister ┘                                (lock released)
//! ```
//!
//! The registry is an owned value injected into each server, so several
//! server instances can coexist in one process.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared map from connection key to handle. Cloning shares the map.
pub struct ConnectionRegistry<K, H> {
    entries: Arc<RwLock<HashMap<K, H>>>,
}

impl<K, H> Clone for ConnectionRegistry<K, H> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, H> Default for ConnectionRegistry<K, H> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K, H> ConnectionRegistry<K, H>
where
    K: Eq + Hash + Clone,
    H: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handle for `key`.
    pub async fn register(&self, key: K, handle: H) {
        self.entries.write().await.insert(key, handle);
    }

    /// Remove `key`, returning its handle if it was present.
    pub async fn unregister(&self, key: &K) -> Option<H> {
        self.entries.write().await.remove(key)
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Owned copy of the current entries, taken under the read lock.
    pub async fn snapshot(&self) -> Vec<(K, H)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, h)| (k.clone(), h.clone()))
            .collect()
    }

    /// Call `f` for every entry of a snapshot. Entries registered or removed
    /// while `f` runs are not observed.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &H),
    {
        for (key, handle) in self.snapshot().await {
            f(&key, &handle);
        }
    }

    /// Remove and return every entry.
    pub async fn drain(&self) -> Vec<(K, H)> {
        self.entries.write().await.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry: ConnectionRegistry<u32, &str> = ConnectionRegistry::new();
        registry.register(1, "a").await;
        registry.register(1, "b").await;
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.snapshot().await, vec![(1, "b")]);
    }

    #[tokio::test]
    async fn test_unregister_missing_is_noop() {
        let registry: ConnectionRegistry<u32, u32> = ConnectionRegistry::new();
        assert!(registry.unregister(&7).await.is_none());
        registry.register(7, 70).await;
        assert_eq!(registry.unregister(&7).await, Some(70));
        assert!(!registry.contains(&7).await);
    }

    #[tokio::test]
    async fn test_clone_shares_entries() {
        let registry: ConnectionRegistry<u32, u32> = ConnectionRegistry::new();
        let other = registry.clone();
        other.register(1, 1).await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_for_each_sees_snapshot() {
        let registry: ConnectionRegistry<u32, u32> = ConnectionRegistry::new();
        for i in 0..5 {
            registry.register(i, i * 10).await;
        }
        let mut sum = 0;
        registry.for_each(|_, h| sum += h).await;
        assert_eq!(sum, 100);
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let registry: ConnectionRegistry<u32, u32> = ConnectionRegistry::new();
        registry.register(1, 1).await;
        registry.register(2, 2).await;
        assert_eq!(registry.drain().await.len(), 2);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister_disjoint() {
        let registry: ConnectionRegistry<u32, u32> = ConnectionRegistry::new();
        // M keys present up front, to be removed concurrently
        for key in 1_000..1_200 {
            registry.register(key, key).await;
        }

        let mut tasks = Vec::new();
        for worker in 0..8u32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    registry.register(worker * 100 + i, i).await;
                }
            }));
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for key in (1_000 + worker * 25)..(1_000 + (worker + 1) * 25) {
                    registry.unregister(&key).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.count().await, 400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_random_ops_match_serial_model() {
        let registry: ConnectionRegistry<u32, u32> = ConnectionRegistry::new();

        let mut tasks = Vec::new();
        for worker in 0..8u32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(worker as u64);
                let mut model = HashSet::new();
                for _ in 0..500 {
                    // Each worker owns its own key range
                    let key = worker * 1_000 + rng.gen_range(0..40);
                    if rng.gen_bool(0.5) {
                        registry.register(key, worker).await;
                        model.insert(key);
                    } else {
                        registry.unregister(&key).await;
                        model.remove(&key);
                    }
                }
                model
            }));
        }

        let mut expected = HashSet::new();
        for task in tasks {
            expected.extend(task.await.unwrap());
        }

        let actual: HashSet<u32> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(actual, expected);
    }
}
