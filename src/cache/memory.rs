//! Process-local cache tier (L2).

use crate::cache::{CacheEntry, CleanupPolicy, spawn_cleanup};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Map of cache entries guarded by its own reader/writer lock.
///
/// Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    cleanup: CleanupPolicy,
}

impl MemoryCache {
    pub fn new(cleanup: CleanupPolicy) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            cleanup,
        }
    }

    /// Returns the live entry for the key. An expired entry is removed instead.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.maybe_cleanup();

        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check under the write lock, a concurrent insert may have refreshed it.
        match entries.get(key) {
            Some(entry) if !entry.is_expired_at(now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                tracing::trace!("Cache {}: expired in L2", key);
                None
            }
            None => None,
        }
    }

    /// Stores the entry, replacing any previous one with the same key.
    pub async fn insert(&self, entry: CacheEntry) {
        self.maybe_cleanup();
        self.entries.write().await.insert(entry.key.clone(), entry);
    }

    pub async fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.write().await.remove(key)
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn delete_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));

        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("Removed {} expired entries from L2", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Determines if an entry (live or expired) is present.
    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Randomly schedules a background sweep of expired entries.
    pub fn maybe_cleanup(&self) -> Option<JoinHandle<()>> {
        let cache = self.clone();
        spawn_cleanup(self.cleanup, async move {
            cache.delete_expired().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(key: &str, ttl: Duration) -> CacheEntry {
        CacheEntry::new(key, "tag", key.as_bytes().to_vec(), ttl)
    }

    #[tokio::test]
    async fn live_entries_are_returned() {
        let cache = MemoryCache::new(CleanupPolicy::never());
        cache.insert(entry("a", Duration::from_secs(60))).await;

        assert_eq!(cache.get("a").await.unwrap().data, b"a");
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_read() {
        let cache = MemoryCache::new(CleanupPolicy::never());
        cache.insert(entry("a", Duration::ZERO)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(cache.contains("a").await);
        assert_eq!(cache.get("a").await, None);
        assert!(!cache.contains("a").await);
    }

    #[tokio::test]
    async fn insert_replaces() {
        let cache = MemoryCache::new(CleanupPolicy::never());
        cache.insert(entry("a", Duration::from_secs(60))).await;
        cache
            .insert(CacheEntry::new("a", "other", b"new".to_vec(), Duration::from_secs(60)))
            .await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("a").await.unwrap().data, b"new");
        assert!(cache.remove("a").await.is_some());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn delete_expired_keeps_live_entries() {
        let cache = MemoryCache::new(CleanupPolicy::never());
        cache.insert(entry("old", Duration::ZERO)).await;
        cache.insert(entry("new", Duration::from_secs(60))).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(cache.delete_expired().await, 1);
        assert!(cache.contains("new").await);
        assert!(!cache.contains("old").await);
    }

    #[tokio::test]
    async fn forced_cleanup_sweeps_in_background() {
        let cache = MemoryCache::new(CleanupPolicy::always());
        cache.entries.write().await.insert("old".into(), entry("old", Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(5)).await;

        cache.maybe_cleanup().unwrap().await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn disabled_cleanup_never_spawns() {
        let cache = MemoryCache::new(CleanupPolicy::never());
        assert!(cache.maybe_cleanup().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_readers_and_sweeps_serialize() {
        let cache = MemoryCache::new(CleanupPolicy::always());

        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..200u64 {
                    let tag = format!("w{}-r{}", worker, round);
                    let ttl = Duration::from_millis(if round % 2 == 0 { 1 } else { 60_000 });
                    cache
                        .insert(CacheEntry::new("shared", &tag, tag.as_bytes().repeat(16), ttl))
                        .await;

                    if let Some(entry) = cache.get("shared").await {
                        assert_eq!(entry.key, "shared");
                        assert_eq!(entry.data, entry.tag.as_bytes().repeat(16));
                    }
                    cache.delete_expired().await;
                }
            }));
        }

        let all = async {
            for handle in handles {
                handle.await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(30), all)
            .await
            .expect("memory cache operations deadlocked");
    }
}
