//! Document store backed cache tier (L1).
//!
//! Entries are stored as one document per key in a dedicated index, using the
//! short field names of [`CacheEntry`]:
//!
//! ```json
//! { "k": "<key>", "g": "<tag>", "b": "<base64 data>", "t": "<created>", "e": "<expires>" }
//! ```
//!
//! All operations of this tier are serialized by a reader/writer lock: lookups
//! share it, while writes, deletions and sweeps hold it exclusively. The lock
//! only coordinates tasks of this process, the store itself is shared with
//! other connectors.

use crate::cache::{CacheEntry, CleanupPolicy, spawn_cleanup};
use crate::store::{DocumentStore, FieldMapping, IndexDescription, Query, fetch_all};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Default name of the cache index.
pub const DEFAULT_CACHE_INDEX: &str = "http-cache";

/// Describes the cache index. Keys and tags are exact-match fields.
pub fn cache_index_description() -> IndexDescription {
    IndexDescription::with_fields([
        ("k", FieldMapping::Keyword),
        ("g", FieldMapping::Keyword),
        ("b", FieldMapping::Binary),
        ("t", FieldMapping::Date),
        ("e", FieldMapping::Date),
    ])
}

#[derive(Clone)]
pub struct PersistentCache {
    store: Arc<dyn DocumentStore>,
    index: String,
    lock: Arc<RwLock<()>>,
    cleanup: CleanupPolicy,
}

impl PersistentCache {
    pub fn new(store: Arc<dyn DocumentStore>, index: &str, cleanup: CleanupPolicy) -> Self {
        Self {
            store,
            index: index.to_owned(),
            lock: Arc::new(RwLock::new(())),
            cleanup,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Creates the cache index unless it exists.
    pub async fn ensure_index(&self) -> anyhow::Result<()> {
        self.store
            .ensure_index(&self.index, cache_index_description())
            .await
    }

    /// Returns the live entry stored for the key.
    ///
    /// An expired entry is deleted and reported as a miss. Store failures and
    /// unreadable documents are logged and reported as a miss as well.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.maybe_cleanup();

        let found = {
            let _guard = self.lock.read().await;
            self.lookup(key).await
        };

        let entry = match found {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!("Cache lookup of {} in '{}' failed: {:#}", key, self.index, err);
                return None;
            }
        };

        if !entry.is_expired() {
            return Some(entry);
        }

        tracing::trace!("Cache {} ({}): expired in L1", key, entry.tag);
        let _guard = self.lock.write().await;

        // Only delete if no fresh entry was written in between.
        match self.lookup(key).await {
            Ok(Some(current)) if !current.is_expired() => Some(current),
            Ok(Some(_)) => {
                if let Err(err) = self.delete_unlocked(key).await {
                    tracing::warn!("Failed to delete expired cache entry {}: {:#}", key, err);
                }
                None
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!("Cache lookup of {} in '{}' failed: {:#}", key, self.index, err);
                None
            }
        }
    }

    /// Stores the entry, replacing whatever was stored under its key.
    ///
    /// Failures are logged and the entry is dropped.
    pub async fn set(&self, entry: CacheEntry) {
        self.maybe_cleanup();

        let _guard = self.lock.write().await;
        if let Err(err) = self.replace_unlocked(&entry).await {
            tracing::warn!(
                "Failed to store cache entry {} ({}) in '{}': {:#}",
                entry.key,
                entry.tag,
                self.index,
                err
            );
        }
    }

    /// Removes all entries stored for the key.
    pub async fn delete(&self, key: &str) -> anyhow::Result<u64> {
        let _guard = self.lock.write().await;
        self.delete_unlocked(key).await
    }

    /// Removes every entry which expired by now. Failures are logged.
    pub async fn delete_expired(&self) -> u64 {
        let _guard = self.lock.write().await;

        match self
            .store
            .delete_by_query(&self.index, &Query::not_after("e", Utc::now()))
            .await
        {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::debug!("Removed {} expired entries from '{}'", deleted, self.index);
                }
                deleted
            }
            Err(err) => {
                tracing::warn!("Failed to remove expired entries from '{}': {:#}", self.index, err);
                0
            }
        }
    }

    /// Counts the stored entries, expired ones included.
    pub async fn count(&self) -> anyhow::Result<u64> {
        let _guard = self.lock.read().await;
        self.store.count(&self.index, &Query::MatchAll).await
    }

    /// Randomly schedules a background sweep of expired entries.
    pub fn maybe_cleanup(&self) -> Option<JoinHandle<()>> {
        let cache = self.clone();
        spawn_cleanup(self.cleanup, async move {
            cache.delete_expired().await;
        })
    }

    /// Fetches the newest entry for the key. Callers hold the lock.
    async fn lookup(&self, key: &str) -> anyhow::Result<Option<CacheEntry>> {
        let entries =
            fetch_all::<CacheEntry>(self.store.as_ref(), &self.index, &Query::term("k", key))
                .await?;

        Ok(entries.into_iter().max_by_key(|entry| entry.created_at))
    }

    async fn delete_unlocked(&self, key: &str) -> anyhow::Result<u64> {
        self.store
            .delete_by_query(&self.index, &Query::term("k", key))
            .await
    }

    async fn replace_unlocked(&self, entry: &CacheEntry) -> anyhow::Result<()> {
        self.delete_unlocked(&entry.key).await?;

        let body = serde_json::to_value(entry).context("Failed to serialize cache entry")?;
        self.store.create_document(&self.index, None, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn cache(store: &Arc<MemoryStore>, cleanup: CleanupPolicy) -> PersistentCache {
        PersistentCache::new(store.clone(), DEFAULT_CACHE_INDEX, cleanup)
    }

    #[tokio::test]
    async fn entries_are_persisted_as_short_documents() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(&store, CleanupPolicy::never());

        cache
            .set(CacheEntry::new("abc", "tag1", b"hello".to_vec(), Duration::from_secs(60)))
            .await;

        let documents = store.documents(DEFAULT_CACHE_INDEX).await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0]["k"], "abc");
        assert_eq!(documents[0]["g"], "tag1");
        assert_eq!(documents[0]["b"], "aGVsbG8=");
        assert_eq!(cache.get("abc").await.unwrap().data, b"hello");
        assert_eq!(cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_deleted_on_read() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(&store, CleanupPolicy::never());

        cache
            .set(CacheEntry::new("abc", "tag", b"x".to_vec(), Duration::ZERO))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(cache.get("abc").await, None);
        assert_eq!(cache.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn the_newest_duplicate_wins() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(&store, CleanupPolicy::never());

        let older = CacheEntry::new("abc", "old", b"1".to_vec(), Duration::from_secs(60));
        let mut newer = CacheEntry::new("abc", "new", b"2".to_vec(), Duration::from_secs(60));
        newer.created_at = older.created_at + chrono::Duration::seconds(1);

        // Written by two processes which raced each other.
        for entry in [&newer, &older] {
            store
                .create_document(DEFAULT_CACHE_INDEX, None, serde_json::to_value(entry).unwrap())
                .await
                .unwrap();
        }

        assert_eq!(cache.get("abc").await.unwrap().tag, "new");
    }

    #[tokio::test]
    async fn unreadable_documents_are_misses() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(&store, CleanupPolicy::never());

        store
            .create_document(DEFAULT_CACHE_INDEX, None, json!({"k": "abc", "b": 42}))
            .await
            .unwrap();

        assert_eq!(cache.get("abc").await, None);
    }

    #[tokio::test]
    async fn delete_removes_the_key_only() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(&store, CleanupPolicy::never());

        for key in ["a", "b"] {
            cache
                .set(CacheEntry::new(key, "", Vec::new(), Duration::from_secs(60)))
                .await;
        }

        assert_eq!(cache.delete("a").await.unwrap(), 1);
        assert_eq!(cache.get("a").await, None);
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn sweeps_remove_expired_entries_only() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(&store, CleanupPolicy::never());

        cache
            .set(CacheEntry::new("old", "", Vec::new(), Duration::ZERO))
            .await;
        cache
            .set(CacheEntry::new("new", "", Vec::new(), Duration::from_secs(60)))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(cache.delete_expired().await, 1);
        assert_eq!(cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn forced_cleanup_runs_in_background() {
        let store = Arc::new(MemoryStore::new());
        let entry = CacheEntry::new("old", "", Vec::new(), Duration::ZERO);
        store
            .create_document(DEFAULT_CACHE_INDEX, None, serde_json::to_value(&entry).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let cache = cache(&store, CleanupPolicy::always());
        cache.maybe_cleanup().unwrap().await.unwrap();

        assert!(store.documents(DEFAULT_CACHE_INDEX).await.is_empty());
    }

    #[tokio::test]
    async fn outages_are_swallowed() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(&store, CleanupPolicy::never());
        store.set_unavailable(true);

        cache
            .set(CacheEntry::new("abc", "", Vec::new(), Duration::from_secs(60)))
            .await;
        assert_eq!(cache.get("abc").await, None);
        assert_eq!(cache.delete_expired().await, 0);
        assert!(cache.count().await.is_err());
    }

    #[tokio::test]
    async fn ensure_index_creates_the_index() {
        let store = Arc::new(MemoryStore::new());
        cache(&store, CleanupPolicy::never()).ensure_index().await.unwrap();

        assert!(store.has_index(DEFAULT_CACHE_INDEX).await);
    }
}
