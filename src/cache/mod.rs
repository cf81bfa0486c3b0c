//! Two-tier cache used to memoize HTTP requests.
//!
//! - [`memory::MemoryCache`] (L2) - process-local map, consulted first
//! - [`persistent::PersistentCache`] (L1) - document store backed, shared by all
//!   connector processes and authoritative
//!
//! [`RequestCache`] combines both: reads go L2 → L1 (backfilling L2 on an L1
//! hit), writes go L1 → L2. Each tier has its own lock and the combined cache
//! never holds both at once.
//!
//! The cache is best-effort: the source of truth is the real network call.
//! Store failures are logged and behave like a miss; failed writes are dropped.
//!
//! Expired entries are never returned. They are deleted when a read hits them,
//! and every access has a small chance of sweeping the whole tier in the
//! background (see [`CleanupPolicy`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;

pub mod memory;
pub mod persistent;

use memory::MemoryCache;
use persistent::PersistentCache;

/// A single cached value. Both tiers store the same shape.
///
/// Serialized with the short field names of the persisted cache documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "k")]
    pub key: String,
    /// Free-form description, only used for diagnostics.
    #[serde(rename = "g")]
    pub tag: String,
    #[serde(rename = "b", with = "crate::tools::base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "t")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "e")]
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates an entry which is valid for `ttl` starting now.
    pub fn new(key: &str, tag: &str, data: Vec<u8>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key: key.to_owned(),
            tag: tag.to_owned(),
            data,
            created_at,
            expires_at,
        }
    }

    /// Determines if the entry must no longer be served.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Chance of sweeping all expired entries of a tier on each access.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CleanupPolicy {
    probability: f64,
}

impl CleanupPolicy {
    /// Creates a policy with the given probability, clamped to `[0, 1]`.
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };

        Self { probability }
    }

    /// A sweep on every access.
    pub fn always() -> Self {
        Self::new(1.0)
    }

    /// No background sweeps at all.
    pub fn never() -> Self {
        Self::new(0.0)
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Rolls the dice.
    pub fn should_run(&self) -> bool {
        self.probability > 0.0 && rand::random::<f64>() < self.probability
    }
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self::new(crate::context::DEFAULT_CACHE_CLEANUP_PROBABILITY)
    }
}

/// Spawns the given sweep if the policy says so and a runtime is available.
pub(crate) fn spawn_cleanup<F>(policy: CleanupPolicy, sweep: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    if !policy.should_run() {
        return None;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(sweep)),
        Err(_) => {
            tracing::debug!("Skipping cache cleanup outside of a tokio runtime");
            None
        }
    }
}

/// The combined L2 → L1 cache. Cheap to clone; clones share both tiers.
#[derive(Clone)]
pub struct RequestCache {
    memory: MemoryCache,
    persistent: Option<PersistentCache>,
}

impl RequestCache {
    /// Creates a cache with both tiers.
    pub fn new(memory: MemoryCache, persistent: PersistentCache) -> Self {
        Self {
            memory,
            persistent: Some(persistent),
        }
    }

    /// Creates a cache which only keeps entries in process memory.
    pub fn memory_only(memory: MemoryCache) -> Self {
        Self {
            memory,
            persistent: None,
        }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn persistent(&self) -> Option<&PersistentCache> {
        self.persistent.as_ref()
    }

    /// Looks up a live entry, consulting L2 first and L1 second.
    ///
    /// An L1 hit is copied into L2 so that repeated lookups stay in process.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key).await {
            return Some(entry);
        }

        let entry = self.persistent.as_ref()?.get(key).await?;
        self.memory.insert(entry.clone()).await;
        tracing::trace!("Cache {} ({}): L1 hit, copied to L2", key, entry.tag);

        Some(entry)
    }

    /// Stores a value in both tiers, replacing any previous entry under the key.
    #[tracing::instrument(level = "trace", skip(self, data))]
    pub async fn set(&self, key: &str, tag: &str, data: Vec<u8>, ttl: Duration) {
        let entry = CacheEntry::new(key, tag, data, ttl);

        if let Some(persistent) = &self.persistent {
            persistent.set(entry.clone()).await;
        }
        self.memory.insert(entry).await;
    }

    /// Removes all expired entries from both tiers.
    pub async fn delete_expired(&self) {
        if let Some(persistent) = &self.persistent {
            persistent.delete_expired().await;
        }
        self.memory.delete_expired().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    fn two_tier() -> (RequestCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = RequestCache::new(
            MemoryCache::new(CleanupPolicy::never()),
            PersistentCache::new(store.clone(), "cache", CleanupPolicy::never()),
        );

        (cache, store)
    }

    #[test]
    fn entries_serialize_with_short_names() {
        let entry = CacheEntry::new("abc", "tag1", b"hello".to_vec(), Duration::from_secs(60));
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["k"], "abc");
        assert_eq!(json["g"], "tag1");
        assert_eq!(json["b"], "aGVsbG8=");
        assert!(json["t"].is_string());
        assert!(json["e"].is_string());
        assert_eq!(serde_json::from_value::<CacheEntry>(json).unwrap(), entry);
    }

    #[test]
    fn huge_ttls_saturate() {
        let entry = CacheEntry::new("k", "", Vec::new(), Duration::MAX);
        assert_eq!(entry.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!entry.is_expired());
    }

    #[test]
    fn cleanup_policy_is_clamped() {
        assert_eq!(CleanupPolicy::new(3.0).probability(), 1.0);
        assert_eq!(CleanupPolicy::new(-1.0).probability(), 0.0);
        assert_eq!(CleanupPolicy::new(f64::NAN).probability(), 0.0);
        assert!(CleanupPolicy::always().should_run());
        assert!(!CleanupPolicy::never().should_run());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (cache, _) = two_tier();
        cache
            .set("abc", "tag1", b"hello".to_vec(), Duration::from_secs(3600))
            .await;

        let entry = cache.get("abc").await.unwrap();
        assert_eq!(entry.data, b"hello");
        assert_eq!(entry.tag, "tag1");

        let remaining = entry.expires_at - Utc::now();
        assert!(remaining > chrono::Duration::minutes(59));
        assert!(remaining <= chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn expired_entries_vanish_from_both_tiers() {
        let (cache, store) = two_tier();
        cache
            .set("abc", "tag1", b"hello".to_vec(), Duration::from_millis(1))
            .await;

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.get("abc").await, None);
        assert!(!cache.memory().contains("abc").await);
        assert!(store.documents("cache").await.is_empty());
    }

    #[tokio::test]
    async fn l1_hits_are_copied_into_l2() {
        let (cache, store) = two_tier();
        let other = RequestCache::new(
            MemoryCache::new(CleanupPolicy::never()),
            PersistentCache::new(store.clone(), "cache", CleanupPolicy::never()),
        );

        cache
            .set("shared", "tag", b"value".to_vec(), Duration::from_secs(60))
            .await;
        assert!(!other.memory().contains("shared").await);

        assert_eq!(other.get("shared").await.unwrap().data, b"value");
        assert!(other.memory().contains("shared").await);

        // L2 now answers even while L1 is unreachable.
        store.set_unavailable(true);
        assert_eq!(other.get("shared").await.unwrap().data, b"value");
    }

    #[tokio::test]
    async fn replacing_keeps_a_single_persistent_entry() {
        let (cache, store) = two_tier();
        cache
            .set("abc", "first", b"1".to_vec(), Duration::from_secs(60))
            .await;
        cache
            .set("abc", "second", b"2".to_vec(), Duration::from_secs(60))
            .await;

        let documents = store.documents("cache").await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0]["g"], "second");
        assert_eq!(cache.get("abc").await.unwrap().data, b"2");
    }

    #[tokio::test]
    async fn store_outages_degrade_to_misses() {
        let (cache, store) = two_tier();
        store.set_unavailable(true);

        cache
            .set("abc", "tag", b"hello".to_vec(), Duration::from_secs(60))
            .await;
        // The write to L1 is dropped, L2 still has it.
        assert_eq!(cache.get("abc").await.unwrap().data, b"hello");

        let fresh = RequestCache::new(
            MemoryCache::new(CleanupPolicy::never()),
            PersistentCache::new(store.clone(), "cache", CleanupPolicy::never()),
        );
        assert_eq!(fresh.get("abc").await, None);
    }

    #[tokio::test]
    async fn memory_only_cache_works_without_a_store() {
        let cache = RequestCache::memory_only(MemoryCache::new(CleanupPolicy::never()));
        cache
            .set("abc", "tag", b"hello".to_vec(), Duration::from_secs(60))
            .await;

        assert_eq!(cache.get("abc").await.unwrap().data, b"hello");
        assert!(cache.persistent().is_none());
    }

    #[tokio::test]
    async fn delete_expired_sweeps_both_tiers() {
        let (cache, store) = two_tier();
        cache
            .set("old", "tag", b"1".to_vec(), Duration::from_millis(1))
            .await;
        cache
            .set("new", "tag", b"2".to_vec(), Duration::from_secs(60))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        cache.delete_expired().await;

        assert_eq!(cache.memory().len().await, 1);
        assert_eq!(store.documents("cache").await.len(), 1);
        assert_eq!(store.documents("cache").await[0]["k"], "new");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_access_never_sees_partial_entries() {
        let store = Arc::new(MemoryStore::new());
        let cache = RequestCache::new(
            MemoryCache::new(CleanupPolicy::always()),
            PersistentCache::new(store, "cache", CleanupPolicy::always()),
        );

        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..50u64 {
                    let tag = format!("w{}-r{}", worker, round);
                    // Every other write expires right away.
                    let ttl = Duration::from_millis(if round % 2 == 0 { 1 } else { 60_000 });
                    cache.set("shared", &tag, tag.as_bytes().repeat(64), ttl).await;

                    if let Some(entry) = cache.get("shared").await {
                        assert_eq!(entry.key, "shared");
                        assert_eq!(entry.data, entry.tag.as_bytes().repeat(64));
                    }

                    if round % 10 == 0 {
                        cache.delete_expired().await;
                    }
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
            .expect("cache operations deadlocked");
    }
}
