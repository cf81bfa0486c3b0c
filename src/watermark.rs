//! Last-sync watermarks.
//!
//! A connector resumes incremental syncs from the timestamp of the most recent
//! event it processed. The [`LastSyncTracker`] keeps one document per key in
//! its own index:
//!
//! ```json
//! { "key": "jira:ONAP", "last_update": "2024-03-01T12:00:00Z", "saved_at": "2024-03-01T12:05:13Z" }
//! ```
//!
//! A key which was never synced starts at the Unix epoch.
//!
//! The `key` field must be mapped as `keyword`, otherwise term lookups miss
//! keys like `jira:ONAP`. [`LastSyncTracker::ensure_index`] creates the index
//! with that mapping, but an index created by dynamic mapping (`key` as
//! `text`) is left untouched. Such an index has to be recreated or another
//! index name used.

use crate::store::{DocumentStore, FieldMapping, IndexDescription, Query, fetch_all};
use crate::tools::time;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default name of the watermark index.
pub const DEFAULT_WATERMARK_INDEX: &str = "connector-last-sync";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastSyncWatermark {
    pub key: String,
    pub last_update: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

/// Describes the watermark index.
pub fn watermark_index_description() -> IndexDescription {
    IndexDescription::with_fields([
        ("key", FieldMapping::Keyword),
        ("last_update", FieldMapping::Date),
        ("saved_at", FieldMapping::Date),
    ])
}

/// Reads and writes last-sync watermarks. Cheap to clone.
#[derive(Clone)]
pub struct LastSyncTracker {
    store: Arc<dyn DocumentStore>,
    index: String,
    /// Serializes writers so that each key ends up with a single row.
    lock: Arc<Mutex<()>>,
}

impl LastSyncTracker {
    pub fn new(store: Arc<dyn DocumentStore>, index: &str) -> Self {
        Self {
            store,
            index: index.to_owned(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Creates the watermark index unless it exists.
    pub async fn ensure_index(&self) -> anyhow::Result<()> {
        self.store
            .ensure_index(&self.index, watermark_index_description())
            .await
    }

    /// Returns the watermark of the given key.
    ///
    /// An unknown key is initialized with the Unix epoch, which is persisted
    /// before it is returned.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn get_last_sync(&self, key: &str) -> anyhow::Result<DateTime<Utc>> {
        let watermarks =
            fetch_all::<LastSyncWatermark>(self.store.as_ref(), &self.index, &Query::term("key", key))
                .await
                .with_context(|| format!("Failed to read the last sync of '{}'", key))?;

        if let Some(latest) = watermarks.iter().map(|watermark| watermark.last_update).max() {
            tracing::debug!("Resuming {} from {}", key, time::to_ymd_hms(&latest));
            return Ok(latest);
        }

        let epoch = time::epoch();
        tracing::info!("No last sync recorded for {}, starting from the epoch", key);
        self.set_last_sync(key, epoch).await?;

        Ok(epoch)
    }

    /// Records the watermark of the given key, replacing the previous one.
    ///
    /// All rows of the key are removed (whatever their document id) and a
    /// single row with the key as its id is written.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn set_last_sync(&self, key: &str, when: DateTime<Utc>) -> anyhow::Result<()> {
        let watermark = LastSyncWatermark {
            key: key.to_owned(),
            last_update: when,
            saved_at: Utc::now(),
        };
        let body = serde_json::to_value(&watermark).context("Failed to serialize watermark")?;

        let _guard = self.lock.lock().await;

        let removed = self
            .store
            .delete_by_query(&self.index, &Query::term("key", key))
            .await
            .with_context(|| format!("Failed to clear the last sync of '{}'", key))?;
        if removed > 1 {
            tracing::debug!("Replaced {} watermark rows of {}", removed, key);
        }

        self.store
            .create_document(&self.index, Some(key), body)
            .await
            .with_context(|| format!("Failed to store the last sync of '{}'", key))
    }
}
