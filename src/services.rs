//! Wires all components of a connector from its [`Context`].

use crate::cache::memory::MemoryCache;
use crate::cache::persistent::{DEFAULT_CACHE_INDEX, PersistentCache};
use crate::cache::{CleanupPolicy, RequestCache};
use crate::context::Context;
use crate::http::{HttpClient, ReqwestTransport, Transport};
use crate::logging::job::{DEFAULT_JOB_LOG_INDEX, JobLogger};
use crate::logging::shipper::LogShipper;
use crate::store::DocumentStore;
use crate::store::opensearch::OpenSearchStore;
use crate::watermark::{DEFAULT_WATERMARK_INDEX, LastSyncTracker};
use anyhow::Context as _;
use std::sync::Arc;

/// The shared services of a connector process. Cheap to clone.
///
/// Without a configured document store, the cache only lives in process
/// memory and neither watermarks nor job logs are kept.
#[derive(Clone)]
pub struct Services {
    pub context: Context,
    pub store: Option<Arc<dyn DocumentStore>>,
    pub cache: RequestCache,
    pub http: HttpClient,
    pub last_sync: Option<LastSyncTracker>,
    pub job_log: Option<JobLogger>,
}

impl Services {
    /// Connects to the configured document store and creates the HTTP transport.
    pub async fn from_context(context: Context) -> anyhow::Result<Self> {
        let store = match context.es_url {
            Some(_) => Some(Arc::new(OpenSearchStore::from_context(&context)?) as Arc<dyn DocumentStore>),
            None => None,
        };
        let transport = Arc::new(ReqwestTransport::from_context(&context)?);

        Self::with_parts(context, store, transport).await
    }

    /// Assembles the services around the given store and transport and
    /// bootstraps the indices used by the cache and the watermarks.
    pub async fn with_parts(
        context: Context,
        store: Option<Arc<dyn DocumentStore>>,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let cleanup = CleanupPolicy::new(context.cache_cleanup_probability);
        let memory = MemoryCache::new(cleanup);

        let (cache, last_sync, job_log) = match &store {
            Some(store) => {
                let persistent = PersistentCache::new(store.clone(), DEFAULT_CACHE_INDEX, cleanup);
                if let Err(err) = persistent.ensure_index().await {
                    tracing::warn!("Failed to prepare the cache index: {:#}", err);
                }

                let tracker = LastSyncTracker::new(store.clone(), DEFAULT_WATERMARK_INDEX);
                tracker
                    .ensure_index()
                    .await
                    .context("Failed to prepare the watermark index")?;

                let job_log = JobLogger::new(store.clone(), DEFAULT_JOB_LOG_INDEX);
                if let Err(err) = job_log.ensure_index().await {
                    tracing::warn!("Failed to prepare the job log index: {:#}", err);
                }

                (RequestCache::new(memory, persistent), Some(tracker), Some(job_log))
            }
            None => {
                tracing::info!("No document store configured, caching in memory only");
                (RequestCache::memory_only(memory), None, None)
            }
        };

        let http = HttpClient::new(&context, transport).with_cache(cache.clone());

        Ok(Self {
            context,
            store,
            cache,
            http,
            last_sync,
            job_log,
        })
    }

    /// Prepares log shipping into the document store, if one is configured.
    pub fn log_shipper(&self, connector: &str) -> Option<LogShipper> {
        self.store
            .as_ref()
            .map(|store| LogShipper::new(store.clone(), connector, self.context.redactor().clone()))
    }
}
