//! Ships log lines into an index of the document store.
//!
//! The [`LogShipperLayer`] turns every `tracing` event into a redacted
//! [`LogDocument`] and hands it to a bounded channel. A background task drains
//! the channel and stores the documents in batches, either once enough lines
//! are buffered or on a fixed interval. When the layer is dropped the channel
//! closes, the remaining lines are flushed and the task ends.
//!
//! Events emitted while shipping (e.g. a failing store) are not shipped again.

use crate::store::DocumentStore;
use crate::tools::redact::Redactor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{Debug, Write as _};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context as LayerContext;
use tracing_subscriber::registry::LookupSpan;

/// Default name of the log index.
pub const DEFAULT_LOG_INDEX: &str = "connector-logs";

/// Status recorded with every line unless configured otherwise.
pub const DEFAULT_STATUS: &str = "inprogress";

const LOG_BUFFER_SIZE: usize = 8192;
const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(15);
const AUTOMATIC_FLUSH_SIZE: usize = 64;

/// Name of the span wrapping each flush. Events within it are not shipped.
const SHIPPING_SPAN: &str = "ship_logs";

/// A single shipped log line.
#[derive(Clone, Debug, Serialize)]
pub struct LogDocument {
    pub connector: String,
    pub status: String,
    pub level: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

/// Configures and starts log shipping.
pub struct LogShipper {
    store: Arc<dyn DocumentStore>,
    index: String,
    connector: String,
    status: String,
    max_level: Level,
    redactor: Redactor,
}

impl LogShipper {
    pub fn new(store: Arc<dyn DocumentStore>, connector: &str, redactor: Redactor) -> Self {
        Self {
            store,
            index: DEFAULT_LOG_INDEX.to_owned(),
            connector: connector.to_owned(),
            status: DEFAULT_STATUS.to_owned(),
            max_level: Level::INFO,
            redactor,
        }
    }

    pub fn with_index(mut self, index: &str) -> Self {
        self.index = index.to_owned();
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_owned();
        self
    }

    /// Ships events up to the given verbosity (`INFO` by default).
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    /// Spawns the background task and returns the layer feeding it.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(self) -> (LogShipperLayer, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<LogDocument>(LOG_BUFFER_SIZE);

        let store = self.store;
        let index = self.index;
        let handle = tokio::spawn(async move {
            run_background_loop(store.as_ref(), &index, rx).await;
        });

        let layer = LogShipperLayer {
            tx,
            connector: self.connector,
            status: self.status,
            max_level: self.max_level,
            redactor: self.redactor,
        };

        (layer, handle)
    }
}

/// `tracing` layer which forwards events to the log shipping task.
pub struct LogShipperLayer {
    tx: mpsc::Sender<LogDocument>,
    connector: String,
    status: String,
    max_level: Level,
    redactor: Redactor,
}

impl<S> Layer<S> for LogShipperLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: LayerContext<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level {
            return;
        }

        if let Some(scope) = ctx.event_scope(event) {
            if scope.from_root().any(|span| span.name() == SHIPPING_SPAN) {
                return;
            }
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let document = LogDocument {
            connector: self.connector.clone(),
            status: self.status.clone(),
            level: metadata.level().to_string(),
            target: metadata.target().to_owned(),
            created_at: Utc::now(),
            message: self.redactor.filter(&visitor.finish()).into_owned(),
        };

        // Logging must never block: lines are dropped while the buffer is full.
        let _ = self.tx.try_send(document);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_owned()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

async fn run_background_loop(
    store: &dyn DocumentStore,
    index: &str,
    mut rx: mpsc::Receiver<LogDocument>,
) {
    let mut buffer = Vec::new();
    let mut interval = tokio::time::interval(LOG_FLUSH_INTERVAL);

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => {
                    buffer.push(line);
                    if buffer.len() >= AUTOMATIC_FLUSH_SIZE {
                        flush_batch(store, index, &mut buffer).await;
                    }
                }
                None => break,
            },
            _ = interval.tick() => {
                flush_batch(store, index, &mut buffer).await;
            }
        }
    }

    // Channel closed, flush remaining lines...
    flush_batch(store, index, &mut buffer).await;
}

#[tracing::instrument(level = "info", name = "ship_logs", skip(store, buffer))]
async fn flush_batch(store: &dyn DocumentStore, index: &str, buffer: &mut Vec<LogDocument>) {
    let lines = buffer.len();

    for (shipped, line) in buffer.drain(..).enumerate() {
        let result = match serde_json::to_value(&line) {
            Ok(document) => store.create_document(index, None, document).await,
            Err(err) => Err(err.into()),
        };

        if let Err(err) = result {
            tracing::error!(
                "Failed to ship log lines to '{}', dropping {} lines: {:#}",
                index,
                lines - shipped,
                err
            );
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn events_are_shipped_as_redacted_documents() {
        let store = Arc::new(MemoryStore::new());
        let redactor = Redactor::new();
        redactor.add("s3cr3t");

        let (layer, handle) = LogShipper::new(store.clone(), "jira", redactor)
            .with_index("logs")
            .with_status("done")
            .start();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("connecting with s3cr3t");
            tracing::debug!("too verbose");
            tracing::warn!(items = 3, "partial sync");
        });

        // Dropping the subscriber closes the channel and flushes.
        handle.await.unwrap();

        let documents = store.documents("logs").await;
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["message"], "connecting with [redacted]");
        assert_eq!(documents[0]["connector"], "jira");
        assert_eq!(documents[0]["status"], "done");
        assert_eq!(documents[0]["level"], "INFO");
        assert_eq!(documents[1]["message"], "partial sync items=3");
        assert_eq!(documents[1]["level"], "WARN");
        assert!(documents[1]["created_at"].is_string());
    }

    #[tokio::test]
    async fn events_while_shipping_are_not_shipped() {
        let store = Arc::new(MemoryStore::new());
        let (layer, handle) = LogShipper::new(store.clone(), "git", Redactor::new())
            .with_max_level(Level::TRACE)
            .start();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("ship_logs");
            let _entered = span.enter();
            tracing::error!("store is down");
        });

        handle.await.unwrap();
        assert!(store.documents(DEFAULT_LOG_INDEX).await.is_empty());
    }

    #[tokio::test]
    async fn store_failures_drop_the_batch() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let mut buffer = vec![LogDocument {
            connector: "git".into(),
            status: DEFAULT_STATUS.into(),
            level: "INFO".into(),
            target: "test".into(),
            created_at: Utc::now(),
            message: "hello".into(),
        }];
        flush_batch(store.as_ref(), DEFAULT_LOG_INDEX, &mut buffer).await;

        assert!(buffer.is_empty());
        store.set_unavailable(false);
        assert!(store.documents(DEFAULT_LOG_INDEX).await.is_empty());
    }
}
