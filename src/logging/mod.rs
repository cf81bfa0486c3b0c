//! Tracing and logging infrastructure.
//!
//! Provides [`setup_tracing`] which installs the `tracing` subscriber with a
//! redacting console output and, optionally, a [`shipper::LogShipperLayer`]
//! which stores log lines in the document store. The [`job::JobLogger`]
//! records the status of sync jobs next to them.
//!
//! # Usage
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = connector_kit::context::Context::from_env("jira")?;
//!     connector_kit::logging::setup_tracing(&context, None);
//!     // ... rest of the connector
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Console log filter (e.g., `info`, `connector_kit=debug`) | derived from `{DS}_DEBUG` |
//!
//! Without `RUST_LOG`, the debug level of the [`Context`] selects the filter:
//! `0` → `info`, `1` → `debug`, `2` and above → `trace`.
//!
//! # Output
//!
//! Plain text suitable for log aggregation, with secrets replaced:
//! ```text
//! INFO  connector_kit::http::client: GET https://[redacted]/_search failed after 5 retries
//! ```

use crate::context::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub mod job;
mod production;
pub mod shipper;

pub use production::RedactingLogFormat;

/// Initializes the tracing subscriber with redacting console output and optional log shipping.
///
/// # Panics
///
/// Panics if called more than once (tracing subscriber can only be set once).
pub fn setup_tracing(context: &Context, shipper: Option<shipper::LogShipperLayer>) {
    let console_layer = setup_console_layer(context);

    match shipper {
        Some(shipper_layer) => {
            Registry::default()
                .with(console_layer)
                .with(shipper_layer)
                .init();

            tracing::info!(
                "Tracing initialized successfully [reporting to console as well as the document store]"
            );
        }
        None => {
            Registry::default().with(console_layer).init();
            tracing::info!("Tracing initialized successfully [reporting to console only]");
        }
    }
}

/// Determines the filter used when `RUST_LOG` is absent.
pub fn default_filter(debug: u8) -> &'static str {
    match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Creates the console output layer (no ANSI, with span context, secrets removed).
fn setup_console_layer(context: &Context) -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(context.debug)));

    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(RedactingLogFormat::new(context.redactor().clone()))
        .with_filter(filter)
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_level_selects_filter() {
        assert_eq!(default_filter(0), "info");
        assert_eq!(default_filter(1), "debug");
        assert_eq!(default_filter(2), "trace");
        assert_eq!(default_filter(9), "trace");
    }
}
