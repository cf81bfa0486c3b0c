//! # Connector Kit
//!
//! Shared plumbing for data source connectors.
//!
//! Connectors pull data from remote APIs (issue trackers, code review systems,
//! mailing lists...) and resume incremental syncs where they stopped. This
//! crate provides the parts all of them need: cached and retrying HTTP
//! requests, a two-tier request cache backed by ElasticSearch / OpenSearch,
//! last-sync watermarks, job status logs and logging which keeps secrets out
//! of the output.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use connector_kit::context::Context;
//! use connector_kit::http::Request;
//! use connector_kit::services::Services;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = Context::from_env("jira")?;
//!     connector_kit::logging::setup_tracing(&context, None);
//!
//!     let services = Services::from_context(context).await?;
//!     let since = match &services.last_sync {
//!         Some(tracker) => tracker.get_last_sync("jira:ONAP").await?,
//!         None => connector_kit::tools::time::epoch(),
//!     };
//!
//!     let request = Request::get("https://jira.example.com/rest/api/2/search")
//!         .retry(true)
//!         .cache_for(Duration::from_secs(3600));
//!     let response = services.http.request(&request).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`context`] - Environment driven configuration
//! - [`logging`] - Tracing setup with redaction, optional log shipping and job status logs
//! - [`http`] - Request engine with retries, classification and caching
//! - [`cache`] - Two-tier request cache (document store + process memory)
//! - [`store`] - Document store abstraction and its OpenSearch implementation
//! - [`watermark`] - Last-sync tracking
//! - [`services`] - Wiring of all of the above
//! - [`tools`] - Utilities (truncation, redaction, date parsing)
//!
//! ## Environment Variables
//!
//! All variables are prefixed with the upper-cased data source name (`{DS}_`),
//! e.g. `JIRA_RETRY` for a `jira` connector.
//!
//! ### Core
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `{DS}_DEBUG` | Verbosity (`0` info, `1` debug, `2`+ trace) | `0` |
//! | `{DS}_RETRY` | Retries of failed requests | `5` |
//! | `{DS}_DRY_RUN` | Skip requests with side effects | `false` |
//! | `{DS}_NO_CACHE` | Disable the request cache | `false` |
//! | `{DS}_HTTP_TIMEOUT` | Per-request timeout in seconds | `60` |
//! | `{DS}_CACHE_CLEANUP_PROBABILITY` | Chance of an expired entry sweep per cache access | `0.02` |
//! | `{DS}_PROJECT` | Project filter | (none) |
//! | `{DS}_TAGS` | Comma separated tags | (empty) |
//! | `{DS}_DATE_FROM` / `{DS}_DATE_TO` | Date range of the sync | (none) |
//!
//! ### Document Store
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `{DS}_ES_URL` | ElasticSearch / OpenSearch URL | (none, cache in memory only) |
//! | `{DS}_ES_USER` | Username for basic auth | (empty) |
//! | `{DS}_ES_PASS` | Password for basic auth | (empty) |
//!
//! ### Observability
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Console log filter (e.g., `info`, `connector_kit=debug`) | derived from `{DS}_DEBUG` |

/// Two-tier request cache.
pub mod cache;

/// Environment driven configuration.
pub mod context;

/// Cached, retrying HTTP requests.
pub mod http;

/// Logging and tracing infrastructure.
pub mod logging;

/// Wiring of all components.
pub mod services;

/// Document store abstraction.
pub mod store;

/// Common utilities.
pub mod tools;

/// Last-sync watermarks.
pub mod watermark;
