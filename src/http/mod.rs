//! Cached, retrying HTTP requests.
//!
//! A [`Request`] describes a single call together with the rules used to
//! classify its response. The [`HttpClient`] executes it via a [`Transport`],
//! optionally consulting and populating the [`RequestCache`](crate::cache::RequestCache)
//! and retrying failed attempts with a quadratic backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! let request = Request::get("https://jira.example.com/rest/api/2/search")
//!     .header("Authorization", format!("Bearer {}", token))
//!     .retry(true)
//!     .cache_for(Duration::from_secs(3600));
//!
//! let response = services.http.request(&request).await?;
//! ```

use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub mod client;
pub mod envelope;
pub mod error;
pub mod status;
pub mod transport;

pub use client::{HttpClient, cache_key};
pub use envelope::{decode_envelope, encode_envelope};
pub use error::{StatusError, StatusErrorKind, status_of};
pub use reqwest::Method;
pub use status::StatusRanges;
pub use transport::{RawResponse, ReqwestTransport, Transport};

/// A request along with its classification and caching rules.
///
/// Defaults: 2xx bodies are parsed as JSON, 4xx and 5xx are errors, every
/// status passes the ok check and 2xx responses may be cached. Neither
/// retries nor caching are enabled.
#[derive(Clone, Debug)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub payload: Bytes,
    /// Cookies sent along, each as `name=value`.
    pub cookies: Vec<String>,
    /// Responses with these statuses are parsed as JSON.
    pub json_statuses: StatusRanges,
    /// Responses with these statuses are errors.
    pub error_statuses: StatusRanges,
    /// If not empty, responses with other statuses are errors.
    pub ok_statuses: StatusRanges,
    /// Successful responses with these statuses are written to the cache.
    pub cache_statuses: StatusRanges,
    pub retry: bool,
    /// Enables the cache for this request, entries live this long.
    pub cache_for: Option<Duration>,
    /// Turns the request into a no-op in dry-run mode.
    pub skip_in_dry_run: bool,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            payload: Bytes::new(),
            cookies: Vec::new(),
            json_statuses: StatusRanges::success(),
            error_statuses: StatusRanges::failure(),
            ok_statuses: StatusRanges::none(),
            cache_statuses: StatusRanges::success(),
            retry: false,
            cache_for: None,
            skip_in_dry_run: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sends the given JSON document as payload.
    pub fn json_payload(self, payload: &Value) -> Self {
        self.payload(payload.to_string())
    }

    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    pub fn cookies(mut self, cookies: Vec<String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn json_statuses(mut self, ranges: StatusRanges) -> Self {
        self.json_statuses = ranges;
        self
    }

    pub fn error_statuses(mut self, ranges: StatusRanges) -> Self {
        self.error_statuses = ranges;
        self
    }

    pub fn ok_statuses(mut self, ranges: StatusRanges) -> Self {
        self.ok_statuses = ranges;
        self
    }

    pub fn cache_statuses(mut self, ranges: StatusRanges) -> Self {
        self.cache_statuses = ranges;
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache_for(mut self, ttl: Duration) -> Self {
        self.cache_for = Some(ttl);
        self
    }

    pub fn skip_in_dry_run(mut self, skip: bool) -> Self {
        self.skip_in_dry_run = skip;
        self
    }
}

/// Body of a response, parsed or raw depending on the JSON status ranges.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Json(Value),
    Raw(Bytes),
}

impl Default for Body {
    fn default() -> Self {
        Body::Raw(Bytes::new())
    }
}

impl Body {
    pub fn is_json(&self) -> bool {
        matches!(self, Body::Json(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            Body::Raw(_) => None,
        }
    }

    /// Returns the body as sent over the wire (JSON is re-serialized).
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Json(value) => Bytes::from(value.to_string()),
            Body::Raw(bytes) => bytes.clone(),
        }
    }
}

/// A classified response. The default value is what a skipped dry-run request yields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    pub body: Body,
    pub status: u16,
    /// Cookies set by the server, each as `name=value`.
    pub cookies: Vec<String>,
    pub headers: BTreeMap<String, Vec<String>>,
}
