//! The request engine.
//!
//! [`HttpClient::request`] runs the full pipeline:
//!
//! 1. requests marked with `skip_in_dry_run` are skipped in dry-run mode
//! 2. if `cache_for` is set (and caching is enabled), the [`RequestCache`] is
//!    consulted using [`cache_key`]
//! 3. the request is performed once, or with retries if `retry` is set
//! 4. the response is classified by the status ranges of the request
//! 5. successful responses with a cacheable status are written to the cache
//!
//! After the `n`-th failed attempt the engine waits `(n + 1)²` seconds before
//! trying again and gives up after the configured number of retries, i.e.
//! `retries + 1` attempts in total. Every kind of failure is retried the same way.

use crate::cache::RequestCache;
use crate::context::Context;
use crate::http::error::{ResultExt, StatusError, StatusErrorKind};
use crate::http::{Body, Request, Response, Transport, decode_envelope, encode_envelope};
use crate::tools::redact::Redactor;
use crate::tools::{MAX_PAYLOAD_PRINT_LEN, digest, truncate_bytes, truncate_str};
use anyhow::Context as _;
use std::sync::Arc;
use std::time::Duration;

/// Backoff unit, multiplied by `(n + 1)²` after the `n`-th failure.
const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Computes the cache key of a request: hex encoded SHA-256 over method, url,
/// headers, payload and cookies (see [`digest`]).
pub fn cache_key(request: &Request) -> String {
    let mut parts: Vec<&[u8]> = vec![request.method.as_str().as_bytes(), request.url.as_bytes()];
    for (name, value) in &request.headers {
        parts.push(name.as_bytes());
        parts.push(value.as_bytes());
    }
    parts.push(request.payload.as_ref());
    parts.extend(request.cookies.iter().map(|cookie| cookie.as_bytes()));

    digest(parts)
}

/// Executes [`Request`]s against a [`Transport`]. Cheap to clone.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    cache: Option<RequestCache>,
    redactor: Redactor,
    retries: u32,
    debug: u8,
    dry_run: bool,
    no_cache: bool,
}

impl HttpClient {
    /// Creates a client using the retry, dry-run and cache settings of the context.
    pub fn new(context: &Context, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: None,
            redactor: context.redactor().clone(),
            retries: context.retry,
            debug: context.debug,
            dry_run: context.dry_run,
            no_cache: context.no_cache,
        }
    }

    /// Enables caching of requests which specify `cache_for`.
    pub fn with_cache(mut self, cache: RequestCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&RequestCache> {
        self.cache.as_ref()
    }

    /// Performs the request with dry-run handling, caching and retries.
    pub async fn request(&self, request: &Request) -> anyhow::Result<Response> {
        if request.skip_in_dry_run && self.dry_run {
            tracing::debug!(
                "dry-run: {} skipped in dry-run mode",
                self.describe_request(request)
            );
            return Ok(Response::default());
        }

        let caching = match (&self.cache, request.cache_for) {
            (Some(cache), Some(ttl)) if !self.no_cache => Some((cache, cache_key(request), ttl)),
            _ => None,
        };

        if let Some((cache, key, _)) = &caching {
            if let Some(response) = self.lookup(cache, key).await {
                return Ok(response);
            }
        }

        let (response, cacheable) = if request.retry {
            self.attempt_with_retries(request).await?
        } else {
            self.attempt(request).await?
        };

        if let Some((cache, key, ttl)) = caching {
            if cacheable {
                self.store(cache, &key, request, &response, ttl).await;
            }
        }

        Ok(response)
    }

    /// Performs and classifies the request exactly once, bypassing the cache.
    pub async fn request_once(&self, request: &Request) -> anyhow::Result<Response> {
        self.attempt(request).await.map(|(response, _)| response)
    }

    async fn lookup(&self, cache: &RequestCache, key: &str) -> Option<Response> {
        let entry = cache.get(key).await?;

        match decode_envelope(&entry.data) {
            Ok(response) => {
                tracing::trace!("Cache hit {} ({})", key, entry.tag);
                Some(response)
            }
            Err(err) => {
                tracing::warn!(
                    "Ignoring unreadable cache entry {} ({}): {:#}",
                    key,
                    entry.tag,
                    err
                );
                None
            }
        }
    }

    async fn store(
        &self,
        cache: &RequestCache,
        key: &str,
        request: &Request,
        response: &Response,
        ttl: Duration,
    ) {
        let data = match encode_envelope(response) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!("Not caching {}: {:#}", self.describe_request(request), err);
                return;
            }
        };

        let tag = format!(
            "{} -> sts={},js={},resp={},cks={},hdrs={}",
            self.describe_request(request),
            response.status,
            u8::from(response.body.is_json()),
            response.body.to_bytes().len(),
            response.cookies.len(),
            response.headers.len()
        );
        let tag = self.redactor.filter(&tag);

        cache.set(key, &tag, data, ttl).await;
    }

    async fn attempt_with_retries(&self, request: &Request) -> anyhow::Result<(Response, bool)> {
        let mut failures = 0u32;

        loop {
            match self.attempt(request).await {
                Ok(outcome) => {
                    if failures > 0 {
                        tracing::info!(
                            "#{} retry of {} succeeded",
                            failures,
                            self.describe_attempt(request, Some(outcome.0.status), None)
                        );
                    }
                    return Ok(outcome);
                }
                Err(err) => {
                    failures += 1;
                    let status = crate::http::status_of(&err);

                    if failures > self.retries {
                        tracing::warn!(
                            "{} failed after {} retries",
                            self.describe_attempt(request, status, Some(&err)),
                            self.retries
                        );
                        return Err(err);
                    }

                    let delay = BACKOFF_UNIT * (failures + 1).pow(2);
                    tracing::info!(
                        "will do #{} retry of {} after {} seconds",
                        failures,
                        self.describe_attempt(request, status, Some(&err)),
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Performs a single exchange and classifies the response.
    ///
    /// Returns the response and whether it may be cached.
    async fn attempt(&self, request: &Request) -> anyhow::Result<(Response, bool)> {
        let raw = self.transport.execute(request).await.with_context(|| {
            format!(
                "Request failed for method: {} url: {} headers: {:?} payload: {}",
                request.method,
                request.url,
                request.headers,
                truncate_bytes(&request.payload, MAX_PAYLOAD_PRINT_LEN, true)
            )
        })?;

        let status = raw.status;
        let details = || {
            format!(
                "method: {} url: {} headers: {:?} status: {} payload: {} body: {}",
                request.method,
                request.url,
                request.headers,
                status,
                truncate_bytes(&request.payload, MAX_PAYLOAD_PRINT_LEN, true),
                truncate_bytes(&raw.body, MAX_PAYLOAD_PRINT_LEN, true)
            )
        };

        let body = if request.json_statuses.contains(status) {
            Body::Json(
                serde_json::from_slice(&raw.body)
                    .with_context(|| format!("Failed to parse JSON response for {}", details()))?,
            )
        } else {
            Body::Raw(raw.body.clone())
        };

        if request.error_statuses.contains(status) {
            return Err(anyhow::anyhow!(details()))
                .with_status_error(StatusError::new(request, status, StatusErrorKind::ErrorStatus));
        }

        if !request.ok_statuses.is_empty() && !request.ok_statuses.contains(status) {
            return Err(anyhow::anyhow!(details()))
                .with_status_error(StatusError::new(request, status, StatusErrorKind::NotOk));
        }

        let cacheable = request.cache_statuses.contains(status);
        let response = Response {
            body,
            status,
            cookies: raw.cookies,
            headers: raw.headers,
        };

        Ok((response, cacheable))
    }

    fn describe_request(&self, request: &Request) -> String {
        format!(
            "{}.{}(#h={},pl={},cks={})",
            request.method,
            request.url,
            request.headers.len(),
            request.payload.len(),
            request.cookies.len()
        )
    }

    fn describe_attempt(
        &self,
        request: &Request,
        status: Option<u16>,
        err: Option<&anyhow::Error>,
    ) -> String {
        let mut info = format!(
            "{}.{}:{}={}",
            request.method,
            request.url,
            truncate_bytes(&request.payload, MAX_PAYLOAD_PRINT_LEN, true),
            status.unwrap_or_default()
        );

        if let Some(err) = err {
            if self.debug > 1 {
                info.push_str(&format!(" error: {:?}", err));
            } else {
                info.push_str(&format!(
                    " error: {}",
                    truncate_str(&format!("{:#}", err), MAX_PAYLOAD_PRINT_LEN, true)
                ));
            }
        }

        info
    }
}
