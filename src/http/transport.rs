//! The network seam of the request engine.

use crate::context::Context;
use crate::http::Request;
use anyhow::Context as _;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, SET_COOKIE};
use reqwest::redirect::Policy;
use std::collections::BTreeMap;
use std::time::Duration;

/// An unclassified response as received from the server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
    /// Cookies set by the server, each as `name=value`.
    pub cookies: Vec<String>,
    pub headers: BTreeMap<String, Vec<String>>,
}

/// Performs a single HTTP exchange. Retries, caching and classification
/// happen in [`HttpClient`](crate::http::HttpClient).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &Request) -> anyhow::Result<RawResponse>;
}

/// [`Transport`] based on `reqwest` with a fixed per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, follow_redirects: bool) -> anyhow::Result<Self> {
        let redirects = if follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirects)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Creates a transport using the timeout of the context, following redirects.
    pub fn from_context(context: &Context) -> anyhow::Result<Self> {
        Self::new(context.http_timeout, true)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(level = "trace", skip_all, fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: &Request) -> anyhow::Result<RawResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url);

        let has_content_type = request
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        if !request.payload.is_empty() && !has_content_type {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !request.cookies.is_empty() {
            builder = builder.header(COOKIE, request.cookies.join("; "));
        }

        if !request.payload.is_empty() {
            builder = builder.body(request.payload.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let cookies = collect_cookies(response.headers());
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?;

        Ok(RawResponse {
            status,
            body,
            cookies,
            headers,
        })
    }
}

/// Extracts `name=value` from every `Set-Cookie` header, dropping attributes.
fn collect_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|cookie| !cookie.is_empty() && *cookie != "=")
        .map(str::to_owned)
        .collect()
}

/// Groups header values by their canonical (lower-case) name.
fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut result = BTreeMap::<String, Vec<String>>::new();
    for (name, value) in headers {
        result
            .entry(name.as_str().to_owned())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    result
}
