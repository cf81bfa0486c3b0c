//! Environment driven configuration shared by all connector components.
//!
//! Every variable is prefixed with the upper-cased data source name, e.g. a
//! `jira` connector reads `JIRA_RETRY`, `JIRA_ES_URL` and so on. See the crate
//! documentation for the full list.

use crate::tools::redact::Redactor;
use crate::tools::time;
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

/// Number of retries performed for failed requests unless configured otherwise.
pub const DEFAULT_RETRY: u32 = 5;

/// Chance of triggering an expired-entry sweep on each cache access.
pub const DEFAULT_CACHE_CLEANUP_PROBABILITY: f64 = 0.02;

/// Per-request timeout of the HTTP transport.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration of a single connector process.
#[derive(Clone)]
pub struct Context {
    /// Prefix of all environment variables, e.g. `JIRA_`.
    pub prefix: String,
    /// Console verbosity: 0 - info, 1 - debug, 2 and above - trace.
    ///
    /// See [`crate::logging::default_filter`].
    pub debug: u8,
    /// How many times failed requests are retried.
    pub retry: u32,
    /// Skips requests marked as side effects.
    pub dry_run: bool,
    /// Disables the request cache altogether.
    pub no_cache: bool,
    /// Base URL of the document store (ElasticSearch / OpenSearch).
    pub es_url: Option<String>,
    pub es_user: String,
    pub es_pass: String,
    pub http_timeout: Duration,
    pub cache_cleanup_probability: f64,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub(crate) redactor: Redactor,
}

impl Context {
    /// Reads the configuration of the given data source from the process environment.
    pub fn from_env(datasource: &str) -> anyhow::Result<Self> {
        Self::from_lookup(datasource, |name| std::env::var(name).ok())
    }

    /// Reads the configuration using the given variable lookup.
    pub fn from_lookup<F>(datasource: &str, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = format!("{}_", datasource.trim().to_uppercase());
        let env = |suffix: &str| lookup(&format!("{}{}", prefix, suffix));

        let debug = env("DEBUG")
            .map(|value| parse_var::<u8>(&prefix, "DEBUG", &value))
            .transpose()?
            .unwrap_or(0);

        let retry = env("RETRY")
            .map(|value| parse_var::<u32>(&prefix, "RETRY", &value))
            .transpose()?
            .unwrap_or(DEFAULT_RETRY);

        let http_timeout = env("HTTP_TIMEOUT")
            .map(|value| parse_var::<u64>(&prefix, "HTTP_TIMEOUT", &value))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        let cache_cleanup_probability = env("CACHE_CLEANUP_PROBABILITY")
            .map(|value| parse_var::<f64>(&prefix, "CACHE_CLEANUP_PROBABILITY", &value))
            .transpose()?
            .unwrap_or(DEFAULT_CACHE_CLEANUP_PROBABILITY);
        if !(0.0..=1.0).contains(&cache_cleanup_probability) {
            anyhow::bail!(
                "{}CACHE_CLEANUP_PROBABILITY must be within 0.0 and 1.0 but is {}",
                prefix,
                cache_cleanup_probability
            );
        }

        let date_from = env("DATE_FROM")
            .map(|value| time::parse_any(&value).with_context(|| format!("Invalid {}DATE_FROM", prefix)))
            .transpose()?;
        let date_to = env("DATE_TO")
            .map(|value| time::parse_any(&value).with_context(|| format!("Invalid {}DATE_TO", prefix)))
            .transpose()?;

        let tags = env("TAGS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_owned)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default();

        let redactor = Redactor::new();
        let es_url = env("ES_URL")
            .map(|url| url.trim_end_matches('/').to_owned())
            .filter(|url| !url.is_empty());
        let es_user = env("ES_USER").unwrap_or_default();
        let es_pass = env("ES_PASS").unwrap_or_default();
        if let Some(url) = &es_url {
            redactor.add(url);
        }
        redactor.add(&es_pass);

        Ok(Self {
            debug,
            retry,
            dry_run: env("DRY_RUN").map(|v| string_to_bool(&v)).unwrap_or(false),
            no_cache: env("NO_CACHE").map(|v| string_to_bool(&v)).unwrap_or(false),
            es_url,
            es_user,
            es_pass,
            http_timeout,
            cache_cleanup_probability,
            project: env("PROJECT").filter(|project| !project.is_empty()),
            tags,
            date_from,
            date_to,
            redactor,
            prefix,
        })
    }

    /// Returns the redactor shared by everything built from this context.
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }
}

impl Default for Context {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            debug: 0,
            retry: DEFAULT_RETRY,
            dry_run: false,
            no_cache: false,
            es_url: None,
            es_user: String::new(),
            es_pass: String::new(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            cache_cleanup_probability: DEFAULT_CACHE_CLEANUP_PROBABILITY,
            project: None,
            tags: Vec::new(),
            date_from: None,
            date_to: None,
            redactor: Redactor::new(),
        }
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("prefix", &self.prefix)
            .field("debug", &self.debug)
            .field("retry", &self.retry)
            .field("dry_run", &self.dry_run)
            .field("no_cache", &self.no_cache)
            .field("es_url", &self.es_url.as_ref().map(|url| self.redactor.filter(url)))
            .field("es_user", &self.es_user)
            .field("http_timeout", &self.http_timeout)
            .field("cache_cleanup_probability", &self.cache_cleanup_probability)
            .field("project", &self.project)
            .field("tags", &self.tags)
            .field("date_from", &self.date_from)
            .field("date_to", &self.date_to)
            .finish_non_exhaustive()
    }
}

fn parse_var<T>(prefix: &str, suffix: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("Invalid value '{}' for {}{}", value, prefix, suffix))
}

/// Interprets a configuration value as boolean.
///
/// Empty strings, `0`, `0.0`, `f`, `false`, `n` and `no` (in any case) are false,
/// everything else is true.
///
/// # Example
/// ```
/// use connector_kit::context::string_to_bool;
///
/// assert!(string_to_bool("yes"));
/// assert!(!string_to_bool("FALSE"));
/// assert!(!string_to_bool("0.00"));
/// ```
pub fn string_to_bool(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    match value.as_str() {
        "" | "f" | "false" | "n" | "no" => false,
        "t" | "true" => true,
        _ => value.parse::<f64>().map(|number| number != 0.0).unwrap_or(true),
    }
}
