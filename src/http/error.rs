//! Errors produced by response classification.
//!
//! A [`StatusError`] is attached as context to the descriptive `anyhow::Error`
//! of a rejected response. Callers which need to react to specific statuses
//! use [`status_of`] instead of parsing messages.

use crate::http::Request;
use std::fmt::{Display, Formatter};

/// Why a response was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusErrorKind {
    /// The status is within the error ranges of the request.
    ErrorStatus,
    /// The status is outside the non-empty ok ranges of the request.
    NotOk,
}

#[derive(Clone, Debug)]
pub struct StatusError {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub kind: StatusErrorKind,
}

impl StatusError {
    pub fn new(request: &Request, status: u16, kind: StatusErrorKind) -> Self {
        Self {
            method: request.method.to_string(),
            url: request.url.clone(),
            status,
            kind,
        }
    }
}

impl Display for StatusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            StatusErrorKind::ErrorStatus => write!(
                f,
                "{} {} responded with error status {}",
                self.method, self.url, self.status
            ),
            StatusErrorKind::NotOk => write!(
                f,
                "{} {} responded with unexpected status {}",
                self.method, self.url, self.status
            ),
        }
    }
}

impl std::error::Error for StatusError {}

/// Extension trait for attaching a [`StatusError`] to error results.
pub trait ResultExt<T> {
    fn with_status_error(self, error: StatusError) -> anyhow::Result<T>;
}

impl<T> ResultExt<T> for anyhow::Result<T> {
    fn with_status_error(self, error: StatusError) -> anyhow::Result<T> {
        self.map_err(|err| err.context(error))
    }
}

/// Extracts the status of a rejected response from an error chain.
pub fn status_of(err: &anyhow::Error) -> Option<u16> {
    err.downcast_ref::<StatusError>().map(|error| error.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn status_survives_further_context() {
        let request = Request::get("https://example.com/x");
        let err = Err::<(), _>(anyhow::anyhow!("body: nope"))
            .with_status_error(StatusError::new(&request, 503, StatusErrorKind::ErrorStatus))
            .context("Failed to fetch issues")
            .unwrap_err();

        assert_eq!(status_of(&err), Some(503));
        let message = format!("{:#}", err);
        assert!(message.contains("GET https://example.com/x responded with error status 503"));
        assert!(message.contains("body: nope"));
    }

    #[test]
    fn other_errors_have_no_status() {
        assert_eq!(status_of(&anyhow::anyhow!("connection refused")), None);
    }
}
