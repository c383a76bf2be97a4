//! # Error Handling
//!
//! This module provides the error taxonomy for the sync engine. Transport,
//! cache and store failures all fold into [`SyncError`], and
//! [`SyncError::class`] decides how the orchestrator treats a failed entity.

use std::time::Duration;

use thiserror::Error;

/// Maximum number of characters of an upstream body kept for diagnostics.
const BODY_SNIPPET_CHARS: usize = 500;

/// Errors raised by the rate-limited HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call exceeded its deadline and was cancelled.
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        body: String,
        url: String,
    },

    /// Connection, TLS or protocol failure below HTTP.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request could not be built (bad URL, header value, client setup).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Build an HTTP status error, truncating the body to a diagnostic snippet.
    pub fn http_status(status: u16, body: String, url: impl Into<String>) -> Self {
        let body = if body.chars().count() > BODY_SNIPPET_CHARS {
            let truncated: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
            format!("{}...", truncated)
        } else {
            body
        };

        TransportError::HttpStatus {
            status,
            body,
            url: url.into(),
        }
    }

    /// Status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::HttpStatus { status, .. } => Some(*status),
            TransportError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout { .. } => true,
            TransportError::Network(err) => err.is_timeout(),
            _ => false,
        }
    }
}

/// Errors raised by the disk cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// How the orchestrator should treat a failed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Entity no longer exists upstream (404).
    NotFound,
    /// Entity has no applicable sub-resource (400).
    BadRequest,
    /// Deadline exceeded, retries exhausted.
    Timeout,
    /// Anything else.
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::BadRequest => "bad_request",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Fatal => "fatal",
        }
    }
}

/// Errors surfaced while synchronizing a single entity.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("store error: {0}")]
    Store(#[from] sea_orm::DbErr),

    #[error("failed to decode upstream page: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("pagination for {entity_key} exceeded {max_pages} pages")]
    PageLimitExceeded { entity_key: String, max_pages: u32 },

    #[error("entity task failed: {0}")]
    Join(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Classify the error for the per-entity isolation policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Transport(err) if err.is_timeout() => ErrorClass::Timeout,
            SyncError::Transport(err) => match err.status() {
                Some(404) => ErrorClass::NotFound,
                Some(400) => ErrorClass::BadRequest,
                _ => ErrorClass::Fatal,
            },
            _ => ErrorClass::Fatal,
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Join(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16) -> SyncError {
        SyncError::from(TransportError::http_status(
            status,
            "body".to_string(),
            "https://example.test/_apis",
        ))
    }

    #[test]
    fn classifies_expected_absence() {
        assert_eq!(status_error(404).class(), ErrorClass::NotFound);
        assert_eq!(status_error(400).class(), ErrorClass::BadRequest);
    }

    #[test]
    fn classifies_other_statuses_as_fatal() {
        for status in [401, 403, 429, 500, 503] {
            assert_eq!(status_error(status).class(), ErrorClass::Fatal, "{status}");
        }
    }

    #[test]
    fn classifies_timeout() {
        let err = SyncError::from(TransportError::Timeout {
            url: "https://example.test".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(err.class(), ErrorClass::Timeout);
    }

    #[tokio::test]
    async fn aborted_tasks_surface_as_fatal_join_errors() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let join_err = handle.await.unwrap_err();

        let err = SyncError::from(join_err);

        assert!(matches!(err, SyncError::Join(_)));
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn store_errors_are_fatal() {
        let err = SyncError::from(sea_orm::DbErr::Custom("boom".to_string()));
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn truncates_long_bodies() {
        let body = "x".repeat(BODY_SNIPPET_CHARS + 50);
        let err = TransportError::http_status(500, body, "https://example.test");
        match err {
            TransportError::HttpStatus { body, .. } => {
                assert_eq!(body.chars().count(), BODY_SNIPPET_CHARS + 3);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
