//! Error types for sketch generation.

use std::time::Duration;

/// Longest error body kept in an [`SketchError::Api`] message.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while generating a sketch.
#[derive(Debug, thiserror::Error)]
pub enum SketchError {
    /// API key missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned a non-success response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Server-suggested wait, if it sent one.
        retry_after: Option<Duration>,
    },

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sketch generation operations.
pub type Result<T> = std::result::Result<T, SketchError>;

/// Collapses whitespace and truncates a response body for use in error text.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
    truncated.push_str("...");
    truncated
}

/// Reads a `Retry-After` header given in whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
