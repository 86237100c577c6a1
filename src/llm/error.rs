//! Errors raised by a model invocation.
//!
//! The worker never propagates these; each one becomes the `error` of a
//! FAILED job result.

use thiserror::Error;

/// Failures that can occur while invoking a model endpoint.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The endpoint returned HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success HTTP status, with the response body.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// DNS, connection or timeout failure underneath the request.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request payload cannot be sent as-is.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
