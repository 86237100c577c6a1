use std::time::Duration;

use thiserror::Error;

use crate::queue::store::StoreError;

/// Errors surfaced by queue operations, local or remote.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Missing, malformed or unknown credential. Raised before any job store access.
    #[error("Unauthorized")]
    Unauthorized,

    /// Returned by lookups of a single id; polling simply omits unknown ids.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Transactional failure in the job store. The operation had no effect and may be retried.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// A client wait exceeded its deadline; the job may still be running.
    #[error("Job {job_id} timed out after {}ms", waited.as_millis())]
    Timeout { job_id: String, waited: Duration },

    /// The broker could not be reached.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote broker answered with a non-success status.
    #[error("Broker returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Storage and transport failures are worth retrying; the rest are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::Storage(_) | QueueError::Transport(_) => true,
            QueueError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
