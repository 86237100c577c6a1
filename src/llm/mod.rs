//! Model invocation: the capability a worker calls for every leased job.

pub mod client;
pub mod error;

use std::future::Future;

use serde_json::Value;

pub use client::ChatInvoker;
pub use error::InvocationError;

/// Maps a request payload to a model result.
///
/// The broker never sees this trait; only the worker lease loop does.
pub trait Invoker: Send + Sync {
    fn invoke(
        &self,
        request_payload: &Value,
    ) -> impl Future<Output = Result<Value, InvocationError>> + Send;
}
