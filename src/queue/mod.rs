//! The job queue core: persisted jobs, the broker that mutates them, and the
//! [`JobQueue`] seam that workers and clients talk through.
//!
//! Two implementations of the seam exist: [`LocalQueue`] drives a [`Broker`]
//! in-process, and [`HttpQueue`](crate::client::HttpQueue) reaches a broker
//! served over HTTP. Workers and job handles are generic over either.

pub mod broker;
pub mod job;
pub mod local;
pub mod store;

use std::future::Future;

use serde_json::Value;

pub use broker::Broker;
pub use job::{EnqueuedJob, Job, JobResult, JobSnapshot, JobStatus, LeasedJob, Outcome};
pub use local::LocalQueue;
pub use store::{JobStore, StoreError};

use crate::error::QueueError;

/// The four broker operations as seen by an authenticated caller.
pub trait JobQueue: Send + Sync {
    /// Persist a new QUEUED job.
    fn enqueue(
        &self,
        request_payload: Value,
        priority: i64,
    ) -> impl Future<Output = Result<EnqueuedJob, QueueError>> + Send;

    /// Claim up to `limit` queued jobs for the calling identity.
    fn lease(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LeasedJob>, QueueError>> + Send;

    /// Report terminal outcomes; returns how many jobs transitioned.
    fn submit_results(
        &self,
        results: Vec<JobResult>,
    ) -> impl Future<Output = Result<usize, QueueError>> + Send;

    /// Snapshots for `ids`, or recently completed jobs when `None`.
    fn poll(
        &self,
        ids: Option<Vec<String>>,
    ) -> impl Future<Output = Result<Vec<JobSnapshot>, QueueError>> + Send;
}
