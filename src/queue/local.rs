use serde_json::Value;

use super::JobQueue;
use super::broker::Broker;
use super::job::{EnqueuedJob, JobResult, JobSnapshot, LeasedJob};
use crate::auth::Identity;
use crate::error::QueueError;

/// In-process [`JobQueue`] bound to one credential.
///
/// The credential is resolved before every operation, so a revoked or
/// unknown key fails with `Unauthorized` without reaching the job table.
/// Store work is blocking and runs on the blocking thread pool; the pooled
/// connection is returned as soon as each call finishes.
#[derive(Clone)]
pub struct LocalQueue {
    broker: Broker,
    credential: String,
}

impl LocalQueue {
    pub fn new(broker: Broker, credential: impl Into<String>) -> Self {
        Self {
            broker,
            credential: credential.into(),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&Broker, &Identity) -> Result<T, QueueError> + Send + 'static,
    {
        let broker = self.broker.clone();
        let credential = self.credential.clone();
        tokio::task::spawn_blocking(move || {
            let identity = broker.authenticate(Some(&credential))?;
            op(&broker, &identity)
        })
        .await
        .map_err(|e| QueueError::Internal(format!("Task join error: {e}")))?
    }
}

impl JobQueue for LocalQueue {
    async fn enqueue(&self, request_payload: Value, priority: i64) -> Result<EnqueuedJob, QueueError> {
        self.run(move |broker, identity| broker.enqueue(identity, request_payload, priority))
            .await
    }

    async fn lease(&self, limit: usize) -> Result<Vec<LeasedJob>, QueueError> {
        self.run(move |broker, identity| broker.lease(identity, limit))
            .await
    }

    async fn submit_results(&self, results: Vec<JobResult>) -> Result<usize, QueueError> {
        self.run(move |broker, identity| broker.submit_results(identity, results))
            .await
    }

    async fn poll(&self, ids: Option<Vec<String>>) -> Result<Vec<JobSnapshot>, QueueError> {
        self.run(move |broker, identity| broker.query(identity, ids.as_deref()))
            .await
    }
}
