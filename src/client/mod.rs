//! Client side of the queue: submit jobs and wait for their results.
//!
//! A [`JobHandle`] turns an asynchronous job into a synchronous result by
//! polling the broker. Handles only cache what the broker last reported;
//! the broker remains the source of truth.

mod http;

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

pub use http::{HttpQueue, PRIORITY_HEADER};

use crate::error::QueueError;
use crate::queue::{JobQueue, JobSnapshot, JobStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Client<Q> {
    queue: Q,
    poll_interval: Duration,
}

impl<Q: JobQueue> Client<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Enqueue a payload and return a handle in the QUEUED state.
    pub async fn submit(&self, request_payload: Value, priority: i64) -> Result<JobHandle<'_, Q>, QueueError> {
        let job = self.queue.enqueue(request_payload, priority).await?;
        debug!(job_id = %job.id, priority, "Job submitted");
        Ok(JobHandle {
            client: self,
            id: job.id,
            status: Some(job.status),
            result: None,
        })
    }

    /// A handle for a known id. Nothing is fetched until the first `get`.
    pub fn handle(&self, id: impl Into<String>) -> JobHandle<'_, Q> {
        JobHandle {
            client: self,
            id: id.into(),
            status: None,
            result: None,
        }
    }

    /// Fetch one job, failing with `NotFound` if the broker does not know it.
    pub async fn find(&self, id: &str) -> Result<JobHandle<'_, Q>, QueueError> {
        self.poll(&[id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// Handles for every known id in `ids`, fetched in a single query.
    /// Unknown ids are omitted.
    pub async fn poll(&self, ids: &[String]) -> Result<Vec<JobHandle<'_, Q>>, QueueError> {
        let snapshots = self.queue.poll(Some(ids.to_vec())).await?;
        Ok(snapshots
            .into_iter()
            .map(|snap| JobHandle::from_snapshot(self, snap))
            .collect())
    }

    /// Poll the whole id set until every job is terminal.
    ///
    /// Snapshots come back in the order of `ids`. An id the broker does not
    /// know fails with `NotFound`; a job still running at the deadline fails
    /// with `Timeout` naming the first unfinished id.
    pub async fn wait_all(&self, ids: &[String], timeout: Duration) -> Result<Vec<JobSnapshot>, QueueError> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let snapshots = match tokio::time::timeout_at(deadline, self.queue.poll(Some(ids.to_vec()))).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(QueueError::Timeout {
                        job_id: ids.first().cloned().unwrap_or_default(),
                        waited: started.elapsed(),
                    });
                }
            };

            let mut ordered = Vec::with_capacity(ids.len());
            for id in ids {
                let snap = snapshots
                    .iter()
                    .find(|s| &s.id == id)
                    .ok_or_else(|| QueueError::NotFound(id.clone()))?;
                ordered.push(snap.clone());
            }

            let pending = ordered.iter().find(|s| !s.status.is_terminal());
            let Some(pending) = pending else {
                return Ok(ordered);
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(QueueError::Timeout {
                    job_id: pending.id.clone(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// A job id plus the last state the broker reported for it.
pub struct JobHandle<'c, Q> {
    client: &'c Client<Q>,
    id: String,
    status: Option<JobStatus>,
    result: Option<Value>,
}

impl<'c, Q: JobQueue> JobHandle<'c, Q> {
    fn from_snapshot(client: &'c Client<Q>, snap: JobSnapshot) -> Self {
        Self {
            client,
            id: snap.id,
            status: Some(snap.status),
            result: snap.result,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last observed status; `None` before the first fetch.
    pub fn status(&self) -> Option<JobStatus> {
        self.status
    }

    /// Cached result. For FAILED jobs this is `{"error": ".."}`.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }

    /// Issue one query and update the cached state.
    ///
    /// Fails with `NotFound` when the broker does not know the id.
    pub async fn refresh(&mut self) -> Result<JobStatus, QueueError> {
        self.fetch()
            .await?
            .ok_or_else(|| QueueError::NotFound(self.id.clone()))
    }

    /// One query; `None` when the broker returned no row for this id.
    async fn fetch(&mut self) -> Result<Option<JobStatus>, QueueError> {
        let snap = self
            .client
            .queue
            .poll(Some(vec![self.id.clone()]))
            .await?
            .into_iter()
            .find(|s| s.id == self.id);
        let Some(snap) = snap else {
            return Ok(None);
        };
        self.status = Some(snap.status);
        self.result = snap.result;
        Ok(Some(snap.status))
    }

    /// The job's result.
    ///
    /// A cached terminal result is returned without touching the broker.
    /// With `wait = false` exactly one query is made and `None` means the job
    /// is not finished yet. With `wait = true` the broker is polled until the
    /// job is terminal; the deadline covers both the sleeps and the queries
    /// themselves, and exceeding it fails with `Timeout`.
    ///
    /// An id the broker does not report counts as unfinished, not as an error.
    pub async fn get(&mut self, wait: bool, timeout: Duration) -> Result<Option<Value>, QueueError> {
        if self.is_terminal() {
            return Ok(self.result.clone());
        }

        if !wait {
            self.fetch().await?;
            return Ok(if self.is_terminal() {
                self.result.clone()
            } else {
                None
            });
        }

        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.fetch()).await {
                Ok(result) => {
                    result?;
                }
                Err(_) => return Err(self.timed_out(started)),
            }
            if self.is_terminal() {
                return Ok(self.result.clone());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(started));
            }
            tokio::time::sleep(self.client.poll_interval.min(deadline - now)).await;
        }
    }

    fn timed_out(&self, started: Instant) -> QueueError {
        QueueError::Timeout {
            job_id: self.id.clone(),
            waited: started.elapsed(),
        }
    }
}
