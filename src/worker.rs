//! Worker lease loop.
//!
//! A worker repeatedly leases a batch of jobs, runs each payload through its
//! [`Invoker`], and reports every outcome back in a single submission. An
//! invocation failure never aborts the batch: that job alone is reported as
//! FAILED with the error text.
//!
//! Broker errors while leasing are logged and treated as an empty batch, so
//! a transient outage just looks like an idle queue. The same trade-off hides
//! persistent misconfiguration (a revoked key, a wrong URL) behind "no jobs".
//! Broker errors that a retry can fix are logged at WARN, everything else at
//! ERROR, so misconfiguration stands out in the log.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::llm::Invoker;
use crate::queue::{JobQueue, JobResult, LeasedJob};

pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(5);

pub struct Worker<Q, I> {
    queue: Q,
    invoker: I,
    batch_size: usize,
    idle_backoff: Duration,
}

impl<Q: JobQueue, I: Invoker> Worker<Q, I> {
    pub fn new(queue: Q, invoker: I) -> Self {
        Self {
            queue,
            invoker,
            batch_size: 1,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Lease, invoke and report one batch. Returns the number of jobs fetched,
    /// regardless of how many succeeded.
    pub async fn run_once(&self) -> usize {
        let jobs = match self.queue.lease(self.batch_size).await {
            Ok(jobs) => jobs,
            Err(e) => {
                log_broker_error(&e, "Error fetching jobs", 0);
                Vec::new()
            }
        };
        if jobs.is_empty() {
            return 0;
        }

        let mut results = Vec::with_capacity(jobs.len());
        for job in &jobs {
            results.push(self.process(job).await);
        }

        match self.queue.submit_results(results).await {
            Ok(updated) if updated < jobs.len() => {
                warn!(
                    fetched = jobs.len(),
                    updated, "Broker applied fewer results than submitted"
                );
            }
            Ok(_) => {}
            Err(e) => log_broker_error(&e, "Error submitting results", jobs.len()),
        }

        jobs.len()
    }

    async fn process(&self, job: &LeasedJob) -> JobResult {
        info!(job_id = %job.id, "Processing job");
        match self.invoker.invoke(&job.request_payload).await {
            Ok(result) => JobResult::completed(&job.id, result),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Inference failed");
                JobResult::failed(&job.id, e.to_string())
            }
        }
    }

    /// Keep leasing until `cancel` fires.
    ///
    /// Cancellation is observed between batches and during the idle sleep; a
    /// batch that has been leased always runs to submission.
    pub async fn run_loop(&self, cancel: CancellationToken) {
        info!(
            batch_size = self.batch_size,
            idle_backoff_ms = self.idle_backoff.as_millis() as u64,
            "Starting worker loop"
        );
        while !cancel.is_cancelled() {
            if self.run_once().await > 0 {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.idle_backoff) => {}
            }
        }
        info!("Worker loop stopped");
    }

    /// Process batches until the queue is empty. Returns the total fetched.
    pub async fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let fetched = self.run_once().await;
            if fetched == 0 {
                debug!(total, "Queue drained");
                return total;
            }
            total += fetched;
        }
    }
}

fn log_broker_error(e: &QueueError, context: &str, fetched: usize) {
    let retryable = e.is_retryable();
    if retryable {
        warn!(error = %e, retryable, fetched, "{context}");
    } else {
        error!(error = %e, retryable, fetched, "{context}");
    }
}
