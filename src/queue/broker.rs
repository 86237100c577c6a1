use chrono::Utc;
use serde_json::Value;
use tracing::instrument;

use super::job::{EnqueuedJob, Job, JobResult, JobSnapshot, JobStatus, LeasedJob};
use super::store::JobStore;
use crate::auth::{Identity, IdentityGate};
use crate::error::QueueError;

/// Upper bound on a single lease request.
pub const MAX_LEASE_LIMIT: usize = 100;
/// How many completed jobs an id-less query returns.
pub const COMPLETED_QUERY_CAP: usize = 100;

/// The only writer of job rows.
///
/// Operations take an already-resolved [`Identity`]; callers obtain it from
/// [`Broker::authenticate`] before touching any job. Retries are left to the
/// caller: a storage failure is returned as-is and nothing was applied.
#[derive(Clone)]
pub struct Broker {
    store: JobStore,
    gate: IdentityGate,
}

impl Broker {
    pub fn new(store: JobStore) -> Self {
        let gate = IdentityGate::new(store.clone());
        Self { store, gate }
    }

    pub fn gate(&self) -> &IdentityGate {
        &self.gate
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn authenticate(&self, credential: Option<&str>) -> Result<Identity, QueueError> {
        self.gate.resolve(credential)
    }

    #[instrument(skip_all, err, fields(caller = %identity.name, priority = priority))]
    pub fn enqueue(
        &self,
        identity: &Identity,
        request_payload: Value,
        priority: i64,
    ) -> Result<EnqueuedJob, QueueError> {
        let job = Job::new(request_payload, priority);
        self.store.insert(&job)?;
        tracing::debug!(job_id = %job.id, "Job queued");
        Ok(EnqueuedJob {
            id: job.id,
            status: job.status,
        })
    }

    /// Atomically hand up to `limit` queued jobs to `identity`.
    #[instrument(skip_all, err, fields(worker = %identity.name, limit = limit, leased = tracing::field::Empty))]
    pub fn lease(&self, identity: &Identity, limit: usize) -> Result<Vec<LeasedJob>, QueueError> {
        let limit = limit.min(MAX_LEASE_LIMIT);
        let leased = self.store.claim_queued(&identity.name, limit, Utc::now())?;
        tracing::Span::current().record("leased", leased.len());
        Ok(leased)
    }

    /// Record terminal outcomes for a batch of jobs, all or nothing.
    ///
    /// The submitter is not compared with the job's `locked_by`: any
    /// authenticated caller may resolve any in-flight job. Unknown ids and
    /// jobs that are not PROCESSING are skipped. Returns how many jobs moved.
    #[instrument(skip_all, err, fields(worker = %identity.name, submitted = results.len()))]
    pub fn submit_results(
        &self,
        identity: &Identity,
        results: Vec<JobResult>,
    ) -> Result<usize, QueueError> {
        let submitted = results.len();
        let updated = self.store.apply_results(results, Utc::now())?;
        if updated < submitted {
            tracing::debug!(
                skipped = submitted - updated,
                "Ignored results for unknown or non-processing jobs"
            );
        }
        Ok(updated)
    }

    /// Snapshots for `ids`, or the latest completed jobs when `ids` is `None`.
    #[instrument(skip_all, err, fields(caller = %identity.name))]
    pub fn query(
        &self,
        identity: &Identity,
        ids: Option<&[String]>,
    ) -> Result<Vec<JobSnapshot>, QueueError> {
        let snapshots = match ids {
            Some(ids) => self.store.find_by_ids(ids)?,
            None => self
                .store
                .list_by_status(JobStatus::Completed, COMPLETED_QUERY_CAP)?,
        };
        Ok(snapshots)
    }
}
