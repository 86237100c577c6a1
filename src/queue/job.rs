use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Tracks the lifecycle status of a job.
///
/// Jobs only ever move `QUEUED → PROCESSING → {COMPLETED, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// COMPLETED and FAILED are terminal; nothing leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// A single unit of inference work as persisted by the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub request_payload: Value,
    pub result_payload: Option<Value>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(request_payload: Value, priority: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            priority,
            created_at: now,
            updated_at: now,
            request_payload,
            result_payload: None,
            locked_by: None,
            locked_at: None,
        }
    }
}

/// Returned by enqueue: the new id and its initial status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueuedJob {
    pub id: String,
    /// Always QUEUED for a fresh job.
    pub status: JobStatus,
}

/// What a worker receives when it leases a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasedJob {
    pub id: String,
    /// Exactly as the producer submitted it.
    pub request_payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Read-only view of a job returned by polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    /// Null until the job is terminal. FAILED jobs carry `{"error": ".."}`.
    #[serde(default)]
    pub result: Option<Value>,
}

/// Terminal outcome reported by a worker.
///
/// Serialized inline with the job id as `{"status": "COMPLETED", "result": ..}`
/// or `{"status": "FAILED", "error": ".."}`; any other status is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The model's response document, stored as-is.
    Completed { result: Value },
    /// Error text; stored wrapped as `{"error": ..}`.
    Failed { error: String },
}

impl Outcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Outcome::Completed { .. } => JobStatus::Completed,
            Outcome::Failed { .. } => JobStatus::Failed,
        }
    }

    /// The document stored in `result_payload`.
    pub fn into_result_payload(self) -> Value {
        match self {
            Outcome::Completed { result } => result,
            Outcome::Failed { error } => json!({ "error": error }),
        }
    }
}

/// One entry of a worker's result submission.
///
/// On the wire: `{"id": "..", "status": "COMPLETED", "result": ..}` or
/// `{"id": "..", "status": "FAILED", "error": ".."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl JobResult {
    pub fn completed(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Completed { result },
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Failed {
                error: error.into(),
            },
        }
    }
}

/// Fixed-width RFC 3339 so that text ordering in SQLite matches time ordering.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
