//! SQLite-backed job store.
//!
//! Owns the `jobs` and `api_keys` tables. Every mutation that must be atomic
//! with respect to other writers runs inside a `BEGIN IMMEDIATE` transaction,
//! which takes the database write lock up front. Concurrent claimers, whether
//! they share this pool or live in another process, serialize on that lock.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, TransactionBehavior, params, params_from_iter};
use serde_json::Value;
use thiserror::Error;

use super::job::{
    Job, JobResult, JobSnapshot, JobStatus, LeasedJob, format_timestamp, parse_timestamp,
};
use crate::auth::{Identity, Role};

const POOL_SIZE: u32 = 10;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
// Stays well under SQLite's bound-parameter limit.
const MAX_IDS_PER_QUERY: usize = 500;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    request_payload TEXT NOT NULL,
    result_payload TEXT,
    locked_by TEXT,
    locked_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_dispatch ON jobs (status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_jobs_updated ON jobs (status, updated_at DESC);
CREATE TABLE IF NOT EXISTS api_keys (
    key_hash TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL
);
"#;

/// Job store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Payload encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable job table behind a connection pool.
#[derive(Clone)]
pub struct JobStore {
    pool: Pool<SqliteConnectionManager>,
}

impl JobStore {
    /// Open (or create) the store at `path` and install the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %path.display(), "Opening job store");

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            Ok(())
        });
        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    /// Ephemeral store. A single pooled connection keeps every caller on the same database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        // The database lives only as long as its connection, so it must never be recycled.
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;
        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn insert(&self, job: &Job) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO jobs (id, status, priority, created_at, updated_at, request_payload, result_payload, locked_by, locked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.status.as_str(),
                job.priority,
                format_timestamp(&job.created_at),
                format_timestamp(&job.updated_at),
                serde_json::to_string(&job.request_payload)?,
                job.result_payload
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.locked_by,
                job.locked_at.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    /// Full row for a single job.
    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                "SELECT id, status, priority, created_at, updated_at, request_payload, result_payload, locked_by, locked_at
                 FROM jobs WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RawJob {
                        id: row.get(0)?,
                        status: row.get(1)?,
                        priority: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                        request_payload: row.get(5)?,
                        result_payload: row.get(6)?,
                        locked_by: row.get(7)?,
                        locked_at: row.get(8)?,
                    })
                },
            )
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    /// Atomically claim up to `limit` queued jobs for `worker`.
    ///
    /// Selection order is `priority DESC, created_at ASC`, with insertion order
    /// breaking exact ties. The selected rows are flipped to PROCESSING in the
    /// same transaction that read them.
    pub fn claim_queued(
        &self,
        worker: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeasedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, request_payload, created_at FROM jobs
                 WHERE status = ?1
                 ORDER BY priority DESC, created_at ASC, rowid ASC
                 LIMIT ?2",
            )?;
            stmt.query_map(
                params![JobStatus::Queued.as_str(), limit as i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let stamp = format_timestamp(&now);
        let (from, to) = transition(JobStatus::Queued, JobStatus::Processing)?;
        let mut leased = Vec::with_capacity(rows.len());
        for (id, payload, created_at) in rows {
            let changed = tx.execute(
                "UPDATE jobs SET status = ?2, locked_by = ?3, locked_at = ?4, updated_at = ?4
                 WHERE id = ?1 AND status = ?5",
                params![id, to, worker, stamp, from],
            )?;
            // Unreachable while the write lock is held; bail out (and roll back) if it ever isn't.
            if changed != 1 {
                return Err(StoreError::Corrupt(format!(
                    "job {id} left QUEUED during its own lease"
                )));
            }
            leased.push(LeasedJob {
                request_payload: serde_json::from_str(&payload)?,
                created_at: parse_ts(&id, &created_at)?,
                id,
            });
        }

        tx.commit()?;
        Ok(leased)
    }

    /// Apply a batch of terminal outcomes in one transaction.
    ///
    /// Only rows currently PROCESSING are touched; unknown ids and jobs in any
    /// other state are skipped. Returns the number of rows transitioned.
    pub fn apply_results(&self, results: Vec<JobResult>, now: DateTime<Utc>) -> Result<usize> {
        if results.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stamp = format_timestamp(&now);

        let mut updated = 0;
        for JobResult { id, outcome } in results {
            let (from, to) = transition(JobStatus::Processing, outcome.status())?;
            let payload = serde_json::to_string(&outcome.into_result_payload())?;
            updated += tx.execute(
                "UPDATE jobs SET status = ?2, result_payload = ?3, updated_at = ?4, locked_by = NULL
                 WHERE id = ?1 AND status = ?5",
                params![id, to, payload, stamp, from],
            )?;
        }

        tx.commit()?;
        Ok(updated)
    }

    /// Snapshots for the given ids. Ids with no row are simply absent.
    pub fn find_by_ids(&self, ids: &[String]) -> Result<Vec<JobSnapshot>> {
        let conn = self.get_conn()?;
        let mut snapshots = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT id, status, result_payload FROM jobs WHERE id IN ({placeholders}) ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), raw_snapshot)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for raw in rows {
                snapshots.push(raw.into_snapshot()?);
            }
        }

        Ok(snapshots)
    }

    /// Most recently updated jobs in `status`, newest first.
    pub fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<JobSnapshot>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, status, result_payload FROM jobs
             WHERE status = ?1
             ORDER BY updated_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status.as_str(), limit as i64], raw_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawSnapshot::into_snapshot).collect()
    }

    pub fn insert_credential(&self, key_hash: &str, name: &str, role: Role) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO api_keys (key_hash, name, role) VALUES (?1, ?2, ?3)",
            params![key_hash, name, role.as_str()],
        )?;
        Ok(())
    }

    pub fn find_credential(&self, key_hash: &str) -> Result<Option<Identity>> {
        let conn = self.get_conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT name, role FROM api_keys WHERE key_hash = ?1",
                params![key_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(name, role)| {
            let role = role.parse::<Role>().map_err(StoreError::Corrupt)?;
            Ok(Identity { name, role })
        })
        .transpose()
    }
}

struct RawJob {
    id: String,
    status: String,
    priority: i64,
    created_at: String,
    updated_at: String,
    request_payload: String,
    result_payload: Option<String>,
    locked_by: Option<String>,
    locked_at: Option<String>,
}

impl RawJob {
    fn into_job(self) -> Result<Job> {
        Ok(Job {
            status: parse_status(&self.id, &self.status)?,
            priority: self.priority,
            created_at: parse_ts(&self.id, &self.created_at)?,
            updated_at: parse_ts(&self.id, &self.updated_at)?,
            request_payload: serde_json::from_str(&self.request_payload)?,
            result_payload: self
                .result_payload
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?,
            locked_by: self.locked_by,
            locked_at: self
                .locked_at
                .as_deref()
                .map(|raw| parse_ts(&self.id, raw))
                .transpose()?,
            id: self.id,
        })
    }
}

struct RawSnapshot {
    id: String,
    status: String,
    result_payload: Option<String>,
}

fn raw_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSnapshot> {
    Ok(RawSnapshot {
        id: row.get(0)?,
        status: row.get(1)?,
        result_payload: row.get(2)?,
    })
}

impl RawSnapshot {
    fn into_snapshot(self) -> Result<JobSnapshot> {
        Ok(JobSnapshot {
            status: parse_status(&self.id, &self.status)?,
            result: self
                .result_payload
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?,
            id: self.id,
        })
    }
}

/// Column values for a status change, refused unless the lifecycle allows it.
/// The `from` value doubles as the row predicate, so a row that has already
/// moved on is left alone.
fn transition(from: JobStatus, to: JobStatus) -> Result<(&'static str, &'static str)> {
    if !from.can_transition_to(to) {
        return Err(StoreError::Corrupt(format!(
            "illegal transition {from} -> {to}"
        )));
    }
    Ok((from.as_str(), to.as_str()))
}

fn parse_status(id: &str, raw: &str) -> Result<JobStatus> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("job {id}: {e}")))
}

fn parse_ts(id: &str, raw: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(raw)
        .ok_or_else(|| StoreError::Corrupt(format!("job {id}: invalid timestamp {raw:?}")))
}
