use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The reserved column names of the `jobs` table. Every other
/// column in a store is a user param.
pub const RESERVED_PREFIX: &str = "JOBSCHEDULER_";

pub const COL_JOB_ID: &str = "JOBSCHEDULER_JOB_ID";
pub const COL_STATUS: &str = "JOBSCHEDULER_STATUS";
pub const COL_PRIORITY: &str = "JOBSCHEDULER_PRIORITY";
pub const COL_ESTIMATE_TIME: &str = "JOBSCHEDULER_ESTIMATE_TIME";
pub const COL_ELAPSED_TIME: &str = "JOBSCHEDULER_ELAPSED_TIME";
pub const COL_DEPENDS_ON: &str = "JOBSCHEDULER_DEPENDS_ON";
pub const COL_CREATED_AT: &str = "JOBSCHEDULER_CREATED_AT";
pub const COL_STARTED_AT: &str = "JOBSCHEDULER_STARTED_AT";
pub const COL_FINISHED_AT: &str = "JOBSCHEDULER_FINISHED_AT";
pub const COL_ERROR_MESSAGE: &str = "JOBSCHEDULER_ERROR_MESSAGE";

pub const RESERVED_COLUMNS: &[&str] = &[
    COL_JOB_ID,
    COL_STATUS,
    COL_PRIORITY,
    COL_ESTIMATE_TIME,
    COL_ELAPSED_TIME,
    COL_DEPENDS_ON,
    COL_CREATED_AT,
    COL_STARTED_AT,
    COL_FINISHED_AT,
    COL_ERROR_MESSAGE,
];

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            other => Err(crate::error::SchedulerError::Integrity(format!(
                "unknown job status {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// A single row of the `jobs` table, reserved columns plus ordered params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub priority: i64,
    pub estimate_time: f64,
    pub elapsed_time: f64,
    pub depends_on: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Ordered (column, value) pairs, in the store's fixed param-column order.
    pub params: Vec<(String, String)>,
}

impl Job {
    pub fn param_values_in_order(&self) -> Vec<&str> {
        self.params.iter().map(|(_, v)| v.as_str()).collect()
    }
}

/// Parse a whitespace-separated `depends_on` column value into an ordered set.
pub fn parse_depends_on(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}

/// Serialize a `depends_on` set back into the whitespace-separated column form.
pub fn format_depends_on(ids: &BTreeSet<String>) -> String {
    ids.iter().cloned().collect::<Vec<_>>().join(" ")
}

/// Outcome of a terminal job execution, used by `Store::finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Error,
}

impl Outcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Outcome::Done => JobStatus::Done,
            Outcome::Error => JobStatus::Error,
        }
    }
}

/// Aggregate counts for the read-only progress viewer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotCounts {
    pub running: u64,
    pub done: u64,
    pub error: u64,
    pub pending_ready: u64,
    pub pending_waiting: u64,
    pub pending_blocked: u64,
}

impl SnapshotCounts {
    pub fn total(&self) -> u64 {
        self.running
            + self.done
            + self.error
            + self.pending_ready
            + self.pending_waiting
            + self.pending_blocked
    }
}
