//! Store: schema, connection, and transaction discipline.
//!
//! A single SQLite file is the only coordination point between workers.
//! WAL plus a 30s busy timeout absorb contention; claims are made inside
//! write-intent (`BEGIN IMMEDIATE`) transactions so the writer lock is
//! acquired at the first statement, not lazily.

pub mod model;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{Result, SchedulerError};
use crate::resolver::{self, Readiness};
use model::{
    format_depends_on, parse_depends_on, Job, JobStatus, Outcome, SnapshotCounts,
    COL_CREATED_AT, COL_DEPENDS_ON, COL_ELAPSED_TIME, COL_ERROR_MESSAGE, COL_ESTIMATE_TIME,
    COL_FINISHED_AT, COL_JOB_ID, COL_PRIORITY, COL_STARTED_AT, COL_STATUS, RESERVED_PREFIX,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// A row to be inserted by `add_jobs`, prior to `job_id` defaulting.
#[derive(Debug, Clone)]
pub struct NewJobRow {
    pub job_id: Option<String>,
    pub priority: i64,
    pub estimate_time: f64,
    pub depends_on: BTreeSet<String>,
    /// Param values in the same order as the store's param columns.
    pub params: Vec<(String, String)>,
}

/// Result of one `try_claim` attempt.
pub enum ClaimOutcome {
    Claimed(Job),
    /// No job could be claimed. `more_possible` is true iff a `Waiting`
    /// candidate remained, i.e. progress may still happen once a
    /// predecessor finishes.
    None { more_possible: bool },
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the SQLite file at `path`, applying WAL and
    /// busy-timeout pragmas to every connection the pool opens.
    pub async fn open(path: &Path) -> Result<Self> {
        let connect_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 30000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await
            .map_err(SchedulerError::from_sqlx)?;

        Ok(Self { pool })
    }

    /// Create the `jobs` table if it doesn't exist yet, with the reserved
    /// columns plus one `TEXT` column per param. A no-op if the table
    /// already exists with the same param column set; errors if it exists
    /// with a different one.
    pub async fn initialize(&self, param_columns: &[String]) -> Result<()> {
        for col in param_columns {
            validate_column_name(col)?;
        }

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'jobs'")
                .fetch_optional(&self.pool)
                .await
                .map_err(SchedulerError::from_sqlx)?;

        if exists.is_some() {
            let existing = self.param_columns().await?;
            if existing != param_columns {
                return Err(SchedulerError::SchemaMismatch {
                    existing,
                    got: param_columns.to_vec(),
                });
            }
            return Ok(());
        }

        let mut columns = vec![
            format!(r#""{COL_JOB_ID}" TEXT PRIMARY KEY"#),
            format!(r#""{COL_STATUS}" TEXT NOT NULL DEFAULT 'pending'"#),
            format!(r#""{COL_PRIORITY}" INTEGER NOT NULL DEFAULT 0"#),
            format!(r#""{COL_ESTIMATE_TIME}" REAL NOT NULL DEFAULT 0"#),
            format!(r#""{COL_ELAPSED_TIME}" REAL NOT NULL DEFAULT 0"#),
            format!(r#""{COL_DEPENDS_ON}" TEXT NOT NULL DEFAULT ''"#),
            format!(r#""{COL_CREATED_AT}" TEXT NOT NULL"#),
            format!(r#""{COL_STARTED_AT}" TEXT"#),
            format!(r#""{COL_FINISHED_AT}" TEXT"#),
            format!(r#""{COL_ERROR_MESSAGE}" TEXT"#),
        ];
        for col in param_columns {
            columns.push(format!(r#""{col}" TEXT NOT NULL DEFAULT ''"#));
        }

        let create_sql = format!("CREATE TABLE jobs (\n{}\n)", columns.join(",\n"));
        sqlx::query(&create_sql)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::from_sqlx)?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON jobs("JOBSCHEDULER_STATUS", "JOBSCHEDULER_PRIORITY")"#,
        )
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::from_sqlx)?;

        Ok(())
    }

    /// The store's fixed param-column order, derived from the live schema
    /// rather than any in-memory cache, since another process may have
    /// created the table.
    pub async fn param_columns(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("PRAGMA table_info(jobs)")
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::from_sqlx)?;

        let mut cols = Vec::new();
        for row in rows {
            let name: String = row.try_get("name").map_err(SchedulerError::from_sqlx)?;
            if !name.starts_with(RESERVED_PREFIX) {
                cols.push(name);
            }
        }
        Ok(cols)
    }

    /// Insert new rows. Fails atomically with `SchemaMismatch` if the rows'
    /// param columns differ from the existing table, or `Integrity` if a
    /// `job_id` collides or a dependency references a job that exists in
    /// neither the batch nor the table.
    pub async fn add_jobs(&self, param_columns: &[String], rows: &[NewJobRow]) -> Result<()> {
        self.initialize(param_columns).await?;

        let mut txn = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(SchedulerError::from_sqlx)?;

        let existing_ids: BTreeSet<String> = sqlx::query(&format!(r#"SELECT "{COL_JOB_ID}" FROM jobs"#))
            .fetch_all(&mut *txn)
            .await
            .map_err(SchedulerError::from_sqlx)?
            .into_iter()
            .map(|r| r.try_get::<String, _>(0).unwrap())
            .collect();

        let now = Utc::now();

        let col_list = std::iter::once(COL_JOB_ID.to_string())
            .chain([
                COL_STATUS, COL_PRIORITY, COL_ESTIMATE_TIME, COL_DEPENDS_ON, COL_CREATED_AT,
            ]
            .iter()
            .map(|s| s.to_string()))
            .chain(param_columns.iter().cloned())
            .collect::<Vec<_>>();
        let placeholders = col_list.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let quoted_cols = col_list
            .iter()
            .map(|c| format!(r#""{c}""#))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!("INSERT INTO jobs ({quoted_cols}) VALUES ({placeholders})");

        // Resolve every row's job_id up front so the referential, duplicate,
        // and acyclicity checks below see the whole batch at once rather
        // than only the rows already processed in iteration order.
        let batch_job_ids: Vec<String> = rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| {
                row.job_id
                    .clone()
                    .unwrap_or_else(|| format!("job_{ordinal:06}"))
            })
            .collect();
        let batch_ids: BTreeSet<String> = batch_job_ids.iter().cloned().collect();

        for (row, job_id) in rows.iter().zip(&batch_job_ids) {
            if row.params.len() != param_columns.len()
                || row
                    .params
                    .iter()
                    .zip(param_columns.iter())
                    .any(|((k, _), expected)| k != expected)
            {
                return Err(SchedulerError::SchemaMismatch {
                    existing: param_columns.to_vec(),
                    got: row.params.iter().map(|(k, _)| k.clone()).collect(),
                });
            }
        }

        let mut inserted_so_far: BTreeSet<String> = BTreeSet::new();
        for job_id in &batch_job_ids {
            if existing_ids.contains(job_id) || !inserted_so_far.insert(job_id.clone()) {
                return Err(SchedulerError::Integrity(format!(
                    "duplicate job_id {job_id:?}"
                )));
            }
        }

        for (row, job_id) in rows.iter().zip(&batch_job_ids) {
            for dep in &row.depends_on {
                if !existing_ids.contains(dep) && !batch_ids.contains(dep) {
                    return Err(SchedulerError::Integrity(format!(
                        "job {job_id:?} depends on unknown job {dep:?}"
                    )));
                }
            }
        }

        let batch_depends: BTreeMap<String, BTreeSet<String>> = rows
            .iter()
            .zip(&batch_job_ids)
            .map(|(row, job_id)| (job_id.clone(), row.depends_on.clone()))
            .collect();
        check_acyclic(&batch_depends)?;

        for (row, job_id) in rows.iter().zip(&batch_job_ids) {
            let mut query = sqlx::query(&insert_sql)
                .bind(job_id.as_str())
                .bind(JobStatus::Pending.as_db_str())
                .bind(row.priority)
                .bind(row.estimate_time)
                .bind(format_depends_on(&row.depends_on))
                .bind(now.to_rfc3339());
            for (_, v) in &row.params {
                query = query.bind(v);
            }
            query
                .execute(&mut *txn)
                .await
                .map_err(SchedulerError::from_sqlx)?;
        }

        txn.commit().await.map_err(SchedulerError::from_sqlx)?;
        Ok(())
    }

    /// Bulk reset matching rows to `pending`, clearing terminal fields.
    pub async fn reset(&self, status_filter: Option<JobStatus>) -> Result<u64> {
        let sql = match status_filter {
            Some(status) => format!(
                r#"UPDATE jobs SET "{COL_STATUS}" = 'pending', "{COL_STARTED_AT}" = NULL,
                   "{COL_FINISHED_AT}" = NULL, "{COL_ELAPSED_TIME}" = 0, "{COL_ERROR_MESSAGE}" = NULL
                   WHERE "{COL_STATUS}" = '{}'"#,
                status.as_db_str()
            ),
            None => format!(
                r#"UPDATE jobs SET "{COL_STATUS}" = 'pending', "{COL_STARTED_AT}" = NULL,
                   "{COL_FINISHED_AT}" = NULL, "{COL_ELAPSED_TIME}" = 0, "{COL_ERROR_MESSAGE}" = NULL"#
            ),
        };
        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    /// Reset every `running` row to `pending` (the startup recovery sweep).
    pub async fn recover_stuck(&self) -> Result<u64> {
        self.reset(Some(JobStatus::Running)).await
    }

    /// Select-and-claim the next runnable job.
    pub async fn try_claim(
        &self,
        now: DateTime<Utc>,
        budget_seconds: Option<i64>,
        smart: bool,
        speed_factor: f64,
    ) -> Result<ClaimOutcome> {
        let param_columns = self.param_columns().await?;

        let mut txn = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(SchedulerError::from_sqlx)?;

        let candidates = sqlx::query(&format!(
            r#"SELECT "{COL_JOB_ID}", "{COL_DEPENDS_ON}", "{COL_ESTIMATE_TIME}"
               FROM jobs WHERE "{COL_STATUS}" = 'pending'
               ORDER BY "{COL_PRIORITY}" DESC, "{COL_JOB_ID}" ASC"#
        ))
        .fetch_all(&mut *txn)
        .await
        .map_err(SchedulerError::from_sqlx)?;

        let mut any_waiting = false;
        let mut winner: Option<String> = None;

        for row in &candidates {
            let job_id: String = row.try_get(0).map_err(SchedulerError::from_sqlx)?;
            let depends_on_raw: String = row.try_get(1).map_err(SchedulerError::from_sqlx)?;
            let estimate_time: f64 = row.try_get(2).map_err(SchedulerError::from_sqlx)?;
            let depends_on = parse_depends_on(&depends_on_raw);

            let statuses = fetch_statuses(&mut txn, &depends_on).await?;
            match resolver::classify(&depends_on, &statuses) {
                Readiness::Blocked => continue,
                Readiness::Waiting => {
                    any_waiting = true;
                    continue;
                }
                Readiness::Ready => {}
            }

            if smart {
                if let Some(budget) = budget_seconds {
                    if !crate::deadline::fits_budget(estimate_time, speed_factor, budget) {
                        continue;
                    }
                }
            }

            winner = Some(job_id);
            break;
        }

        let Some(job_id) = winner else {
            txn.commit().await.map_err(SchedulerError::from_sqlx)?;
            return Ok(ClaimOutcome::None {
                more_possible: any_waiting,
            });
        };

        let update = sqlx::query(&format!(
            r#"UPDATE jobs SET "{COL_STATUS}" = 'running', "{COL_STARTED_AT}" = ?
               WHERE "{COL_JOB_ID}" = ? AND "{COL_STATUS}" = 'pending'"#
        ))
        .bind(now.to_rfc3339())
        .bind(&job_id)
        .execute(&mut *txn)
        .await
        .map_err(SchedulerError::from_sqlx)?;

        if update.rows_affected() == 0 {
            // Lost a race we shouldn't have been able to lose inside a
            // write-intent transaction; treat as "nothing claimed".
            txn.rollback().await.map_err(SchedulerError::from_sqlx)?;
            return Ok(ClaimOutcome::None {
                more_possible: true,
            });
        }

        let job = fetch_job(&mut *txn, &job_id, &param_columns)
            .await?
            .ok_or_else(|| SchedulerError::Integrity(format!("claimed job {job_id:?} vanished")))?;

        txn.commit().await.map_err(SchedulerError::from_sqlx)?;
        Ok(ClaimOutcome::Claimed(job))
    }

    /// Commit a terminal status transition.
    pub async fn finish(
        &self,
        job_id: &str,
        outcome: Outcome,
        elapsed_secs: f64,
        err_msg: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(&format!(
            r#"UPDATE jobs SET "{COL_STATUS}" = ?, "{COL_FINISHED_AT}" = ?, "{COL_ELAPSED_TIME}" = ?,
               "{COL_ERROR_MESSAGE}" = ? WHERE "{COL_JOB_ID}" = ?"#
        ))
        .bind(outcome.status().as_db_str())
        .bind(now.to_rfc3339())
        .bind(elapsed_secs)
        .bind(err_msg)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let param_columns = self.param_columns().await?;
        fetch_job(&self.pool, job_id, &param_columns).await
    }

    /// All rows, in `job_id` order (used by the CSV export and view tools).
    pub async fn all_jobs(&self) -> Result<Vec<Job>> {
        let param_columns = self.param_columns().await?;
        let mut select_cols = reserved_select_list();
        for col in &param_columns {
            select_cols.push_str(&format!(r#", "{col}""#));
        }
        let rows = sqlx::query(&format!(
            r#"SELECT {select_cols} FROM jobs ORDER BY "{COL_JOB_ID}" ASC"#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::from_sqlx)?;

        rows.into_iter()
            .map(|row| row_to_job(&row, &param_columns))
            .collect()
    }

    /// Read-only aggregate classification for the progress viewer.
    pub async fn snapshot_counts(&self) -> Result<SnapshotCounts> {
        let jobs = self.all_jobs().await?;
        let mut counts = SnapshotCounts::default();

        let statuses_by_id: std::collections::HashMap<&str, JobStatus> =
            jobs.iter().map(|j| (j.job_id.as_str(), j.status)).collect();

        for job in &jobs {
            match job.status {
                JobStatus::Running => counts.running += 1,
                JobStatus::Done => counts.done += 1,
                JobStatus::Error => counts.error += 1,
                JobStatus::Pending => {
                    let statuses: Vec<JobStatus> = job
                        .depends_on
                        .iter()
                        .filter_map(|id| statuses_by_id.get(id.as_str()).copied())
                        .collect();
                    match resolver::classify(&job.depends_on, &statuses) {
                        Readiness::Ready => counts.pending_ready += 1,
                        Readiness::Waiting => counts.pending_waiting += 1,
                        Readiness::Blocked => counts.pending_blocked += 1,
                    }
                }
            }
        }
        Ok(counts)
    }
}

fn reserved_select_list() -> String {
    [
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
    ]
    .iter()
    .map(|c| format!(r#""{c}""#))
    .collect::<Vec<_>>()
    .join(", ")
}

async fn fetch_statuses<'c, E>(executor: E, depends_on: &BTreeSet<String>) -> Result<Vec<JobStatus>>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    if depends_on.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = depends_on.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        r#"SELECT "{COL_STATUS}" FROM jobs WHERE "{COL_JOB_ID}" IN ({placeholders})"#
    );
    let mut query = sqlx::query(&sql);
    for id in depends_on {
        query = query.bind(id);
    }
    let rows = query.fetch_all(executor).await.map_err(SchedulerError::from_sqlx)?;
    rows.into_iter()
        .map(|row| {
            let raw: String = row.try_get(0).map_err(SchedulerError::from_sqlx)?;
            raw.parse()
        })
        .collect()
}

async fn fetch_job<'c, E>(
    executor: E,
    job_id: &str,
    param_columns: &[String],
) -> Result<Option<Job>>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let mut select_cols = reserved_select_list();
    for col in param_columns {
        select_cols.push_str(&format!(r#", "{col}""#));
    }

    let row = sqlx::query(&format!(
        r#"SELECT {select_cols} FROM jobs WHERE "{COL_JOB_ID}" = ?"#
    ))
    .bind(job_id)
    .fetch_optional(executor)
    .await
    .map_err(SchedulerError::from_sqlx)?;

    row.map(|row| row_to_job(&row, param_columns)).transpose()
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow, param_columns: &[String]) -> Result<Job> {
    let status_raw: String = row.try_get(COL_STATUS).map_err(SchedulerError::from_sqlx)?;
    let depends_on_raw: String = row
        .try_get(COL_DEPENDS_ON)
        .map_err(SchedulerError::from_sqlx)?;
    let created_at_raw: String = row
        .try_get(COL_CREATED_AT)
        .map_err(SchedulerError::from_sqlx)?;
    let started_at_raw: Option<String> = row
        .try_get(COL_STARTED_AT)
        .map_err(SchedulerError::from_sqlx)?;
    let finished_at_raw: Option<String> = row
        .try_get(COL_FINISHED_AT)
        .map_err(SchedulerError::from_sqlx)?;

    let mut params = Vec::with_capacity(param_columns.len());
    for col in param_columns {
        let v: String = row.try_get(col.as_str()).map_err(SchedulerError::from_sqlx)?;
        params.push((col.clone(), v));
    }

    Ok(Job {
        job_id: row.try_get(COL_JOB_ID).map_err(SchedulerError::from_sqlx)?,
        status: status_raw.parse()?,
        priority: row.try_get(COL_PRIORITY).map_err(SchedulerError::from_sqlx)?,
        estimate_time: row
            .try_get(COL_ESTIMATE_TIME)
            .map_err(SchedulerError::from_sqlx)?,
        elapsed_time: row
            .try_get(COL_ELAPSED_TIME)
            .map_err(SchedulerError::from_sqlx)?,
        depends_on: parse_depends_on(&depends_on_raw),
        created_at: parse_rfc3339(&created_at_raw)?,
        started_at: started_at_raw.as_deref().map(parse_rfc3339).transpose()?,
        finished_at: finished_at_raw.as_deref().map(parse_rfc3339).transpose()?,
        error_message: row
            .try_get(COL_ERROR_MESSAGE)
            .map_err(SchedulerError::from_sqlx)?,
        params,
    })
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::Integrity(format!("bad timestamp {raw:?}: {e}")))
}

/// Reject a batch whose `depends_on` edges form a cycle. Only edges between
/// rows in this batch can introduce a cycle: existing rows were already
/// validated acyclic when they were inserted, and they cannot depend on a
/// `job_id` that didn't exist yet, so a dependency pointing outside the
/// batch is always a terminal (no further edges to follow).
fn check_acyclic(batch_depends: &BTreeMap<String, BTreeSet<String>>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: &str,
        batch_depends: &BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                path.push(id.to_string());
                return Err(SchedulerError::CycleDetected(path.join(" -> ")));
            }
            None => {}
        }

        marks.insert(id.to_string(), Mark::Visiting);
        path.push(id.to_string());
        if let Some(deps) = batch_depends.get(id) {
            for dep in deps {
                if batch_depends.contains_key(dep) {
                    visit(dep, batch_depends, marks, path)?;
                }
            }
        }
        path.pop();
        marks.insert(id.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    for id in batch_depends.keys() {
        let mut path = Vec::new();
        visit(id, batch_depends, &mut marks, &mut path)?;
    }
    Ok(())
}

fn validate_column_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('"') || name.starts_with(RESERVED_PREFIX) {
        return Err(SchedulerError::InvalidArgument(format!(
            "invalid param column name {name:?}"
        )));
    }
    Ok(())
}
