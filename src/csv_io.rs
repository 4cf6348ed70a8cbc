//! CSV import/export boundary tool.
//!
//! Drives only the store's public contract (`add_jobs`, `all_jobs`,
//! `param_columns`) — no claim or scheduling logic lives here.

use std::path::Path;

use crate::error::Result;
use crate::store::model::{
    parse_depends_on, Job, COL_CREATED_AT, COL_DEPENDS_ON, COL_ELAPSED_TIME, COL_ERROR_MESSAGE,
    COL_ESTIMATE_TIME, COL_FINISHED_AT, COL_JOB_ID, COL_PRIORITY, COL_STARTED_AT, COL_STATUS,
    RESERVED_PREFIX,
};
use crate::store::{NewJobRow, Store};

/// Import jobs from `csv_path` into `store`, inferring the param-column set
/// from whichever header fields aren't `JOBSCHEDULER_`-prefixed.
pub async fn import(store: &Store, csv_path: &Path) -> Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let headers = reader.headers()?.clone();

    let param_columns: Vec<String> = headers
        .iter()
        .filter(|h| !h.starts_with(RESERVED_PREFIX))
        .map(|h| h.to_string())
        .collect();

    let job_id_idx = headers.iter().position(|h| h == COL_JOB_ID);
    let priority_idx = headers.iter().position(|h| h == COL_PRIORITY);
    let estimate_idx = headers.iter().position(|h| h == COL_ESTIMATE_TIME);
    let depends_idx = headers.iter().position(|h| h == COL_DEPENDS_ON);
    let param_idx: Vec<usize> = param_columns
        .iter()
        .map(|col| headers.iter().position(|h| h == col).expect("present"))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;

        let job_id = job_id_idx
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let priority = priority_idx
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap_or(0))
            .unwrap_or(0);
        let estimate_time = estimate_idx
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap_or(0.0))
            .unwrap_or(0.0);
        let depends_on = depends_idx
            .and_then(|i| record.get(i))
            .map(parse_depends_on)
            .unwrap_or_default();
        let params = param_columns
            .iter()
            .zip(&param_idx)
            .map(|(col, &idx)| (col.clone(), record.get(idx).unwrap_or("").to_string()))
            .collect();

        rows.push(NewJobRow {
            job_id,
            priority,
            estimate_time,
            depends_on,
            params,
        });
    }

    let count = rows.len();
    store.add_jobs(&param_columns, &rows).await?;
    Ok(count)
}

/// Export every job in `store` to `csv_path`, params first, reserved columns
/// last — the inverse column order of `import`.
pub async fn export(store: &Store, csv_path: &Path) -> Result<usize> {
    let param_columns = store.param_columns().await?;
    let jobs = store.all_jobs().await?;

    let mut header: Vec<String> = param_columns.clone();
    header.extend(
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
        .map(|s| s.to_string()),
    );

    let mut writer = csv::Writer::from_path(csv_path)?;
    writer.write_record(&header)?;

    let count = jobs.len();
    for job in &jobs {
        writer.write_record(job_record(job, &param_columns))?;
    }
    writer.flush()?;
    Ok(count)
}

fn job_record(job: &Job, param_columns: &[String]) -> Vec<String> {
    let mut record: Vec<String> = param_columns
        .iter()
        .map(|col| {
            job.params
                .iter()
                .find(|(k, _)| k == col)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        })
        .collect();

    record.push(job.job_id.clone());
    record.push(job.status.to_string());
    record.push(job.priority.to_string());
    record.push(job.estimate_time.to_string());
    record.push(job.elapsed_time.to_string());
    record.push(
        job.depends_on
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(" "),
    );
    record.push(job.created_at.to_rfc3339());
    record.push(job.started_at.map(|t| t.to_rfc3339()).unwrap_or_default());
    record.push(job.finished_at.map(|t| t.to_rfc3339()).unwrap_or_default());
    record.push(job.error_message.clone().unwrap_or_default());

    record
}
