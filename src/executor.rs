//! Executor: runs one claimed job to completion.
//!
//! Runs one claimed job as a child process built from the tokenized command
//! template plus the job's argv tail, streams its output with a `job_id`
//! prefix, and turns the exit status into an `Outcome` plus an error message
//! tail for the `done`/`error` transition.

use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::args::{build_args, tokenize_command, ArgMode};
use crate::error::Result;
use crate::store::model::{Job, Outcome};

/// Lines of trailing stderr kept for the `error_message` column when a job
/// fails; enough to see the actual failure without storing unbounded output.
const ERROR_TAIL_LINES: usize = 20;

pub struct ExecutionResult {
    pub outcome: Outcome,
    pub elapsed_secs: f64,
    pub error_message: Option<String>,
}

/// Run `job` to completion, streaming its stdout/stderr to our own with a
/// `[job_id]` prefix so a multi-slot worker's combined log stays readable.
pub async fn run(command_template: &str, job: &Job, arg_mode: ArgMode) -> Result<ExecutionResult> {
    let mut argv = tokenize_command(command_template)?;
    argv.extend(build_args(job, arg_mode));

    let program = &argv[0];
    let mut cmd = Command::new(program);
    cmd.args(&argv[1..]);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let start = Instant::now();
    info!(job_id = %job.job_id, command = %argv.join(" "), "starting job");

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let job_id_out = job.job_id.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(job_id = %job_id_out, "{line}");
        }
    });

    let job_id_err = job.job_id.clone();
    let stderr_task = tokio::spawn(async move {
        let mut tail = std::collections::VecDeque::with_capacity(ERROR_TAIL_LINES + 1);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(job_id = %job_id_err, "{line}");
            if tail.len() == ERROR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().collect::<Vec<_>>().join("\n")
    });

    let status = child.wait().await?;
    let _ = stdout_task.await;
    let stderr_tail = stderr_task.await.unwrap_or_default();

    let elapsed_secs = start.elapsed().as_secs_f64();

    let result = if status.success() {
        info!(job_id = %job.job_id, elapsed_secs, "job done");
        ExecutionResult {
            outcome: Outcome::Done,
            elapsed_secs,
            error_message: None,
        }
    } else {
        let message = format!(
            "exit status {}: {}",
            status.code().map_or("signal".to_string(), |c| c.to_string()),
            if stderr_tail.is_empty() {
                "(no stderr output)".to_string()
            } else {
                stderr_tail
            }
        );
        error!(job_id = %job.job_id, elapsed_secs, %message, "job error");
        ExecutionResult {
            outcome: Outcome::Error,
            elapsed_secs,
            error_message: Some(message),
        }
    };

    Ok(result)
}

/// Retry `Store::finish` with capped exponential backoff, since a transient
/// lock timeout on the terminal write shouldn't drop the job's outcome. A
/// persistently busy store eventually gives up rather than retrying forever,
/// leaving the row `running` for a later worker's stuck-job recovery to pick
/// up, per spec: "persistent failure aborts the worker".
pub async fn finish_with_retry<F, Fut>(attempt: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    finish_with_retry_bounded(attempt, MAX_RETRY_ELAPSED).await
}

const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(300);

/// `finish_with_retry` with an injectable elapsed-time cap, so the give-up
/// path can be exercised in tests without waiting out the real 300s budget.
async fn finish_with_retry_bounded<F, Fut>(mut attempt: F, max_elapsed: Duration) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    const MAX_BACKOFF: Duration = Duration::from_secs(60);

    let started = Instant::now();
    let mut backoff = Duration::from_millis(100);
    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(crate::error::SchedulerError::LockTimeout) => {
                if started.elapsed() >= max_elapsed {
                    error!(
                        elapsed = ?started.elapsed(),
                        "store persistently busy, giving up on finish commit"
                    );
                    return Err(crate::error::SchedulerError::LockTimeout);
                }
                warn!(?backoff, "store busy while finishing job, retrying");
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod retry_tests {
    use super::*;
    use crate::error::SchedulerError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn gives_up_after_the_elapsed_cap_instead_of_retrying_forever() {
        let attempts = AtomicUsize::new(0);
        let result = finish_with_retry_bounded(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SchedulerError::LockTimeout) }
            },
            Duration::from_millis(250),
        )
        .await;

        assert!(matches!(result, Err(SchedulerError::LockTimeout)));
        assert!(attempts.load(Ordering::SeqCst) > 1, "should have retried at least once");
    }

    #[tokio::test]
    async fn succeeds_without_retrying_past_the_first_success() {
        let attempts = AtomicUsize::new(0);
        let result = finish_with_retry_bounded(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SchedulerError::LockTimeout)
                    } else {
                        Ok(())
                    }
                }
            },
            Duration::from_secs(5),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
