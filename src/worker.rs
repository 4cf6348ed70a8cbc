//! Worker loop: per-worker multi-slot job execution.
//!
//! Each worker process runs `parallel` concurrent slots against one `Store`.
//! A slot claims a job, runs it through the executor, commits the outcome,
//! and loops; when nothing is claimable it either stops (no waiting work
//! left) or sleeps `dep_wait_interval` and retries (something is still
//! waiting on a predecessor).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

use crate::args::ArgMode;
use crate::deadline::{Deadline, DeadlineConfig};
use crate::error::Result;
use crate::executor;
use crate::store::model::Outcome;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub command_template: String,
    pub arg_mode: ArgMode,
    pub parallel: usize,
    pub dep_wait_interval: Duration,
    pub deadline: DeadlineConfig,
}

/// Shared shutdown signal: a ctrl-c handler sets the flag and wakes any slot
/// sleeping in the dependency-wait backoff.
#[derive(Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Run the worker loop to completion: recovers stuck rows, then drives
/// `parallel` slots until the store is drained, the deadline budget is
/// exhausted, or shutdown is requested.
pub async fn run(store: Store, config: WorkerConfig, shutdown: Shutdown) -> Result<()> {
    let recovered = store.recover_stuck().await?;
    if recovered > 0 {
        warn!(recovered, "reset stuck running jobs to pending at startup");
    }

    let deadline = Deadline::start_now(config.deadline);
    info!(parallel = config.parallel, "worker starting");

    // One claim at a time per worker: slots race each other's subprocess
    // execution freely, but the claim step itself is serialized through this
    // lock so a multi-slot worker never contends with itself over the
    // store's write-intent transaction (only cross-worker contention reaches
    // the busy timeout).
    let claim_lock = Arc::new(Mutex::new(()));

    let mut slots = Vec::with_capacity(config.parallel);
    for slot_id in 0..config.parallel {
        let store = store.clone();
        let config = config.clone();
        let deadline = deadline.clone();
        let shutdown = shutdown.clone();
        let claim_lock = claim_lock.clone();
        slots.push(tokio::spawn(async move {
            run_slot(slot_id, store, config, deadline, shutdown, claim_lock).await
        }));
    }

    for slot in slots {
        match slot.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(join_err) => {
                return Err(crate::error::SchedulerError::Integrity(format!(
                    "worker slot panicked: {join_err}"
                )))
            }
        }
    }

    info!("worker finished");
    Ok(())
}

async fn run_slot(
    slot_id: usize,
    store: Store,
    config: WorkerConfig,
    deadline: Deadline,
    shutdown: Shutdown,
    claim_lock: Arc<Mutex<()>>,
) -> Result<()> {
    loop {
        if shutdown.requested() {
            info!(slot_id, "shutdown requested, stopping slot");
            return Ok(());
        }

        let budget = deadline.budget_seconds();
        if budget <= 0 {
            info!(slot_id, "deadline budget exhausted, stopping slot");
            return Ok(());
        }

        let claim = {
            let _claim_guard = claim_lock.lock().await;
            store
                .try_claim(
                    Utc::now(),
                    Some(budget),
                    deadline.smart_scheduling(),
                    deadline.speed_factor(),
                )
                .await?
        };

        let job = match claim {
            crate::store::ClaimOutcome::Claimed(job) => job,
            crate::store::ClaimOutcome::None { more_possible } => {
                if !more_possible {
                    info!(slot_id, "no more claimable or waiting work, stopping slot");
                    return Ok(());
                }
                tokio::select! {
                    _ = tokio::time::sleep(config.dep_wait_interval) => {}
                    _ = shutdown.wait() => {
                        info!(slot_id, "shutdown requested while waiting on dependencies");
                        return Ok(());
                    }
                }
                continue;
            }
        };

        let job_id = job.job_id.clone();
        let result = executor::run(&config.command_template, &job, config.arg_mode).await;

        match result {
            Ok(exec_result) => {
                let store = store.clone();
                let job_id = job_id.clone();
                let outcome = exec_result.outcome;
                let elapsed = exec_result.elapsed_secs;
                let message = exec_result.error_message.clone();
                executor::finish_with_retry(|| {
                    store.finish(&job_id, outcome, elapsed, message.clone())
                })
                .await?;
            }
            Err(e) => {
                warn!(slot_id, job_id = %job_id, error = %e, "job failed to launch");
                let message = Some(format!("spawn failed: {e}"));
                let store = store.clone();
                let job_id = job_id.clone();
                executor::finish_with_retry(|| {
                    store.finish(&job_id, Outcome::Error, 0.0, message.clone())
                })
                .await?;
            }
        }
    }
}
