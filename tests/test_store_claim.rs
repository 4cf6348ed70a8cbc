use std::collections::BTreeSet;

use chrono::Utc;
use jobsched::store::model::{JobStatus, Outcome};
use jobsched::store::NewJobRow;
use jobsched::Store;
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> Store {
    Store::open(&dir.path().join("jobs.db")).await.unwrap()
}

fn row(job_id: &str, priority: i64, depends_on: &[&str]) -> NewJobRow {
    NewJobRow {
        job_id: Some(job_id.to_string()),
        priority,
        estimate_time: 0.0,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        params: vec![],
    }
}

#[tokio::test]
async fn linear_chain_claims_in_dependency_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store
        .add_jobs(
            &[],
            &[
                row("a", 0, &[]),
                row("b", 0, &["a"]),
                row("c", 0, &["b"]),
            ],
        )
        .await
        .unwrap();

    let mut order = Vec::new();
    loop {
        match store.try_claim(Utc::now(), None, false, 1.0).await.unwrap() {
            jobsched::store::ClaimOutcome::Claimed(job) => {
                order.push(job.job_id.clone());
                store
                    .finish(&job.job_id, Outcome::Done, 0.1, None)
                    .await
                    .unwrap();
            }
            jobsched::store::ClaimOutcome::None { more_possible } => {
                assert!(!more_possible, "chain should fully drain");
                break;
            }
        }
    }

    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn priority_overrides_insertion_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store
        .add_jobs(
            &[],
            &[row("x", 1, &[]), row("y", 10, &[]), row("z", 5, &[])],
        )
        .await
        .unwrap();

    let mut order = Vec::new();
    for _ in 0..3 {
        let jobsched::store::ClaimOutcome::Claimed(job) =
            store.try_claim(Utc::now(), None, false, 1.0).await.unwrap()
        else {
            panic!("expected a claim");
        };
        order.push(job.job_id.clone());
        store
            .finish(&job.job_id, Outcome::Done, 0.0, None)
            .await
            .unwrap();
    }

    assert_eq!(order, vec!["y", "z", "x"]);
}

#[tokio::test]
async fn blocked_fan_out_propagates_from_errored_predecessor() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store
        .add_jobs(
            &[],
            &[
                row("root", 0, &[]),
                row("child1", 0, &["root"]),
                row("child2", 0, &["root"]),
            ],
        )
        .await
        .unwrap();

    let jobsched::store::ClaimOutcome::Claimed(root) =
        store.try_claim(Utc::now(), None, false, 1.0).await.unwrap()
    else {
        panic!("expected root to claim");
    };
    assert_eq!(root.job_id, "root");
    store
        .finish(&root.job_id, Outcome::Error, 0.0, Some("boom".to_string()))
        .await
        .unwrap();

    let outcome = store.try_claim(Utc::now(), None, false, 1.0).await.unwrap();
    match outcome {
        jobsched::store::ClaimOutcome::None { more_possible } => assert!(!more_possible),
        jobsched::store::ClaimOutcome::Claimed(job) => {
            panic!("expected nothing claimable, got {}", job.job_id)
        }
    }

    let counts = store.snapshot_counts().await.unwrap();
    assert_eq!(counts.error, 1);
    assert_eq!(counts.pending_blocked, 2);
    assert_eq!(counts.pending_ready, 0);
    assert_eq!(counts.pending_waiting, 0);
}

#[tokio::test]
async fn deadline_filter_rejects_overbudget_estimate_until_disabled() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let mut h = row("h", 0, &[]);
    h.estimate_time = 2.0; // hours

    store.add_jobs(&[], std::slice::from_ref(&h)).await.unwrap();

    let outcome = store
        .try_claim(Utc::now(), Some(3600), true, 1.0)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        jobsched::store::ClaimOutcome::None { more_possible: false }
    ));

    let outcome = store
        .try_claim(Utc::now(), Some(3600), false, 1.0)
        .await
        .unwrap();
    match outcome {
        jobsched::store::ClaimOutcome::Claimed(job) => assert_eq!(job.job_id, "h"),
        jobsched::store::ClaimOutcome::None { .. } => panic!("expected h to be claimable"),
    }
}

#[tokio::test]
async fn claim_exclusivity_under_concurrent_workers() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let rows: Vec<NewJobRow> = (0..50).map(|i| row(&format!("job_{i:03}"), 0, &[])).collect();
    store.add_jobs(&[], &rows).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                match store.try_claim(Utc::now(), None, false, 1.0).await.unwrap() {
                    jobsched::store::ClaimOutcome::Claimed(job) => {
                        store
                            .finish(&job.job_id, Outcome::Done, 0.0, None)
                            .await
                            .unwrap();
                        claimed.push(job.job_id);
                    }
                    jobsched::store::ClaimOutcome::None { more_possible } => {
                        assert!(!more_possible);
                        break;
                    }
                }
            }
            claimed
        }));
    }

    let mut all_claimed = BTreeSet::new();
    let mut total = 0;
    for handle in handles {
        let claimed = handle.await.unwrap();
        total += claimed.len();
        for id in claimed {
            assert!(all_claimed.insert(id), "job claimed by more than one worker");
        }
    }

    assert_eq!(total, 50);
    assert_eq!(all_claimed.len(), 50);

    let counts = store.snapshot_counts().await.unwrap();
    assert_eq!(counts.done, 50);
    assert_eq!(counts.running, 0);
}

#[tokio::test]
async fn stuck_recovery_resets_running_rows() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store.add_jobs(&[], &[row("a", 0, &[]), row("b", 0, &[])]).await.unwrap();

    let jobsched::store::ClaimOutcome::Claimed(job) =
        store.try_claim(Utc::now(), None, false, 1.0).await.unwrap()
    else {
        panic!("expected a claim");
    };
    let claimed_id = job.job_id;

    // Simulate the worker dying mid-run: the row stays `running`, never
    // reaching `finish()`.
    let recovered = store.recover_stuck().await.unwrap();
    assert_eq!(recovered, 1);

    let job = store.get_job(&claimed_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.started_at.is_none());
}

#[tokio::test]
async fn schema_mismatch_is_rejected_atomically() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let mut a = row("a", 0, &[]);
    a.params = vec![("x".to_string(), "1".to_string())];
    store.add_jobs(&["x".to_string()], &[a]).await.unwrap();

    let mut b = row("b", 0, &[]);
    b.params = vec![("y".to_string(), "1".to_string())];
    let err = store.add_jobs(&["y".to_string()], &[b]).await.unwrap_err();
    assert!(matches!(err, jobsched::SchedulerError::SchemaMismatch { .. }));

    // The table must be unaffected: only "a" exists, schema is still ["x"].
    assert_eq!(store.param_columns().await.unwrap(), vec!["x".to_string()]);
    assert!(store.get_job("b").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_job_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store.add_jobs(&[], &[row("a", 0, &[])]).await.unwrap();
    let err = store.add_jobs(&[], &[row("a", 0, &[])]).await.unwrap_err();
    assert!(matches!(err, jobsched::SchedulerError::Integrity(_)));
}

#[tokio::test]
async fn dependency_on_unknown_job_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let err = store
        .add_jobs(&[], &[row("a", 0, &["ghost"])])
        .await
        .unwrap_err();
    assert!(matches!(err, jobsched::SchedulerError::Integrity(_)));
}

#[tokio::test]
async fn dependency_order_within_a_batch_does_not_matter() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    // "b" is listed before its dependency "a"; this is a legitimate acyclic
    // batch and must not be rejected just because of row order.
    store
        .add_jobs(&[], &[row("b", 0, &["a"]), row("a", 0, &[])])
        .await
        .unwrap();

    let a = store.get_job("a").await.unwrap().unwrap();
    let b = store.get_job("b").await.unwrap().unwrap();
    assert_eq!(a.status, JobStatus::Pending);
    assert!(b.depends_on.contains("a"));
}

#[tokio::test]
async fn direct_cycle_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let err = store
        .add_jobs(&[], &[row("a", 0, &["b"]), row("b", 0, &["a"])])
        .await
        .unwrap_err();
    assert!(matches!(err, jobsched::SchedulerError::CycleDetected(_)));

    // The whole batch must be rejected atomically: neither row exists.
    assert!(store.get_job("a").await.unwrap().is_none());
    assert!(store.get_job("b").await.unwrap().is_none());
}

#[tokio::test]
async fn longer_cycle_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let err = store
        .add_jobs(
            &[],
            &[
                row("a", 0, &["b"]),
                row("b", 0, &["c"]),
                row("c", 0, &["a"]),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, jobsched::SchedulerError::CycleDetected(_)));
}

#[tokio::test]
async fn self_dependency_is_rejected_as_a_cycle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let err = store
        .add_jobs(&[], &[row("a", 0, &["a"])])
        .await
        .unwrap_err();
    assert!(matches!(err, jobsched::SchedulerError::CycleDetected(_)));
}
