use jobsched::args::ArgMode;
use jobsched::executor;
use jobsched::store::model::{JobStatus, Outcome};
use std::collections::BTreeSet;

fn job_with_params(params: Vec<(&str, &str)>) -> jobsched::store::model::Job {
    jobsched::store::model::Job {
        job_id: "job_000001".into(),
        status: JobStatus::Pending,
        priority: 0,
        estimate_time: 0.0,
        elapsed_time: 0.0,
        depends_on: BTreeSet::new(),
        created_at: chrono::Utc::now(),
        started_at: None,
        finished_at: None,
        error_message: None,
        params: params
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[tokio::test]
async fn successful_command_yields_done_outcome() {
    let job = job_with_params(vec![]);
    let result = executor::run("true", &job, ArgMode::Positional).await.unwrap();
    assert_eq!(result.outcome, Outcome::Done);
    assert!(result.error_message.is_none());
}

#[tokio::test]
async fn failing_command_yields_error_outcome_with_message() {
    let job = job_with_params(vec![]);
    let result = executor::run("false", &job, ArgMode::Positional).await.unwrap();
    assert_eq!(result.outcome, Outcome::Error);
    assert!(result.error_message.is_some());
}

#[tokio::test]
async fn positional_args_pass_through_to_subprocess() {
    let job = job_with_params(vec![("greeting", "hello world")]);
    // sh -c exits nonzero unless the first positional arg equals "hello world".
    let result = executor::run(
        r#"sh -c '[ "$1" = "hello world" ]' sh"#,
        &job,
        ArgMode::Positional,
    )
    .await
    .unwrap();
    assert_eq!(result.outcome, Outcome::Done);
}

#[tokio::test]
async fn named_args_carry_whitespace_verbatim() {
    let job = job_with_params(vec![("label", "has space")]);
    let result = executor::run(
        r#"sh -c '[ "$2" = "has space" ]' sh"#,
        &job,
        ArgMode::Named,
    )
    .await
    .unwrap();
    assert_eq!(result.outcome, Outcome::Done);
}
