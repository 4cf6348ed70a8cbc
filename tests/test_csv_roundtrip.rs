use std::io::Write;

use jobsched::Store;
use tempfile::TempDir;

#[tokio::test]
async fn import_then_export_preserves_params_and_whitespace_values() {
    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("jobs.csv");
    let db_path = dir.path().join("jobs.db");

    let mut file = std::fs::File::create(&csv_path).unwrap();
    writeln!(
        file,
        "JOBSCHEDULER_JOB_ID,JOBSCHEDULER_PRIORITY,JOBSCHEDULER_DEPENDS_ON,label,count"
    )
    .unwrap();
    writeln!(file, "a,5,,\"has space\",1").unwrap();
    writeln!(file, "b,0,a,other,2").unwrap();
    drop(file);

    let store = Store::open(&db_path).await.unwrap();
    let imported = jobsched::csv_io::import(&store, &csv_path).await.unwrap();
    assert_eq!(imported, 2);

    let a = store.get_job("a").await.unwrap().unwrap();
    assert_eq!(a.priority, 5);
    assert_eq!(
        a.params,
        vec![
            ("label".to_string(), "has space".to_string()),
            ("count".to_string(), "1".to_string()),
        ]
    );

    let b = store.get_job("b").await.unwrap().unwrap();
    assert!(b.depends_on.contains("a"));

    let export_path = dir.path().join("export.csv");
    let exported = jobsched::csv_io::export(&store, &export_path).await.unwrap();
    assert_eq!(exported, 2);

    let contents = std::fs::read_to_string(&export_path).unwrap();
    assert!(contents.contains("has space"));
    assert!(contents.contains("label"));
    assert!(contents.contains("JOBSCHEDULER_JOB_ID"));
}

#[tokio::test]
async fn import_generates_job_ids_when_missing() {
    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("jobs.csv");
    let db_path = dir.path().join("jobs.db");

    let mut file = std::fs::File::create(&csv_path).unwrap();
    writeln!(file, "payload").unwrap();
    writeln!(file, "one").unwrap();
    writeln!(file, "two").unwrap();
    drop(file);

    let store = Store::open(&db_path).await.unwrap();
    jobsched::csv_io::import(&store, &csv_path).await.unwrap();

    let jobs = store.all_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().any(|j| j.job_id == "job_000000"));
    assert!(jobs.iter().any(|j| j.job_id == "job_000001"));
}
