use std::process::ExitCode;

use clap::Parser;
use jobsched::cli::ViewArgs;
use jobsched::Store;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ViewArgs::parse();

    let store = match Store::open(&args.db_file).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to open store");
            return ExitCode::FAILURE;
        }
    };

    match store.snapshot_counts().await {
        Ok(counts) => {
            println!("{:<16} {:>8}", "running", counts.running);
            println!("{:<16} {:>8}", "done", counts.done);
            println!("{:<16} {:>8}", "error", counts.error);
            println!("{:<16} {:>8}", "pending (ready)", counts.pending_ready);
            println!("{:<16} {:>8}", "pending (waiting)", counts.pending_waiting);
            println!("{:<16} {:>8}", "pending (blocked)", counts.pending_blocked);
            println!("{:-<25}", "");
            println!("{:<16} {:>8}", "total", counts.total());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to read snapshot");
            ExitCode::FAILURE
        }
    }
}
