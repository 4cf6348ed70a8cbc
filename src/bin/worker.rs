use std::process::ExitCode;

use clap::Parser;
use jobsched::cli::WorkerArgs;
use jobsched::worker::{self, Shutdown};
use jobsched::Store;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = WorkerArgs::parse();
    let db_file = args.db_file.clone();
    let config = args.into_worker_config();

    let store = match Store::open(&db_file).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to open store");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received shutdown signal, draining in-flight jobs");
            signal_shutdown.trigger();
        }
    });

    match worker::run(store, config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "worker exited with error");
            ExitCode::FAILURE
        }
    }
}
