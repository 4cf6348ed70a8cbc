use std::process::ExitCode;

use clap::Parser;
use jobsched::cli::{default_sibling, ExportArgs};
use jobsched::Store;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ExportArgs::parse();
    let csv_file = args
        .csv_file
        .unwrap_or_else(|| default_sibling(&args.db_file, "csv"));

    let store = match Store::open(&args.db_file).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to open store");
            return ExitCode::FAILURE;
        }
    };

    match jobsched::csv_io::export(&store, &csv_file).await {
        Ok(count) => {
            tracing::info!(count, csv_file = %csv_file.display(), "exported jobs");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "export failed");
            ExitCode::FAILURE
        }
    }
}
