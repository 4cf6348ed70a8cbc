use std::process::ExitCode;

use clap::Parser;
use jobsched::cli::{default_sibling, ImportArgs};
use jobsched::Store;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ImportArgs::parse();
    let db_file = args
        .db_file
        .unwrap_or_else(|| default_sibling(&args.csv_file, "db"));

    let store = match Store::open(&db_file).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to open store");
            return ExitCode::FAILURE;
        }
    };

    match jobsched::csv_io::import(&store, &args.csv_file).await {
        Ok(count) => {
            tracing::info!(count, db_file = %db_file.display(), "imported jobs");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "import failed");
            ExitCode::FAILURE
        }
    }
}
