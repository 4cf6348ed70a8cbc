//! Command-line surfaces for the worker and the boundary tools.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::args::ArgMode;
use crate::deadline::DeadlineConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BoolFlag {
    True,
    False,
}

impl From<BoolFlag> for bool {
    fn from(value: BoolFlag) -> Self {
        matches!(value, BoolFlag::True)
    }
}

/// `worker <db_file> <command> [options]`
#[derive(Debug, Parser)]
#[command(name = "worker", about = "Claim and execute jobs from a job store")]
pub struct WorkerArgs {
    /// Path to the SQLite job store.
    pub db_file: PathBuf,

    /// Shell-syntax command template run for each job.
    pub command: String,

    #[arg(long, default_value_t = 86_400)]
    pub max_runtime: i64,

    #[arg(long, default_value_t = 0)]
    pub margin_time: i64,

    #[arg(long, default_value_t = 1.0)]
    pub speed_factor: f64,

    #[arg(long, default_value = "true")]
    pub smart_scheduling: BoolFlag,

    /// Use `--k v` named arguments instead of positional ones.
    #[arg(long, default_value_t = false)]
    pub named_args: bool,

    #[arg(long, default_value_t = 1)]
    pub parallel: usize,

    #[arg(long, default_value_t = 30)]
    pub dep_wait_interval: u64,
}

impl WorkerArgs {
    pub fn into_worker_config(self) -> WorkerConfig {
        WorkerConfig {
            command_template: self.command,
            arg_mode: if self.named_args {
                ArgMode::Named
            } else {
                ArgMode::Positional
            },
            parallel: self.parallel.max(1),
            dep_wait_interval: Duration::from_secs(self.dep_wait_interval),
            deadline: DeadlineConfig {
                max_runtime_secs: self.max_runtime,
                margin_time_secs: self.margin_time,
                speed_factor: self.speed_factor,
                smart_scheduling: self.smart_scheduling.into(),
            },
        }
    }
}

/// `jobsched-import <csv_file> [db_file]`
#[derive(Debug, Parser)]
#[command(name = "jobsched-import", about = "Import jobs from a CSV file into a store")]
pub struct ImportArgs {
    pub csv_file: PathBuf,

    /// Defaults to `<csv_file>` with its extension replaced by `.db`.
    pub db_file: Option<PathBuf>,
}

/// `jobsched-export <db_file> [csv_file]`
#[derive(Debug, Parser)]
#[command(name = "jobsched-export", about = "Export jobs from a store into a CSV file")]
pub struct ExportArgs {
    pub db_file: PathBuf,

    /// Defaults to `<db_file>` with its extension replaced by `.csv`.
    pub csv_file: Option<PathBuf>,
}

/// `jobsched-view <db_file>`
#[derive(Debug, Parser)]
#[command(name = "jobsched-view", about = "Print a read-only progress snapshot of a store")]
pub struct ViewArgs {
    pub db_file: PathBuf,
}

pub fn default_sibling(path: &std::path::Path, new_ext: &str) -> PathBuf {
    path.with_extension(new_ext)
}
