use thiserror::Error;

/// Top-level error type for the scheduler library.
///
/// Store-level failures carry enough detail for a worker to decide
/// whether to retry locally or abort.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema mismatch: existing param columns {existing:?}, got {got:?}")]
    SchemaMismatch {
        existing: Vec<String>,
        got: Vec<String>,
    },

    #[error("store busy: lock not acquired within the busy timeout")]
    LockTimeout,

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("dependency cycle detected: {0}")]
    CycleDetected(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command template: {0}")]
    InvalidCommand(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Classify a raw sqlx error as a lock timeout rather than a generic
    /// database error, so callers can retry instead of aborting.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            SchedulerError::LockTimeout
        } else {
            SchedulerError::Database(err)
        }
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}
