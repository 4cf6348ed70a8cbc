//! Argument formatter.
//!
//! Builds the argv tail appended after the tokenized command template.
//! Never goes through a shell: values travel verbatim so whitespace inside
//! a param value survives, including embedded whitespace under named-args mode.

use crate::error::{Result, SchedulerError};
use crate::store::model::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMode {
    Positional,
    Named,
}

/// Build the argument vector for one job, in the store's fixed param-column
/// order. Positional mode keeps empty strings as placeholders; named mode
/// flattens to `[--k1, v1, --k2, v2, ...]`.
pub fn build_args(job: &Job, mode: ArgMode) -> Vec<String> {
    match mode {
        ArgMode::Positional => job.params.iter().map(|(_, v)| v.clone()).collect(),
        ArgMode::Named => job
            .params
            .iter()
            .flat_map(|(k, v)| vec![format!("--{k}"), v.clone()])
            .collect(),
    }
}

/// Tokenize a shell-syntax command template (e.g. `"bash run.sh"`) into argv
/// words, using a POSIX-shell tokenizer rather than invoking a shell.
pub fn tokenize_command(template: &str) -> Result<Vec<String>> {
    let words = shlex::split(template)
        .ok_or_else(|| SchedulerError::InvalidCommand(template.to_string()))?;
    if words.is_empty() {
        return Err(SchedulerError::InvalidCommand(template.to_string()));
    }
    Ok(words)
}
