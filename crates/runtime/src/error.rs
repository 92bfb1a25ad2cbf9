//! Runtime error types.

use lantern_context::BudgetError;
use lantern_core::error::StoreError;
use thiserror::Error;

/// Failures of one worker run.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to start worker: {0}")]
    SpawnFailed(String),

    #[error("Worker {}: {}", describe_exit(.code, .signal), stderr_tail(.stderr))]
    NonZeroExit {
        code: Option<i32>,
        signal: Option<i32>,
        stderr: String,
    },

    #[error("No output generated")]
    MissingOutput,

    #[error("Worker output could not be decoded: {0}")]
    InvalidOutput(String),

    /// The worker ran and reported an engine error.
    #[error("Model error: {0}")]
    EngineFailure(String),

    #[error("Hand-off file error: {0}")]
    Handoff(String),
}

fn describe_exit(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("exited with status {code}"),
        (None, Some(signal)) => format!("was killed by signal {signal}"),
        (None, None) => "exited abnormally".into(),
    }
}

/// Last line of stderr, which is usually the error that ended the run.
fn stderr_tail(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(str::trim)
        .unwrap_or("no diagnostic output")
}

/// Failures of a chat submission, converted to a structured response at the
/// request boundary.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message has no text and no attachments")]
    EmptyMessage,

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
