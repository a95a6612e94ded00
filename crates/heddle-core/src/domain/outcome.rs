//! Outcome model: what a worker reports back and why a task failed.

use serde::{Deserialize, Serialize};

/// Result a worker reports for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Succeeded,
    Failed(String),
}

impl WorkerOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        WorkerOutcome::Failed(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Succeeded)
    }
}

/// Classification of a failure recorded on a task.
///
/// - `LaunchFailure`: the launcher could not start the worker. Infra fault, no retry consumed.
/// - `Timeout`: the attempt outlived `task_timeout_ms`. Consumes a retry.
/// - `Reported`: the worker itself reported failure. Consumes a retry.
///
/// Cancellation is not a failure kind; it is the `cancelled` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LaunchFailure,
    Timeout,
    Reported,
}

impl FailureKind {
    /// Does this failure count against `max_retries`?
    pub fn consumes_retry(self) -> bool {
        !matches!(self, FailureKind::LaunchFailure)
    }
}
