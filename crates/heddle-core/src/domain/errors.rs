//! Errors - エラー型と分類
//!
//! Caller-facing errors are `PoolError`. Persistence and launch errors have
//! their own types so adapters can report them without knowing about the pool.

use thiserror::Error;

use super::ids::{SlotId, TaskId};
use crate::queue::TaskStatus;

/// Errors surfaced through the pool API.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Malformed submission (e.g. empty `files`).
    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),

    #[error("task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The task reached a terminal status other than `completed`.
    #[error("task {task} ended {status}: {}", .error.as_deref().unwrap_or("no reason recorded"))]
    TaskFailed {
        task: TaskId,
        status: TaskStatus,
        error: Option<String>,
    },

    #[error("timed out waiting for task {0}")]
    WaitTimeout(TaskId),

    #[error("pool is not initialized")]
    NotInitialized,

    #[error("pool was already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Errors from the on-disk claim snapshot and event log.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from a `Launcher`. Always an infrastructure fault: it never
/// consumes one of the task's retries.
#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("launcher unavailable: {0}")]
    Unavailable(String),
}
