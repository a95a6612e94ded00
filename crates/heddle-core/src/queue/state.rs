//! Task state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Pending -> Assigned -> Running -> Completed
/// - Assigned | Running -> Failed -> Pending (retry, while retries remain)
/// - Pending | Assigned | Running -> Cancelled
///
/// Assigned -> Completed is allowed because a fast worker may report before the
/// launcher's acknowledgement is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,

    /// Holds a slot and its file claims; launch in flight.
    Assigned,

    /// Worker launched.
    Running,

    Completed,

    /// Failed permanently once it is no longer requeued.
    Failed,

    Cancelled,
}

impl TaskStatus {
    /// Is `next` a legal edge from `self`?
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, Running)
                | (Assigned, Completed)
                | (Assigned, Failed)
                | (Assigned, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
        )
    }

    /// Holding a slot?
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }

    /// Terminal as observed from outside the scheduler. A retryable failure is
    /// requeued under the same lock, so a task resting in `Failed` is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
