//! Task record: the pool's single source of truth for one task.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;
use crate::domain::{FailureKind, PoolError, Priority, SlotId, TaskId, TaskSpec};

/// Task as tracked by the scheduler.
///
/// Design:
/// - Queue structures hold `TaskId` only.
/// - Every status change goes through `transition`, which rejects edges the
///   state machine does not have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub priority: Priority,
    pub files: BTreeSet<String>,
    pub payload: serde_json::Value,
    pub status: TaskStatus,

    /// Slot holding (or last holding) the task. `None` while pending.
    pub worker_id: Option<SlotId>,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Retries consumed by timeouts and reported failures.
    pub retries: u32,

    /// Consecutive launch failures. Reset by a successful launch.
    pub launch_failures: u32,

    /// Number of assignments so far; identifies the current attempt.
    pub attempt: u32,

    pub error: Option<String>,
    pub failure: Option<FailureKind>,

    /// Submission order, FIFO tie-break inside a priority tier.
    #[serde(skip)]
    pub(crate) sequence: u64,
}

impl Task {
    pub fn new(
        id: TaskId,
        spec: TaskSpec,
        files: BTreeSet<String>,
        submitted_at: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            description: spec.description,
            priority: spec.priority,
            files,
            payload: spec.payload,
            status: TaskStatus::Pending,
            worker_id: None,
            submitted_at,
            started_at: None,
            completed_at: None,
            retries: 0,
            launch_failures: 0,
            attempt: 0,
            error: None,
            failure: None,
            sequence,
        }
    }

    /// Submission spec, as recorded in the event log.
    pub fn spec(&self) -> TaskSpec {
        TaskSpec {
            description: self.description.clone(),
            priority: self.priority,
            files: self.file_list(),
            payload: self.payload.clone(),
        }
    }

    pub fn file_list(&self) -> Vec<String> {
        self.files.iter().cloned().collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), PoolError> {
        if !self.status.can_transition_to(next) {
            return Err(PoolError::InvalidTransition {
                task: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Pending -> Assigned.
    pub fn assign(&mut self, slot: SlotId, now: DateTime<Utc>) -> Result<(), PoolError> {
        self.transition(TaskStatus::Assigned)?;
        self.worker_id = Some(slot);
        self.started_at = Some(now);
        self.attempt += 1;
        Ok(())
    }

    /// Assigned -> Running.
    pub fn mark_running(&mut self) -> Result<(), PoolError> {
        self.transition(TaskStatus::Running)?;
        self.launch_failures = 0;
        Ok(())
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<(), PoolError> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(now);
        self.error = None;
        self.failure = None;
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        kind: FailureKind,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PoolError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        self.failure = Some(kind);
        self.completed_at = Some(now);
        if kind == FailureKind::LaunchFailure {
            self.launch_failures += 1;
        }
        Ok(())
    }

    /// Failed -> Pending. `submitted_at` and `sequence` are kept so the task
    /// returns to its original place in its tier.
    pub fn requeue(&mut self) -> Result<(), PoolError> {
        let consumed = self.failure.is_some_and(FailureKind::consumes_retry);
        self.transition(TaskStatus::Pending)?;
        if consumed {
            self.retries += 1;
        }
        self.worker_id = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), PoolError> {
        self.transition(TaskStatus::Cancelled)?;
        self.completed_at = Some(now);
        Ok(())
    }
}
