//! Events - プールで発生したイベント
//!
//! One JSON object per line in the event log:
//! `{timestamp, workerId, eventKind, taskId, files?}` plus optional detail
//! fields. Events are immutable and only read back during recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{SlotId, TaskId};
use super::outcome::FailureKind;
use super::task::TaskSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Task accepted; carries the full spec so pending work survives a restart.
    Submitted,
    /// Slot claimed the task's files.
    Assigned,
    /// Launcher started the worker.
    Running,
    Completed,
    Failed,
    /// Failed attempt returned to the queue.
    Requeued,
    Cancelled,
    /// A slot's claim was released without its task finishing.
    SlotReleased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEvent {
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<SlotId>,

    pub event_kind: EventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskSpec>,
}

impl PoolEvent {
    fn base(timestamp: DateTime<Utc>, event_kind: EventKind) -> Self {
        Self {
            timestamp,
            worker_id: None,
            event_kind,
            task_id: None,
            files: None,
            failure: None,
            error: None,
            retries: None,
            task: None,
        }
    }

    pub fn submitted(timestamp: DateTime<Utc>, task_id: TaskId, spec: TaskSpec) -> Self {
        Self {
            task_id: Some(task_id),
            task: Some(spec),
            ..Self::base(timestamp, EventKind::Submitted)
        }
    }

    pub fn assigned(
        timestamp: DateTime<Utc>,
        slot: SlotId,
        task_id: TaskId,
        files: Vec<String>,
    ) -> Self {
        Self {
            worker_id: Some(slot),
            task_id: Some(task_id),
            files: Some(files),
            ..Self::base(timestamp, EventKind::Assigned)
        }
    }

    pub fn running(timestamp: DateTime<Utc>, slot: SlotId, task_id: TaskId) -> Self {
        Self {
            worker_id: Some(slot),
            task_id: Some(task_id),
            ..Self::base(timestamp, EventKind::Running)
        }
    }

    pub fn completed(timestamp: DateTime<Utc>, slot: SlotId, task_id: TaskId) -> Self {
        Self {
            worker_id: Some(slot),
            task_id: Some(task_id),
            ..Self::base(timestamp, EventKind::Completed)
        }
    }

    pub fn failed(
        timestamp: DateTime<Utc>,
        slot: SlotId,
        task_id: TaskId,
        failure: FailureKind,
        error: impl Into<String>,
        retries: u32,
    ) -> Self {
        Self {
            worker_id: Some(slot),
            task_id: Some(task_id),
            failure: Some(failure),
            error: Some(error.into()),
            retries: Some(retries),
            ..Self::base(timestamp, EventKind::Failed)
        }
    }

    pub fn requeued(timestamp: DateTime<Utc>, task_id: TaskId, retries: u32) -> Self {
        Self {
            task_id: Some(task_id),
            retries: Some(retries),
            ..Self::base(timestamp, EventKind::Requeued)
        }
    }

    pub fn cancelled(timestamp: DateTime<Utc>, slot: Option<SlotId>, task_id: TaskId) -> Self {
        Self {
            worker_id: slot,
            task_id: Some(task_id),
            ..Self::base(timestamp, EventKind::Cancelled)
        }
    }

    pub fn slot_released(timestamp: DateTime<Utc>, slot: SlotId, task_id: Option<TaskId>) -> Self {
        Self {
            worker_id: Some(slot),
            task_id,
            ..Self::base(timestamp, EventKind::SlotReleased)
        }
    }

    /// Does this event leave its worker without a task?
    pub fn frees_worker(&self) -> bool {
        matches!(
            self.event_kind,
            EventKind::Completed | EventKind::Failed | EventKind::Cancelled | EventKind::SlotReleased
        )
    }
}
