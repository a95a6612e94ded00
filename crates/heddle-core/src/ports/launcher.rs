//! Launcher port - 外部ワーカーの起動
//!
//! The pool hands `(slot, payload)` to a launcher and moves on. Whatever the
//! launcher starts reports back through the `WorkerReporter` it was given, or
//! stays silent and is eventually timed out by the health monitor.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{LaunchError, SlotId, TaskId, WorkerOutcome};

/// One worker's report for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub task_id: TaskId,
    pub slot_id: SlotId,
    pub attempt: u32,
    pub outcome: WorkerOutcome,
}

/// Report channel bound to a single attempt.
///
/// Reports from an attempt the pool has already given up on (timed out,
/// cancelled) are discarded by the pool, so a late worker cannot complete a
/// task that has moved on.
#[derive(Debug, Clone)]
pub struct WorkerReporter {
    tx: mpsc::UnboundedSender<WorkerReport>,
    task_id: TaskId,
    slot_id: SlotId,
    attempt: u32,
}

impl WorkerReporter {
    pub fn new(
        tx: mpsc::UnboundedSender<WorkerReport>,
        task_id: TaskId,
        slot_id: SlotId,
        attempt: u32,
    ) -> Self {
        Self {
            tx,
            task_id,
            slot_id,
            attempt,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    /// Send a report. Returns `false` if the pool is gone.
    pub fn report(&self, outcome: WorkerOutcome) -> bool {
        self.tx
            .send(WorkerReport {
                task_id: self.task_id,
                slot_id: self.slot_id,
                attempt: self.attempt,
                outcome,
            })
            .is_ok()
    }

    pub fn succeeded(&self) -> bool {
        self.report(WorkerOutcome::Succeeded)
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.report(WorkerOutcome::failed(reason))
    }
}

/// Everything a launcher needs to start one attempt.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub slot_id: SlotId,
    pub task_id: TaskId,
    pub attempt: u32,
    pub description: String,
    pub payload: serde_json::Value,
    pub reporter: WorkerReporter,
}

/// Handle to a launched worker, kept by the slot while the task runs.
///
/// Dropping the handle is the stop request: a launcher that supports it
/// watches the paired receiver and terminates its worker when the sender goes
/// away. The pool drops handles on cancel, timeout and completion.
#[derive(Debug, Default)]
pub struct LaunchHandle {
    pid: Option<u32>,
    _stop: Option<oneshot::Sender<()>>,
}

impl LaunchHandle {
    /// A worker the pool has no way to stop.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_stop(pid: Option<u32>, stop: oneshot::Sender<()>) -> Self {
        Self {
            pid,
            _stop: Some(stop),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Launcher は外部ワーカーを起動する
///
/// # 設計原則
/// - fire-and-forget: `launch` は起動だけを行い、完了を待たない
/// - エラーはインフラ障害として扱う（リトライ回数を消費しない）
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchHandle, LaunchError>;
}
