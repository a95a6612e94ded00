//! Recovery - イベントログの再生
//!
//! Events are folded in order through the same `Task` transitions the live
//! scheduler uses. An event that does not fit (unknown task, illegal edge) is
//! counted and skipped rather than aborting the restart.
//!
//! Slot occupancy is decided per worker by its most recent event.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::warn;

use crate::domain::{EventKind, FailureKind, PoolEvent, SlotId, TaskId};
use crate::queue::Task;

/// What `Pool::initialize` rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub events: usize,
    pub skipped_events: usize,
    pub tasks: usize,
    pub pending: usize,
    /// Slots whose last event left a task on them.
    pub busy_slots: Vec<SlotId>,
    /// Slots holding a persisted claim with no task behind it.
    pub orphaned_slots: Vec<SlotId>,
}

pub(super) struct Replay {
    pub(super) tasks: HashMap<TaskId, Task>,
    pub(super) next_sequence: u64,
    pub(super) skipped: usize,
    /// `slot -> (holds a task, task)` from the slot's most recent event.
    last_by_worker: BTreeMap<SlotId, (bool, Option<TaskId>)>,
}

impl Replay {
    pub(super) fn run(events: &[PoolEvent]) -> Self {
        let mut replay = Self {
            tasks: HashMap::new(),
            next_sequence: 0,
            skipped: 0,
            last_by_worker: BTreeMap::new(),
        };
        for (idx, event) in events.iter().enumerate() {
            if let Some(slot) = event.worker_id {
                replay
                    .last_by_worker
                    .insert(slot, (!event.frees_worker(), event.task_id));
            }
            if let Err(reason) = replay.apply(event) {
                warn!(index = idx, kind = ?event.event_kind, %reason, "skipping event during replay");
                replay.skipped += 1;
            }
        }
        replay
    }

    fn apply(&mut self, event: &PoolEvent) -> Result<(), String> {
        let Some(task_id) = event.task_id else {
            return match event.event_kind {
                EventKind::SlotReleased => Ok(()),
                kind => Err(format!("{kind:?} event without a task id")),
            };
        };

        if event.event_kind == EventKind::Submitted {
            let spec = event
                .task
                .clone()
                .ok_or("submitted event without a task body")?;
            let files = spec.file_set().map_err(|e| e.to_string())?;
            let task = Task::new(task_id, spec, files, event.timestamp, self.next_sequence);
            self.next_sequence += 1;
            self.tasks.insert(task_id, task);
            return Ok(());
        }

        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| format!("unknown task {task_id}"))?;
        let at = event.timestamp;
        let result = match event.event_kind {
            EventKind::Assigned => {
                let slot = event.worker_id.ok_or("assigned event without a worker")?;
                task.assign(slot, at)
            }
            EventKind::Running => task.mark_running(),
            EventKind::Completed => task.mark_completed(at),
            EventKind::Failed => task.mark_failed(
                event.failure.unwrap_or(FailureKind::Reported),
                event.error.clone().unwrap_or_default(),
                at,
            ),
            EventKind::Requeued => task.requeue(),
            EventKind::Cancelled => task.mark_cancelled(at),
            EventKind::Submitted | EventKind::SlotReleased => Ok(()),
        };
        result.map_err(|e| e.to_string())
    }

    /// `slot -> task` for every worker whose most recent event left it busy
    /// with a task that is still active on that slot.
    pub(super) fn busy_slots(&self) -> BTreeMap<SlotId, TaskId> {
        self.last_by_worker
            .iter()
            .filter(|(_, (busy, _))| *busy)
            .filter_map(|(slot, (_, task_id))| task_id.map(|id| (*slot, id)))
            .filter(|(slot, id)| {
                self.tasks
                    .get(id)
                    .is_some_and(|task| task.status.is_active() && task.worker_id == Some(*slot))
            })
            .collect()
    }
}
