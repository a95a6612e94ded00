//! Worker slots: fixed identities `1..=pool_size`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{SlotId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Idle,
    Busy,
    /// Holds a claim nobody accounts for. Not assignable until released.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSlot {
    pub id: SlotId,
    pub status: SlotStatus,
    pub current_task_id: Option<TaskId>,
    /// Empty iff the slot is idle.
    pub claimed_files: BTreeSet<String>,
}

impl WorkerSlot {
    fn idle(id: SlotId) -> Self {
        Self {
            id,
            status: SlotStatus::Idle,
            current_task_id: None,
            claimed_files: BTreeSet::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == SlotStatus::Idle
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounts {
    pub idle: usize,
    pub busy: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct SlotRegistry {
    slots: BTreeMap<SlotId, WorkerSlot>,
}

impl SlotRegistry {
    pub fn new(pool_size: u32) -> Self {
        let slots = (1..=pool_size)
            .map(SlotId::new)
            .map(|id| (id, WorkerSlot::idle(id)))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: SlotId) -> Option<&WorkerSlot> {
        self.slots.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerSlot> {
        self.slots.values()
    }

    /// Idle slot ids, lowest first.
    pub fn idle_ids(&self) -> Vec<SlotId> {
        self.slots
            .values()
            .filter(|slot| slot.is_idle())
            .map(|slot| slot.id)
            .collect()
    }

    /// Mark `id` busy with `task`. Returns `false` if the slot is unknown or
    /// not idle.
    pub fn occupy(&mut self, id: SlotId, task: TaskId, files: &BTreeSet<String>) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) if slot.is_idle() => {
                slot.status = SlotStatus::Busy;
                slot.current_task_id = Some(task);
                slot.claimed_files = files.clone();
                true
            }
            _ => false,
        }
    }

    /// Return `id` to idle, handing back the task it held.
    pub fn release(&mut self, id: SlotId) -> Option<TaskId> {
        let slot = self.slots.get_mut(&id)?;
        let task = slot.current_task_id.take();
        slot.status = SlotStatus::Idle;
        slot.claimed_files.clear();
        task
    }

    /// Take `id` out of rotation while it holds `files`.
    pub fn mark_failed(&mut self, id: SlotId, files: BTreeSet<String>) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.status = SlotStatus::Failed;
                slot.current_task_id = None;
                slot.claimed_files = files;
                true
            }
            None => false,
        }
    }

    pub fn counts(&self) -> SlotCounts {
        self.slots
            .values()
            .fold(SlotCounts::default(), |mut counts, slot| {
                match slot.status {
                    SlotStatus::Idle => counts.idle += 1,
                    SlotStatus::Busy => counts.busy += 1,
                    SlotStatus::Failed => counts.failed += 1,
                }
                counts
            })
    }
}
