//! Priority-ordered pending queue with FIFO tie-break.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::Task;
use crate::domain::TaskId;

/// Sort key for a pending task.
///
/// Field order is the ordering: priority rank, then submission time, then
/// submission sequence for tasks submitted within the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    rank: u8,
    submitted_at: DateTime<Utc>,
    sequence: u64,
}

impl QueueKey {
    fn of(task: &Task) -> Self {
        Self {
            rank: task.priority.rank(),
            submitted_at: task.submitted_at,
            sequence: task.sequence,
        }
    }
}

/// Pending tasks in scheduling order.
///
/// The queue only produces candidates. It knows nothing about files: the
/// scheduler decides which candidates are eligible, and ineligible ones stay
/// queued in place.
#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: BTreeMap<QueueKey, TaskId>,
    index: HashMap<TaskId, QueueKey>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task. Returns `false` if it was already queued.
    pub fn push(&mut self, task: &Task) -> bool {
        if self.index.contains_key(&task.id) {
            return false;
        }
        let key = QueueKey::of(task);
        self.entries.insert(key, task.id);
        self.index.insert(task.id, key);
        true
    }

    /// Remove a task wherever it sits. Returns `false` if it was not queued.
    pub fn remove(&mut self, id: TaskId) -> bool {
        match self.index.remove(&id) {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Task ids in scheduling order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.entries.values().copied()
    }

    /// Take up to `limit` tasks, in order, for which `accept` returns true.
    ///
    /// Rejected candidates are skipped, not a reason to stop: a blocked head
    /// of the queue must not starve the tasks behind it.
    pub fn pop_eligible<F>(&mut self, limit: usize, mut accept: F) -> Vec<TaskId>
    where
        F: FnMut(TaskId) -> bool,
    {
        if limit == 0 {
            return Vec::new();
        }
        let mut taken: Vec<(QueueKey, TaskId)> = Vec::new();
        for (key, id) in &self.entries {
            if accept(*id) {
                taken.push((*key, *id));
                if taken.len() == limit {
                    break;
                }
            }
        }
        taken
            .into_iter()
            .map(|(key, id)| {
                self.entries.remove(&key);
                self.index.remove(&id);
                id
            })
            .collect()
    }
}
