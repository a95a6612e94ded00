//! Status - プールの状態集計

use serde::{Deserialize, Serialize};

/// Snapshot of slot and task counts, computed under the scheduler lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_slots: usize,
    pub idle: usize,
    pub busy: usize,
    /// Slots taken out of rotation by an unaccounted claim.
    pub failed: usize,
    pub pending: usize,
    /// Tasks assigned or running.
    pub running: usize,
    pub completed: usize,
    /// Tasks terminally failed.
    pub failed_count: usize,
    pub cancelled: usize,
}

impl PoolStats {
    /// Tasks that have not reached a terminal status.
    pub fn in_flight(&self) -> usize {
        self.pending + self.running
    }
}
