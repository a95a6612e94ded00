//! ClaimSnapshot port - claim 表の永続化
//!
//! The in-process `ClaimStore` is the only writer. The snapshot is a restart
//! record, never a live channel between processes.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{PersistError, SlotId};

/// `workerId -> files` as persisted.
pub type ClaimMap = BTreeMap<SlotId, BTreeSet<String>>;

pub trait ClaimSnapshot: Send + Sync {
    /// Load the last saved claims. A missing snapshot is an empty map.
    fn load(&self) -> Result<ClaimMap, PersistError>;

    /// Replace the snapshot with `claims`. Must be durable on return.
    fn save(&self, claims: &ClaimMap) -> Result<(), PersistError>;
}
