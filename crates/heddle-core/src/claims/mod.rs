//! Claims - ファイル単位の排他制御
//!
//! `ClaimStore` is the in-process owner of `slot -> files`. Every change is
//! written through to a `ClaimSnapshot` before the call returns, so the
//! snapshot on disk never lags the live table.

pub mod slots;

use std::collections::{BTreeSet, HashSet};

use crate::domain::{PersistError, SlotId};
use crate::ports::{ClaimMap, ClaimSnapshot};

pub use self::slots::{SlotCounts, SlotRegistry, SlotStatus, WorkerSlot};

pub struct ClaimStore {
    claims: ClaimMap,
    snapshot: Box<dyn ClaimSnapshot>,
}

impl ClaimStore {
    pub fn new(snapshot: Box<dyn ClaimSnapshot>) -> Self {
        Self {
            claims: ClaimMap::new(),
            snapshot,
        }
    }

    /// Replace the live table with whatever the snapshot holds.
    ///
    /// The loaded table is taken as-is: it is the statement of what was
    /// locked when the previous process stopped.
    pub fn load(&mut self) -> Result<&ClaimMap, PersistError> {
        self.claims = self.snapshot.load()?;
        self.claims.retain(|_, files| !files.is_empty());
        Ok(&self.claims)
    }

    /// Claim `files` for `slot`, replacing any earlier claim of that slot.
    pub fn claim(&mut self, slot: SlotId, files: &BTreeSet<String>) -> Result<(), PersistError> {
        if self.claims.get(&slot) == Some(files) {
            return Ok(());
        }
        let previous = self.claims.insert(slot, files.clone());
        if let Err(e) = self.snapshot.save(&self.claims) {
            match previous {
                Some(prev) => self.claims.insert(slot, prev),
                None => self.claims.remove(&slot),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Drop `slot`'s claim. Releasing an unclaimed slot is a no-op.
    pub fn release(&mut self, slot: SlotId) -> Result<(), PersistError> {
        if self.claims.remove(&slot).is_none() {
            return Ok(());
        }
        self.snapshot.save(&self.claims)
    }

    /// Union of every claimed path.
    pub fn claimed_paths(&self) -> HashSet<String> {
        self.claims.values().flatten().cloned().collect()
    }

    pub fn claimed_by(&self, slot: SlotId) -> Option<&BTreeSet<String>> {
        self.claims.get(&slot)
    }

    pub fn snapshot(&self) -> &ClaimMap {
        &self.claims
    }

    /// No path is claimed by two slots.
    pub fn is_disjoint(&self) -> bool {
        let mut seen = HashSet::new();
        self.claims.values().flatten().all(|path| seen.insert(path))
    }
}
