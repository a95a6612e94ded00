//! In-memory stores for tests and ephemeral pools.
//!
//! Both types are cheap to clone and clones share state, so a test can keep
//! one handle and give the other to the pool.

use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::{PersistError, PoolEvent};
use crate::ports::{ClaimMap, ClaimSnapshot, EventLog};

#[derive(Debug, Clone, Default)]
pub struct InMemoryClaimSnapshot {
    claims: Arc<Mutex<ClaimMap>>,
}

impl InMemoryClaimSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ClaimMap {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ClaimSnapshot for InMemoryClaimSnapshot {
    fn load(&self) -> Result<ClaimMap, PersistError> {
        Ok(self.current())
    }

    fn save(&self, claims: &ClaimMap) -> Result<(), PersistError> {
        *self.claims.lock().unwrap_or_else(PoisonError::into_inner) = claims.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    events: Arc<Mutex<Vec<PoolEvent>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PoolEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, event: &PoolEvent) -> Result<(), PersistError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    fn replay(&self) -> Result<Vec<PoolEvent>, PersistError> {
        Ok(self.events())
    }
}
