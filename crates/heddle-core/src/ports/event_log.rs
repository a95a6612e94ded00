//! EventLog port - 追記専用のイベント記録
//!
//! Written on every state change, read only at startup to rebuild tasks and
//! slots. Live decisions never consult it.

use crate::domain::{PersistError, PoolEvent};

pub trait EventLog: Send + Sync {
    fn append(&self, event: &PoolEvent) -> Result<(), PersistError>;

    /// All events in append order.
    fn replay(&self) -> Result<Vec<PoolEvent>, PersistError>;
}
