//! Domain model (IDs, task specs, outcomes, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod task;

pub use self::errors::{LaunchError, PersistError, PoolError};
pub use self::events::{EventKind, PoolEvent};
pub use self::ids::{ParseIdError, SlotId, TaskId};
pub use self::outcome::{FailureKind, WorkerOutcome};
pub use self::task::{Priority, TaskSpec};
