//! Queue module: task state machine, task record, retry policy and the
//! priority-ordered pending queue.

mod ordering;
mod record;
mod retry;
mod state;

pub use ordering::TaskQueue;
pub use record::Task;
pub use retry::{Decision, RetryPolicy};
pub use state::TaskStatus;
