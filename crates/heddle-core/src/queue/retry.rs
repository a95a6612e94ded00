//! Retry policy: decides whether a failed attempt goes back to the queue.

use super::Task;
use crate::domain::FailureKind;

/// What to do with a task that just failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Return to pending, keeping its place in its tier.
    Requeue { reason: String },

    /// Leave it failed; terminal.
    GiveUp { reason: String },
}

/// Retry policy for failed tasks.
///
/// Timeouts and reported failures count against `max_retries`. Launch
/// failures never do; they are bounded separately by `max_launch_failures`
/// consecutive failures so a broken launcher cannot spin forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_launch_failures: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, max_launch_failures: u32) -> Self {
        Self {
            max_retries,
            max_launch_failures,
        }
    }

    /// Decide the next step for a task already marked failed with `kind`.
    ///
    /// Pure: no side effects. The scheduler applies the decision.
    pub fn decide(&self, task: &Task, kind: FailureKind) -> Decision {
        if kind.consumes_retry() {
            if task.retries < self.max_retries {
                Decision::Requeue {
                    reason: format!("retry {}/{}", task.retries + 1, self.max_retries),
                }
            } else {
                Decision::GiveUp {
                    reason: format!("retries exhausted: {}/{}", task.retries, self.max_retries),
                }
            }
        } else if task.launch_failures < self.max_launch_failures {
            Decision::Requeue {
                reason: format!(
                    "launch failure {}/{}",
                    task.launch_failures, self.max_launch_failures
                ),
            }
        } else {
            Decision::GiveUp {
                reason: format!(
                    "launch failed {} times in a row",
                    task.launch_failures
                ),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 5)
    }
}
