//! Submission input for tasks: priority and spec.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::PoolError;

/// Queue ordering tier. Lower rank is scheduled first; there is no preemption.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// What a caller hands to `submit_task`.
///
/// `files` is the conflict footprint: two tasks sharing any path never run at
/// the same time. `payload` is opaque to the pool and handed to the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,

    #[serde(default)]
    pub priority: Priority,

    pub files: Vec<String>,

    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            description: description.into(),
            priority: Priority::Normal,
            files: files.into_iter().map(Into::into).collect(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Normalize the file list into a set, rejecting malformed input.
    pub fn file_set(&self) -> Result<BTreeSet<String>, PoolError> {
        if self.files.is_empty() {
            return Err(PoolError::InvalidTask("task must touch at least one file".into()));
        }
        let mut set = BTreeSet::new();
        for file in &self.files {
            let trimmed = file.trim();
            if trimmed.is_empty() {
                return Err(PoolError::InvalidTask("file paths must not be blank".into()));
            }
            set.insert(trimmed.to_string());
        }
        Ok(set)
    }
}
