//! PoolConfig - プール設定
//!
//! JSON keys are camelCase and every field is optional:
//!
//! ```json
//! { "poolSize": 8, "taskTimeoutMs": 120000, "stateDir": ".heddle" }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::RetryPolicy;

pub const CLAIMS_FILE: &str = "claims.json";
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    pub pool_size: u32,
    /// Retries granted for timeouts and reported failures.
    pub max_retries: u32,
    pub task_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    /// Poll interval of `wait_for_task`.
    pub wait_poll_interval_ms: u64,
    /// Consecutive launch failures before a task is failed for good.
    pub max_launch_failures: u32,
    /// Directory for `claims.json` and `events.jsonl`. In-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 50,
            max_retries: 3,
            task_timeout_ms: 600_000,
            health_check_interval_ms: 30_000,
            wait_poll_interval_ms: 1_000,
            max_launch_failures: 5,
            state_dir: None,
        }
    }
}

impl PoolConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("poolSize must be at least 1".into()));
        }
        for (name, value) in [
            ("taskTimeoutMs", self.task_timeout_ms),
            ("healthCheckIntervalMs", self.health_check_interval_ms),
            ("waitPollIntervalMs", self.wait_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.max_launch_failures)
    }

    pub fn claims_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| dir.join(CLAIMS_FILE))
    }

    pub fn events_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| dir.join(EVENTS_FILE))
    }
}
