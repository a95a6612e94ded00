//! ProcessLauncher - 外部プロセスとしてワーカーを起動
//!
//! Each launch spawns `program args...` with the task exported through the
//! environment:
//!
//! | variable         | value                          |
//! |------------------|--------------------------------|
//! | `HEDDLE_PAYLOAD` | task payload as JSON           |
//! | `HEDDLE_SLOT_ID` | slot number                    |
//! | `HEDDLE_TASK_ID` | task id (`task-<ULID>`)        |
//! | `HEDDLE_ATTEMPT` | attempt number, starting at 1  |
//!
//! Exit status 0 is reported as success, anything else as failure. Dropping
//! the returned handle kills the child.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::domain::LaunchError;
use crate::ports::{LaunchHandle, LaunchRequest, Launcher};

pub const ENV_PAYLOAD: &str = "HEDDLE_PAYLOAD";
pub const ENV_SLOT_ID: &str = "HEDDLE_SLOT_ID";
pub const ENV_TASK_ID: &str = "HEDDLE_TASK_ID";
pub const ENV_ATTEMPT: &str = "HEDDLE_ATTEMPT";

#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, request: &LaunchRequest) -> Result<Command, LaunchError> {
        let payload = serde_json::to_string(&request.payload)
            .map_err(|e| LaunchError::Spawn(format!("payload is not serializable: {e}")))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(ENV_PAYLOAD, payload)
            .env(ENV_SLOT_ID, request.slot_id.get().to_string())
            .env(ENV_TASK_ID, request.task_id.to_string())
            .env(ENV_ATTEMPT, request.attempt.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchHandle, LaunchError> {
        let mut child = self
            .command(&request)?
            .spawn()
            .map_err(|e| LaunchError::Spawn(format!("{}: {e}", self.program.display())))?;
        let pid = child.id();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let reporter = request.reporter;

        debug!(task = %reporter.task_id(), slot = %reporter.slot_id(), ?pid, "worker process spawned");

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) if status.success() => {
                            reporter.succeeded();
                        }
                        Ok(status) => {
                            reporter.failed(format!("worker exited with {status}"));
                        }
                        Err(e) => {
                            reporter.failed(format!("failed to wait for worker: {e}"));
                        }
                    }
                }
                _ = &mut stop_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(task = %reporter.task_id(), error = %e, "failed to kill worker process");
                    }
                }
            }
        });

        Ok(LaunchHandle::with_stop(pid, stop_tx))
    }
}
