//! Pool - 外部 API
//!
//! # 設計原則
//! - Scheduler は 1 つの `tokio::sync::Mutex` の中（判断は直列）
//! - Launcher 呼び出しはロックの外（await を跨いでロックを持たない）
//! - バックグラウンドループは `watch` チャネルで停止（WorkerGroup と同じ形）
//!
//! Lifecycle: `PoolBuilder::build` -> `initialize` (recover, start loops,
//! first assignment pass) -> API calls -> `shutdown`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::health_monitor::HealthMonitor;
use super::recovery::RecoveryReport;
use super::report_loop::ReportLoop;
use super::scheduler::{Dispatch, Scheduler};
use super::status::PoolStats;
use crate::claims::WorkerSlot;
use crate::config::PoolConfig;
use crate::domain::{PoolError, Priority, SlotId, TaskId, TaskSpec, WorkerOutcome};
use crate::ports::{ClaimMap, LaunchRequest, Launcher, WorkerReport, WorkerReporter};
use crate::queue::{Task, TaskStatus};
use crate::subdivide::subdivide;

/// State shared with the background loops.
pub(crate) struct PoolShared {
    scheduler: Mutex<Scheduler>,
    launcher: Arc<dyn Launcher>,
    reports_tx: mpsc::UnboundedSender<WorkerReport>,
}

impl PoolShared {
    /// Assignment passes plus the launches they produced, repeated while a
    /// launch failure leaves a slot free. Returns how many workers started.
    ///
    /// `maxLaunchFailures` bounds the repetition: each failed launch moves a
    /// task closer to a terminal failure.
    pub(crate) async fn assign_and_launch(&self) -> usize {
        let mut launched = 0;
        loop {
            let dispatches = self.scheduler.lock().await.assign();
            if dispatches.is_empty() {
                break;
            }
            let (started, failed) = self.launch(dispatches).await;
            launched += started;
            if failed == 0 {
                break;
            }
            debug!(failed, "launch failures freed slots; reassigning");
        }
        launched
    }

    /// Returns `(started, failed)`.
    async fn launch(&self, dispatches: Vec<Dispatch>) -> (usize, usize) {
        let mut launched = 0;
        let mut failed = 0;
        for dispatch in dispatches {
            let request = LaunchRequest {
                slot_id: dispatch.slot_id,
                task_id: dispatch.task_id,
                attempt: dispatch.attempt,
                description: dispatch.description.clone(),
                payload: dispatch.payload.clone(),
                reporter: WorkerReporter::new(
                    self.reports_tx.clone(),
                    dispatch.task_id,
                    dispatch.slot_id,
                    dispatch.attempt,
                ),
            };
            let result = self.launcher.launch(request).await;

            let mut scheduler = self.scheduler.lock().await;
            match result {
                Ok(handle) => {
                    if scheduler.mark_launched(&dispatch, handle) {
                        launched += 1;
                    }
                }
                Err(e) => {
                    if scheduler.launch_failed(&dispatch, &e) {
                        failed += 1;
                    }
                }
            }
        }
        (launched, failed)
    }

    pub(crate) async fn handle_report(&self, report: WorkerReport) {
        let task_id = report.task_id;
        let result = {
            let mut scheduler = self.scheduler.lock().await;
            match report.outcome {
                WorkerOutcome::Succeeded => scheduler.complete(task_id, Some(report.attempt)),
                WorkerOutcome::Failed(reason) => {
                    scheduler.fail_reported(task_id, Some(report.attempt), reason)
                }
            }
        };
        match result {
            Ok(true) => {
                self.assign_and_launch().await;
            }
            Ok(false) => {}
            Err(e) => warn!(task = %task_id, error = %e, "worker report rejected"),
        }
    }

    /// Timeout sweep followed by a backfill pass.
    pub(crate) async fn health_check(&self) -> Vec<TaskId> {
        let expired = {
            let mut scheduler = self.scheduler.lock().await;
            let now = scheduler.now();
            scheduler.sweep_timeouts(now)
        };
        self.assign_and_launch().await;
        expired
    }
}

/// Background loops of a running pool.
/// - `shutdown_tx` を drop するとループ全体が止まる
/// - `shutdown_and_join()` で全ループの終了を待てる
struct LoopGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl LoopGroup {
    fn spawn(shared: &Arc<PoolShared>, config: &PoolConfig, reports_rx: mpsc::UnboundedReceiver<WorkerReport>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reports = ReportLoop::new(Arc::clone(shared), reports_rx);
        let monitor = HealthMonitor::new(Arc::clone(shared), config.health_check_interval());
        let joins = vec![
            tokio::spawn(reports.run(shutdown_rx.clone())),
            tokio::spawn(monitor.run(shutdown_rx)),
        ];
        Self { shutdown_tx, joins }
    }

    async fn shutdown_and_join(self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
        for join in self.joins {
            let _ = join.await;
        }
    }
}

enum Lifecycle {
    Created {
        reports_rx: mpsc::UnboundedReceiver<WorkerReport>,
    },
    Running(LoopGroup),
    Stopped,
}

/// Bounded worker pool with file-claim arbitration.
///
/// # 使用例
/// ```ignore
/// let pool = PoolBuilder::new()
///     .config(config)
///     .launcher(ProcessLauncher::new("./worker.sh"))
///     .build()?;
/// pool.initialize().await?;
/// let id = pool.submit_task(TaskSpec::new("fix lint", ["src/a.rs"])).await?;
/// let task = pool.wait_for_task(id, Duration::from_secs(60)).await?;
/// pool.shutdown().await;
/// ```
pub struct Pool {
    shared: Arc<PoolShared>,
    config: PoolConfig,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl Pool {
    pub(crate) fn new(config: PoolConfig, scheduler: Scheduler, launcher: Arc<dyn Launcher>) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(PoolShared {
                scheduler: Mutex::new(scheduler),
                launcher,
                reports_tx,
            }),
            config,
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::Created { reports_rx }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<(), PoolError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PoolError::NotInitialized)
        }
    }

    // ========================================
    // ライフサイクル
    // ========================================

    /// Recover persisted state, start the report loop and health monitor,
    /// then run a first assignment pass.
    pub async fn initialize(&self) -> Result<RecoveryReport, PoolError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let reports_rx = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Created { reports_rx } => reports_rx,
            other => {
                *lifecycle = other;
                return Err(PoolError::AlreadyInitialized);
            }
        };

        let recovered = self.shared.scheduler.lock().await.recover();
        let report = match recovered {
            Ok(report) => report,
            Err(e) => {
                *lifecycle = Lifecycle::Created { reports_rx };
                return Err(e);
            }
        };

        *lifecycle = Lifecycle::Running(LoopGroup::spawn(&self.shared, &self.config, reports_rx));
        self.running.store(true, Ordering::SeqCst);
        drop(lifecycle);

        let launched = self.shared.assign_and_launch().await;
        info!(
            pool_size = self.config.pool_size,
            launched,
            pending = report.pending,
            "pool initialized"
        );
        Ok(report)
    }

    /// Stop the background loops and every launched worker. Task state stays
    /// in the journal for the next `initialize`.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.lifecycle.lock().await, Lifecycle::Stopped);
        if let Lifecycle::Running(loops) = previous {
            loops.shutdown_and_join().await;
        }
        self.shared.scheduler.lock().await.detach_workers();
        info!("pool shut down");
    }

    // ========================================
    // 投入 API
    // ========================================

    /// Queue a task and run a best-effort assignment pass. Never waits for a
    /// free slot.
    pub async fn submit_task(&self, spec: TaskSpec) -> Result<TaskId, PoolError> {
        self.ensure_running()?;
        let id = self.shared.scheduler.lock().await.submit(spec)?;
        self.shared.assign_and_launch().await;
        Ok(id)
    }

    /// Split a coarse task by directory and submit every piece.
    pub async fn submit_subdivided(
        &self,
        description: &str,
        files: &[String],
        priority: Priority,
        payload: serde_json::Value,
    ) -> Result<Vec<TaskId>, PoolError> {
        self.ensure_running()?;
        let subtasks =
            subdivide(description, files).map_err(|e| PoolError::InvalidTask(e.to_string()))?;

        let ids = {
            let mut scheduler = self.shared.scheduler.lock().await;
            let mut ids = Vec::with_capacity(subtasks.len());
            for subtask in subtasks {
                let spec = subtask.into_spec(payload.clone()).with_priority(priority);
                ids.push(scheduler.submit(spec)?);
            }
            ids
        };
        self.shared.assign_and_launch().await;
        Ok(ids)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, PoolError> {
        self.ensure_running()?;
        self.shared
            .scheduler
            .lock()
            .await
            .task(id)
            .cloned()
            .ok_or(PoolError::TaskNotFound(id))
    }

    /// Cancel a task. An active task's slot and claims are freed at once and
    /// the freed slot is offered to the queue.
    pub async fn cancel_task(&self, id: TaskId) -> Result<(), PoolError> {
        self.ensure_running()?;
        self.shared.scheduler.lock().await.cancel(id)?;
        self.shared.assign_and_launch().await;
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<PoolStats, PoolError> {
        self.ensure_running()?;
        Ok(self.shared.scheduler.lock().await.stats())
    }

    /// Poll until the task is terminal. `completed` is returned as `Ok`;
    /// `failed` and `cancelled` as `TaskFailed`. When `timeout` runs out the
    /// task is cancelled and `WaitTimeout` returned.
    pub async fn wait_for_task(&self, id: TaskId, timeout: Duration) -> Result<Task, PoolError> {
        let deadline = Instant::now() + timeout;
        let poll = self.config.wait_poll_interval();
        loop {
            let task = self.get_task(id).await?;
            match task.status {
                TaskStatus::Completed => return Ok(task),
                TaskStatus::Failed | TaskStatus::Cancelled => {
                    return Err(PoolError::TaskFailed {
                        task: id,
                        status: task.status,
                        error: task.error,
                    });
                }
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                match self.cancel_task(id).await {
                    Ok(()) => {
                        warn!(task = %id, "wait timed out; task cancelled");
                        return Err(PoolError::WaitTimeout(id));
                    }
                    // finished between the poll and the cancel
                    Err(PoolError::InvalidTransition { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    // ========================================
    // ワーカーからの通知・運用
    // ========================================

    /// External completion signal for the task's current attempt.
    pub async fn report_completion(&self, id: TaskId) -> Result<(), PoolError> {
        self.ensure_running()?;
        self.shared.scheduler.lock().await.complete(id, None)?;
        self.shared.assign_and_launch().await;
        Ok(())
    }

    /// External failure signal for the task's current attempt. Consumes a
    /// retry.
    pub async fn report_failure(&self, id: TaskId, reason: impl Into<String>) -> Result<(), PoolError> {
        self.ensure_running()?;
        self.shared
            .scheduler
            .lock()
            .await
            .fail_reported(id, None, reason)?;
        self.shared.assign_and_launch().await;
        Ok(())
    }

    /// Run an assignment pass now. Returns how many workers were started.
    pub async fn heartbeat(&self) -> Result<usize, PoolError> {
        self.ensure_running()?;
        let launched = self.shared.assign_and_launch().await;
        debug!(launched, "heartbeat");
        Ok(launched)
    }

    /// Run the health monitor's sweep now. Returns the timed-out task ids.
    pub async fn run_health_check(&self) -> Result<Vec<TaskId>, PoolError> {
        self.ensure_running()?;
        Ok(self.shared.health_check().await)
    }

    /// Release a slot's claim, including one restored from a previous run.
    pub async fn release_slot(&self, slot: SlotId) -> Result<Option<TaskId>, PoolError> {
        self.ensure_running()?;
        let task = self.shared.scheduler.lock().await.release_slot(slot)?;
        self.shared.assign_and_launch().await;
        Ok(task)
    }

    pub async fn slots(&self) -> Result<Vec<WorkerSlot>, PoolError> {
        self.ensure_running()?;
        Ok(self.shared.scheduler.lock().await.slots().iter().cloned().collect())
    }

    /// Current `slot -> files` table.
    pub async fn claims(&self) -> Result<ClaimMap, PoolError> {
        self.ensure_running()?;
        Ok(self.shared.scheduler.lock().await.claims().snapshot().clone())
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, PoolError> {
        self.ensure_running()?;
        Ok(self.shared.scheduler.lock().await.tasks().cloned().collect())
    }
}
