//! Scheduler - 割り当ての判断
//!
//! # 設計原則
//! - 判断は同期・単一スレッド（Pool が 1 つの Mutex で包む）
//! - claim の確認と取得は同じロック内で行う（check-then-claim が原子的）
//! - ワーカーの起動はロックの外（`assign` は `Dispatch` を返すだけ）
//!
//! Every state change is journaled to the `EventLog`. Only `submit` treats a
//! journal failure as fatal: a task nobody can replay is not accepted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use super::recovery::{RecoveryReport, Replay};
use super::status::PoolStats;
use crate::claims::{ClaimStore, SlotRegistry, SlotStatus};
use crate::config::PoolConfig;
use crate::domain::{FailureKind, LaunchError, PoolError, PoolEvent, SlotId, TaskId, TaskSpec};
use crate::ports::{ClaimMap, Clock, EventLog, IdGenerator, LaunchHandle};
use crate::queue::{Decision, RetryPolicy, Task, TaskQueue, TaskStatus};

/// One launch the pool must perform after releasing the lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub task_id: TaskId,
    pub slot_id: SlotId,
    pub attempt: u32,
    pub description: String,
    pub payload: serde_json::Value,
}

pub struct Scheduler {
    tasks: HashMap<TaskId, Task>,
    queue: TaskQueue,
    pool_size: u32,
    slots: SlotRegistry,
    claims: ClaimStore,
    events: Box<dyn EventLog>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    policy: RetryPolicy,
    task_timeout: Duration,
    next_sequence: u64,
    /// Launch handles of running attempts. Dropping one stops its worker.
    handles: HashMap<SlotId, LaunchHandle>,
}

impl Scheduler {
    pub fn new(
        config: &PoolConfig,
        claims: ClaimStore,
        events: Box<dyn EventLog>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let timeout_ms = i64::try_from(config.task_timeout_ms).unwrap_or(i64::MAX / 2);
        Self {
            tasks: HashMap::new(),
            queue: TaskQueue::new(),
            pool_size: config.pool_size,
            slots: SlotRegistry::new(config.pool_size),
            claims,
            events,
            clock,
            ids,
            policy: config.retry_policy(),
            task_timeout: Duration::milliseconds(timeout_ms),
            next_sequence: 0,
            handles: HashMap::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn record(&self, event: PoolEvent) {
        if let Err(e) = self.events.append(&event) {
            error!(
                kind = ?event.event_kind,
                task = ?event.task_id,
                error = %e,
                "failed to append pool event"
            );
        }
    }

    // ========================================
    // 投入と割り当て
    // ========================================

    /// Accept a task into the queue. Fails only on malformed input or when
    /// the submission cannot be journaled.
    pub fn submit(&mut self, spec: TaskSpec) -> Result<TaskId, PoolError> {
        let files = spec.file_set()?;
        let id = self.ids.generate_task_id();
        let now = self.clock.now();
        let task = Task::new(id, spec, files, now, self.next_sequence);

        self.events
            .append(&PoolEvent::submitted(now, id, task.spec()))?;
        self.next_sequence += 1;
        self.queue.push(&task);
        info!(task = %id, priority = %task.priority, files = task.files.len(), "task submitted");
        self.tasks.insert(id, task);
        Ok(id)
    }

    /// Greedy first-fit pass: match pending tasks, in queue order, to idle
    /// slots. A task whose files overlap a claim (or a task picked earlier in
    /// this pass) is skipped and stays pending.
    pub fn assign(&mut self) -> Vec<Dispatch> {
        let idle = self.slots.idle_ids();
        if idle.is_empty() || self.queue.is_empty() {
            return Vec::new();
        }

        let mut claimed = self.claims.claimed_paths();
        let tasks = &self.tasks;
        let picked = self.queue.pop_eligible(idle.len(), |id| {
            let Some(task) = tasks.get(&id) else {
                return false;
            };
            if let Some(path) = task.files.iter().find(|f| claimed.contains(*f)) {
                debug!(task = %id, path = %path, "skipping task with claimed file");
                return false;
            }
            claimed.extend(task.files.iter().cloned());
            true
        });

        let now = self.clock.now();
        let mut dispatches = Vec::with_capacity(picked.len());
        let mut picked = picked.into_iter();
        for (task_id, slot) in picked.by_ref().zip(idle) {
            match self.start_attempt(task_id, slot, now) {
                Ok(dispatch) => dispatches.push(dispatch),
                Err(e) => {
                    error!(task = %task_id, slot = %slot, error = %e, "assignment failed; task stays pending");
                    self.return_to_queue(task_id);
                    break;
                }
            }
        }
        for task_id in picked {
            self.return_to_queue(task_id);
        }
        debug_assert!(self.claims.is_disjoint(), "a path is claimed by two slots");
        dispatches
    }

    fn start_attempt(
        &mut self,
        task_id: TaskId,
        slot: SlotId,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, PoolError> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(PoolError::TaskNotFound(task_id))?;

        self.claims.claim(slot, &task.files)?;
        if let Err(e) = task.assign(slot, now) {
            if let Err(release) = self.claims.release(slot) {
                error!(slot = %slot, error = %release, "failed to roll back claim");
            }
            return Err(e);
        }
        self.slots.occupy(slot, task_id, &task.files);

        let dispatch = Dispatch {
            task_id,
            slot_id: slot,
            attempt: task.attempt,
            description: task.description.clone(),
            payload: task.payload.clone(),
        };
        let files = task.file_list();
        info!(task = %task_id, slot = %slot, attempt = dispatch.attempt, "task assigned");
        self.record(PoolEvent::assigned(now, slot, task_id, files));
        Ok(dispatch)
    }

    fn return_to_queue(&mut self, task_id: TaskId) {
        if let Some(task) = self.tasks.get(&task_id) {
            self.queue.push(task);
        }
    }

    fn is_current(&self, dispatch: &Dispatch) -> bool {
        self.tasks.get(&dispatch.task_id).is_some_and(|task| {
            task.status == TaskStatus::Assigned
                && task.attempt == dispatch.attempt
                && task.worker_id == Some(dispatch.slot_id)
        })
    }

    /// Record a successful launch. Returns `false` (and drops the handle,
    /// stopping the worker) if the attempt was cancelled or finished while the
    /// launcher was running.
    pub fn mark_launched(&mut self, dispatch: &Dispatch, handle: LaunchHandle) -> bool {
        if !self.is_current(dispatch) {
            debug!(task = %dispatch.task_id, attempt = dispatch.attempt, "launch finished for a superseded attempt");
            return false;
        }
        let now = self.clock.now();
        let Some(task) = self.tasks.get_mut(&dispatch.task_id) else {
            return false;
        };
        if let Err(e) = task.mark_running() {
            warn!(task = %dispatch.task_id, error = %e, "cannot mark task running");
            return false;
        }
        info!(task = %dispatch.task_id, slot = %dispatch.slot_id, pid = ?handle.pid(), "task running");
        self.handles.insert(dispatch.slot_id, handle);
        self.record(PoolEvent::running(now, dispatch.slot_id, dispatch.task_id));
        true
    }

    /// The launcher could not start the worker. The slot and claims are freed
    /// at once; no retry is consumed.
    pub fn launch_failed(&mut self, dispatch: &Dispatch, error: &LaunchError) -> bool {
        if !self.is_current(dispatch) {
            return false;
        }
        warn!(task = %dispatch.task_id, slot = %dispatch.slot_id, error = %error, "launch failed");
        if let Err(e) =
            self.fail_attempt(dispatch.task_id, FailureKind::LaunchFailure, error.to_string())
        {
            error!(task = %dispatch.task_id, error = %e, "cannot record launch failure");
        }
        true
    }

    // ========================================
    // 完了・失敗・キャンセル
    // ========================================

    /// Mark a task completed. With `attempt`, reports from any other attempt
    /// are ignored and `Ok(false)` is returned.
    pub fn complete(&mut self, task_id: TaskId, attempt: Option<u32>) -> Result<bool, PoolError> {
        let now = self.clock.now();
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(PoolError::TaskNotFound(task_id))?;
        if let Some(attempt) = attempt
            && (attempt != task.attempt || !task.status.is_active())
        {
            debug!(task = %task_id, attempt, "ignoring completion from superseded attempt");
            return Ok(false);
        }

        let slot = task.worker_id;
        task.mark_completed(now)?;
        if let Some(slot) = slot {
            self.free_slot(slot);
            self.record(PoolEvent::completed(now, slot, task_id));
        }
        info!(task = %task_id, "task completed");
        Ok(true)
    }

    /// Mark the current attempt failed as reported by its worker. Consumes a
    /// retry.
    pub fn fail_reported(
        &mut self,
        task_id: TaskId,
        attempt: Option<u32>,
        reason: impl Into<String>,
    ) -> Result<bool, PoolError> {
        let task = self
            .tasks
            .get(&task_id)
            .ok_or(PoolError::TaskNotFound(task_id))?;
        if let Some(attempt) = attempt
            && (attempt != task.attempt || !task.status.is_active())
        {
            debug!(task = %task_id, attempt, "ignoring failure from superseded attempt");
            return Ok(false);
        }
        if !task.status.is_active() {
            return Err(PoolError::InvalidTransition {
                task: task_id,
                from: task.status,
                to: TaskStatus::Failed,
            });
        }
        self.fail_attempt(task_id, FailureKind::Reported, reason.into())?;
        Ok(true)
    }

    /// Fail the active attempt, free its slot and apply the retry policy.
    fn fail_attempt(
        &mut self,
        task_id: TaskId,
        kind: FailureKind,
        reason: String,
    ) -> Result<(), PoolError> {
        let now = self.clock.now();
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(PoolError::TaskNotFound(task_id))?;
        let slot = task.worker_id;
        task.mark_failed(kind, reason.clone(), now)?;
        let retries_before = task.retries;

        let decision = self.policy.decide(task, kind);
        if let Decision::Requeue { .. } = decision {
            task.requeue()?;
            self.queue.push(task);
        }
        let retries_after = task.retries;

        if let Some(slot) = slot {
            self.free_slot(slot);
            self.record(PoolEvent::failed(now, slot, task_id, kind, reason.clone(), retries_before));
        }
        match decision {
            Decision::Requeue { reason: why } => {
                warn!(task = %task_id, ?kind, error = %reason, %why, "attempt failed; task requeued");
                self.record(PoolEvent::requeued(now, task_id, retries_after));
            }
            Decision::GiveUp { reason: why } => {
                warn!(task = %task_id, ?kind, error = %reason, %why, "task failed");
            }
        }
        Ok(())
    }

    /// Cancel a task in any non-terminal status. An active task's slot and
    /// claims are freed immediately; the worker is not waited for.
    pub fn cancel(&mut self, task_id: TaskId) -> Result<(), PoolError> {
        let now = self.clock.now();
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(PoolError::TaskNotFound(task_id))?;
        let slot = if task.status.is_active() {
            task.worker_id
        } else {
            None
        };
        task.mark_cancelled(now)?;

        self.queue.remove(task_id);
        if let Some(slot) = slot {
            self.free_slot(slot);
        }
        info!(task = %task_id, slot = ?slot.map(SlotId::get), "task cancelled");
        self.record(PoolEvent::cancelled(now, slot, task_id));
        Ok(())
    }

    fn free_slot(&mut self, slot: SlotId) {
        self.handles.remove(&slot);
        self.slots.release(slot);
        if let Err(e) = self.claims.release(slot) {
            error!(slot = %slot, error = %e, "failed to persist claim release");
        }
    }

    // ========================================
    // ヘルスチェック・運用
    // ========================================

    /// Fail every attempt that has been active longer than the task timeout.
    /// Returns the timed-out task ids.
    pub fn sweep_timeouts(&mut self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut expired: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| {
                task.status.is_active()
                    && task
                        .started_at
                        .is_some_and(|started| now - started > self.task_timeout)
            })
            .map(|task| task.id)
            .collect();
        expired.sort();

        for id in &expired {
            warn!(task = %id, "task timed out");
            if let Err(e) = self.fail_attempt(*id, FailureKind::Timeout, "Timeout".to_string()) {
                error!(task = %id, error = %e, "cannot record timeout");
            }
        }
        expired
    }

    /// Explicitly free a slot and its claim.
    ///
    /// This is how a claim left behind by a previous process is cleared. A
    /// task still on the slot is failed (consuming a retry) and requeued if
    /// retries remain.
    pub fn release_slot(&mut self, slot: SlotId) -> Result<Option<TaskId>, PoolError> {
        let now = self.clock.now();
        let Some(state) = self.slots.get(slot) else {
            if self.claims.claimed_by(slot).is_none() {
                return Err(PoolError::SlotNotFound(slot));
            }
            self.claims.release(slot)?;
            info!(slot = %slot, "released claim of slot outside the pool");
            self.record(PoolEvent::slot_released(now, slot, None));
            return Ok(None);
        };
        let status = state.status;
        let current = state.current_task_id;
        let had_claim = self.claims.claimed_by(slot).is_some();

        match (status, current) {
            (SlotStatus::Busy, Some(task_id)) => {
                self.fail_attempt(task_id, FailureKind::Reported, "slot released".to_string())?;
            }
            (SlotStatus::Idle, _) if !had_claim => return Ok(None),
            _ => {
                self.handles.remove(&slot);
                self.slots.release(slot);
                self.claims.release(slot)?;
            }
        }
        info!(slot = %slot, task = ?current.map(|t| t.to_string()), "slot released");
        self.record(PoolEvent::slot_released(now, slot, current));
        Ok(current)
    }

    /// Stop every launched worker. Task state is left as is.
    pub fn detach_workers(&mut self) {
        self.handles.clear();
    }

    // ========================================
    // 参照
    // ========================================

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Pending task ids in scheduling order.
    pub fn pending(&self) -> Vec<TaskId> {
        self.queue.iter().collect()
    }

    pub fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    pub fn claims(&self) -> &ClaimStore {
        &self.claims
    }

    pub fn stats(&self) -> PoolStats {
        let counts = self.slots.counts();
        let mut stats = PoolStats {
            total_slots: self.slots.len(),
            idle: counts.idle,
            busy: counts.busy,
            failed: counts.failed,
            ..PoolStats::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Assigned | TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed_count += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    // ========================================
    // 復旧
    // ========================================

    /// Rebuild tasks and slots from the event log and claims from the claim
    /// snapshot. Call once, before any other operation.
    pub fn recover(&mut self) -> Result<RecoveryReport, PoolError> {
        let events = self.events.replay()?;
        let replay = Replay::run(&events);
        let persisted = self.claims.load()?.clone();

        let mut report = RecoveryReport {
            events: events.len(),
            skipped_events: replay.skipped,
            ..RecoveryReport::default()
        };
        let busy = replay.busy_slots();
        self.next_sequence = replay.next_sequence;
        self.tasks = replay.tasks;
        self.queue = TaskQueue::new();
        self.slots = SlotRegistry::new(self.pool_size);
        self.handles.clear();

        self.restore_busy_slots(&busy, &persisted, &mut report)?;
        self.hold_orphaned_claims(&busy, persisted, &mut report);
        self.resume_interrupted_failures();

        for task in self.tasks.values() {
            if task.status == TaskStatus::Pending {
                self.queue.push(task);
            }
        }
        report.tasks = self.tasks.len();
        report.pending = self.queue.len();

        info!(
            events = report.events,
            tasks = report.tasks,
            pending = report.pending,
            busy = report.busy_slots.len(),
            orphaned = report.orphaned_slots.len(),
            "pool state recovered"
        );
        Ok(report)
    }

    fn restore_busy_slots(
        &mut self,
        busy: &BTreeMap<SlotId, TaskId>,
        persisted: &ClaimMap,
        report: &mut RecoveryReport,
    ) -> Result<(), PoolError> {
        for (&slot, &task_id) in busy {
            let Some(task) = self.tasks.get(&task_id) else {
                continue;
            };
            if !self.slots.occupy(slot, task_id, &task.files) {
                warn!(slot = %slot, task = %task_id, "journal names a slot outside the pool; failing its attempt");
                self.fail_attempt(task_id, FailureKind::Reported, "slot outside the pool".to_string())?;
                continue;
            }
            if !persisted.contains_key(&slot) {
                self.claims.claim(slot, &task.files)?;
            }
            report.busy_slots.push(slot);
        }
        Ok(())
    }

    fn hold_orphaned_claims(
        &mut self,
        busy: &BTreeMap<SlotId, TaskId>,
        persisted: ClaimMap,
        report: &mut RecoveryReport,
    ) {
        for (slot, files) in persisted {
            if busy.contains_key(&slot) || files.is_empty() {
                continue;
            }
            warn!(
                slot = %slot,
                files = ?files,
                "claim without a running task; slot held until released"
            );
            self.slots.mark_failed(slot, files);
            report.orphaned_slots.push(slot);
        }
    }

    /// A task journaled as failed but not requeued was interrupted between
    /// the two records if the policy would requeue it.
    fn resume_interrupted_failures(&mut self) {
        let now = self.clock.now();
        let policy = self.policy;
        let mut resumed = Vec::new();
        for task in self.tasks.values_mut() {
            let Some(kind) = task.failure else {
                continue;
            };
            if task.status != TaskStatus::Failed {
                continue;
            }
            if let Decision::Requeue { .. } = policy.decide(task, kind)
                && task.requeue().is_ok()
            {
                resumed.push((task.id, task.retries));
            }
        }
        for (task_id, retries) in resumed {
            info!(task = %task_id, "requeueing task interrupted mid-failure");
            self.record(PoolEvent::requeued(now, task_id, retries));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, Priority};
    use crate::impls::{InMemoryClaimSnapshot, InMemoryEventLog};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::TimeZone;

    struct Fixture {
        scheduler: Scheduler,
        clock: FixedClock,
        log: InMemoryEventLog,
        snapshot: InMemoryClaimSnapshot,
    }

    fn fixture(pool_size: u32, max_retries: u32) -> Fixture {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let config = PoolConfig {
            pool_size,
            max_retries,
            task_timeout_ms: 60_000,
            ..PoolConfig::default()
        };
        let log = InMemoryEventLog::new();
        let snapshot = InMemoryClaimSnapshot::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(shared_clock.clone()));
        let scheduler = Scheduler::new(
            &config,
            ClaimStore::new(Box::new(snapshot.clone())),
            Box::new(log.clone()),
            shared_clock,
            ids,
        );
        Fixture {
            scheduler,
            clock,
            log,
            snapshot,
        }
    }

    fn spec(files: &[&str]) -> TaskSpec {
        TaskSpec::new("t", files.iter().copied())
    }

    fn launch_all(s: &mut Scheduler, dispatches: &[Dispatch]) {
        for d in dispatches {
            assert!(s.mark_launched(d, LaunchHandle::detached()));
        }
    }

    #[test]
    fn five_slots_seven_tasks() {
        let mut f = fixture(5, 3);
        let ids: Vec<TaskId> = (0..7)
            .map(|i| f.scheduler.submit(spec(&[format!("f{i}.ts").as_str()])).unwrap())
            .collect();

        let dispatches = f.scheduler.assign();
        assert_eq!(dispatches.len(), 5);
        launch_all(&mut f.scheduler, &dispatches);

        let stats = f.scheduler.stats();
        assert_eq!((stats.running, stats.pending, stats.busy), (5, 2, 5));
        assert_eq!(
            dispatches.iter().map(|d| d.task_id).collect::<Vec<_>>(),
            ids[..5].to_vec()
        );

        assert!(f.scheduler.complete(ids[0], Some(1)).unwrap());
        let next = f.scheduler.assign();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].task_id, ids[5]);
        assert_eq!(next[0].slot_id, dispatches[0].slot_id);
    }

    #[test]
    fn conflicting_higher_priority_task_waits() {
        let mut f = fixture(3, 3);
        let a = f.scheduler.submit(spec(&["x.ts"])).unwrap();
        f.scheduler.assign();
        let b = f
            .scheduler
            .submit(spec(&["x.ts"]).with_priority(Priority::High))
            .unwrap();
        let c = f.scheduler.submit(spec(&["y.ts"])).unwrap();

        let dispatches = f.scheduler.assign();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].task_id, c);
        assert_eq!(f.scheduler.task(b).unwrap().status, TaskStatus::Pending);

        f.scheduler.cancel(a).unwrap();
        let dispatches = f.scheduler.assign();
        assert_eq!(dispatches[0].task_id, b);
    }

    #[test]
    fn overlapping_tasks_in_one_pass_are_serialized() {
        let mut f = fixture(4, 3);
        f.scheduler.submit(spec(&["a.ts", "b.ts"])).unwrap();
        f.scheduler.submit(spec(&["b.ts", "c.ts"])).unwrap();
        f.scheduler.submit(spec(&["d.ts"])).unwrap();

        assert_eq!(f.scheduler.assign().len(), 2);
        assert!(f.scheduler.claims().is_disjoint());
        assert_eq!(f.scheduler.stats().pending, 1);
    }

    #[test]
    fn claims_are_persisted_on_assign_and_release() {
        let mut f = fixture(2, 3);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let d = f.scheduler.assign().remove(0);
        assert_eq!(f.snapshot.current().len(), 1);

        f.scheduler.complete(id, Some(d.attempt)).unwrap();
        assert!(f.snapshot.current().is_empty());
        assert!(f.scheduler.slots().get(d.slot_id).unwrap().is_idle());
    }

    #[test]
    fn launch_failure_frees_slot_without_consuming_retry() {
        let mut f = fixture(1, 3);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let d = f.scheduler.assign().remove(0);

        assert!(f
            .scheduler
            .launch_failed(&d, &LaunchError::Spawn("no such file".into())));
        let task = f.scheduler.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retries, 0);
        assert_eq!(task.failure, Some(FailureKind::LaunchFailure));
        assert!(f.scheduler.claims().claimed_paths().is_empty());
        assert_eq!(f.scheduler.stats().idle, 1);
    }

    #[test]
    fn repeated_launch_failures_become_terminal() {
        let mut f = fixture(1, 3);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        for _ in 0..=5 {
            if let Some(d) = f.scheduler.assign().pop() {
                f.scheduler
                    .launch_failed(&d, &LaunchError::Unavailable("down".into()));
            }
        }
        assert_eq!(f.scheduler.task(id).unwrap().status, TaskStatus::Failed);
        assert_eq!(f.scheduler.stats().failed_count, 1);
    }

    #[test]
    fn stale_launch_is_rejected_after_cancel() {
        let mut f = fixture(1, 3);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let d = f.scheduler.assign().remove(0);
        f.scheduler.cancel(id).unwrap();

        assert!(!f.scheduler.mark_launched(&d, LaunchHandle::detached()));
        assert_eq!(f.scheduler.task(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn timeout_requeues_until_retries_exhausted() {
        let mut f = fixture(1, 2);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();

        for expected_retries in 1..=2 {
            let d = f.scheduler.assign().remove(0);
            f.scheduler.mark_launched(&d, LaunchHandle::detached());
            f.clock.advance(Duration::seconds(61));
            assert_eq!(f.scheduler.sweep_timeouts(f.clock.now()), vec![id]);

            let task = f.scheduler.task(id).unwrap();
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.retries, expected_retries);
            assert_eq!(task.error.as_deref(), Some("Timeout"));
        }

        let d = f.scheduler.assign().remove(0);
        f.scheduler.mark_launched(&d, LaunchHandle::detached());
        f.clock.advance(Duration::seconds(61));
        f.scheduler.sweep_timeouts(f.clock.now());

        let task = f.scheduler.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.is_terminal());
        assert!(f.scheduler.assign().is_empty());
        assert!(f.scheduler.claims().claimed_paths().is_empty());
    }

    #[test]
    fn young_tasks_survive_the_sweep() {
        let mut f = fixture(1, 2);
        f.scheduler.submit(spec(&["a.ts"])).unwrap();
        f.scheduler.assign();
        f.clock.advance(Duration::seconds(60));
        assert!(f.scheduler.sweep_timeouts(f.clock.now()).is_empty());
    }

    #[test]
    fn late_report_from_timed_out_attempt_is_ignored() {
        let mut f = fixture(1, 2);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let first = f.scheduler.assign().remove(0);
        f.clock.advance(Duration::seconds(61));
        f.scheduler.sweep_timeouts(f.clock.now());
        let second = f.scheduler.assign().remove(0);

        assert!(!f.scheduler.complete(id, Some(first.attempt)).unwrap());
        assert_eq!(f.scheduler.task(id).unwrap().status, TaskStatus::Assigned);
        assert!(f.scheduler.complete(id, Some(second.attempt)).unwrap());
    }

    #[test]
    fn reported_failure_consumes_a_retry() {
        let mut f = fixture(1, 1);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let d = f.scheduler.assign().remove(0);
        assert!(f.scheduler.fail_reported(id, Some(d.attempt), "exit 1").unwrap());
        assert_eq!(f.scheduler.task(id).unwrap().retries, 1);

        let d = f.scheduler.assign().remove(0);
        f.scheduler.fail_reported(id, Some(d.attempt), "exit 1").unwrap();
        assert_eq!(f.scheduler.task(id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn cancel_rules() {
        let mut f = fixture(1, 3);
        let running = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let queued = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        f.scheduler.assign();

        f.scheduler.cancel(queued).unwrap();
        assert!(f.scheduler.pending().is_empty());

        f.scheduler.complete(running, None).unwrap();
        assert!(matches!(
            f.scheduler.cancel(running),
            Err(PoolError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.scheduler.cancel(TaskId::from_ulid(ulid::Ulid::new())),
            Err(PoolError::TaskNotFound(_))
        ));
    }

    #[test]
    fn completing_a_pending_task_is_rejected() {
        let mut f = fixture(1, 3);
        let a = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let b = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        f.scheduler.assign();
        assert!(f.scheduler.complete(b, None).is_err());
        assert!(f.scheduler.fail_reported(b, None, "x").is_err());
        assert_eq!(f.scheduler.task(a).unwrap().status, TaskStatus::Assigned);
    }

    #[test]
    fn invalid_submission_is_rejected_without_journal_entry() {
        let mut f = fixture(1, 3);
        assert!(matches!(
            f.scheduler.submit(spec(&[])),
            Err(PoolError::InvalidTask(_))
        ));
        assert!(f.log.events().is_empty());
    }

    #[test]
    fn journal_follows_the_lifecycle() {
        let mut f = fixture(1, 3);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let d = f.scheduler.assign().remove(0);
        f.scheduler.mark_launched(&d, LaunchHandle::detached());
        f.scheduler.complete(id, Some(d.attempt)).unwrap();

        let kinds: Vec<EventKind> = f.log.events().iter().map(|e| e.event_kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Submitted,
                EventKind::Assigned,
                EventKind::Running,
                EventKind::Completed
            ]
        );
    }

    #[test]
    fn release_slot_of_busy_slot_requeues_its_task() {
        let mut f = fixture(1, 3);
        let id = f.scheduler.submit(spec(&["a.ts"])).unwrap();
        let d = f.scheduler.assign().remove(0);

        assert_eq!(f.scheduler.release_slot(d.slot_id).unwrap(), Some(id));
        assert_eq!(f.scheduler.task(id).unwrap().status, TaskStatus::Pending);
        assert!(matches!(
            f.scheduler.release_slot(SlotId::new(9)),
            Err(PoolError::SlotNotFound(_))
        ));
        assert_eq!(f.scheduler.release_slot(d.slot_id).unwrap(), None);
    }
}
