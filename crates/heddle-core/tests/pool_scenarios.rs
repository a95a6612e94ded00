//! End-to-end pool behaviour through the public API, with an in-process
//! launcher standing in for external workers.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use heddle_core::domain::{PoolError, Priority, TaskId, TaskSpec};
use heddle_core::impls::ChannelLauncher;
use heddle_core::ports::{FixedClock, LaunchRequest};
use heddle_core::{Pool, PoolBuilder, PoolConfig, TaskStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::UnboundedReceiver;

fn config(pool_size: u32) -> PoolConfig {
    PoolConfig {
        pool_size,
        wait_poll_interval_ms: 10,
        ..PoolConfig::default()
    }
}

async fn started(config: PoolConfig) -> (Pool, UnboundedReceiver<LaunchRequest>) {
    let (launcher, requests) = ChannelLauncher::new();
    let pool = PoolBuilder::new()
        .config(config)
        .launcher(launcher)
        .build()
        .unwrap();
    pool.initialize().await.unwrap();
    (pool, requests)
}

fn drain(requests: &mut UnboundedReceiver<LaunchRequest>) -> Vec<LaunchRequest> {
    let mut out = Vec::new();
    while let Ok(request) = requests.try_recv() {
        out.push(request);
    }
    out
}

fn task(file: &str) -> TaskSpec {
    TaskSpec::new(format!("edit {file}"), [file])
}

#[tokio::test]
async fn five_slots_seven_tasks_then_one_completion() {
    let (pool, mut requests) = started(config(5)).await;

    let mut ids = Vec::new();
    for i in 0..7 {
        ids.push(pool.submit_task(task(&format!("src/f{i}.ts"))).await.unwrap());
    }

    let launched = drain(&mut requests);
    assert_eq!(launched.len(), 5);
    let stats = pool.get_stats().await.unwrap();
    assert_eq!(stats.running, 5);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.busy, 5);
    assert_eq!(stats.idle, 0);

    launched[0].reporter.succeeded();
    let next = tokio::time::timeout(Duration::from_secs(5), requests.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.task_id, ids[5]);
    assert_eq!(next.slot_id, launched[0].slot_id);

    let stats = pool.get_stats().await.unwrap();
    assert_eq!((stats.completed, stats.running, stats.pending), (1, 5, 1));
    pool.shutdown().await;
}

#[tokio::test]
async fn higher_priority_conflict_waits_for_holder() {
    let (pool, mut requests) = started(config(4)).await;

    let a = pool.submit_task(task("x.ts")).await.unwrap();
    let b = pool
        .submit_task(task("x.ts").with_priority(Priority::High))
        .await
        .unwrap();

    assert_eq!(pool.get_task(a).await.unwrap().status, TaskStatus::Running);
    assert_eq!(pool.get_task(b).await.unwrap().status, TaskStatus::Pending);
    assert_eq!(drain(&mut requests).len(), 1);

    pool.report_completion(a).await.unwrap();
    assert_eq!(pool.get_task(b).await.unwrap().status, TaskStatus::Running);
    pool.shutdown().await;
}

#[tokio::test]
async fn conflict_free_lower_priority_task_goes_first() {
    let (pool, _requests) = started(config(2)).await;

    let holder = pool.submit_task(task("x.ts")).await.unwrap();
    let blocked = pool
        .submit_task(task("x.ts").with_priority(Priority::Critical))
        .await
        .unwrap();
    let free = pool
        .submit_task(task("y.ts").with_priority(Priority::Low))
        .await
        .unwrap();

    assert_eq!(pool.get_task(holder).await.unwrap().status, TaskStatus::Running);
    assert_eq!(pool.get_task(blocked).await.unwrap().status, TaskStatus::Pending);
    assert_eq!(pool.get_task(free).await.unwrap().status, TaskStatus::Running);
    pool.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_running_task_frees_slot_and_claims_at_once() {
    let (pool, _requests) = started(config(1)).await;

    let running = pool.submit_task(task("a.ts")).await.unwrap();
    let waiting = pool.submit_task(task("b.ts")).await.unwrap();
    assert_eq!(pool.get_task(waiting).await.unwrap().status, TaskStatus::Pending);

    pool.cancel_task(running).await.unwrap();

    let cancelled = pool.get_task(running).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(pool.get_task(waiting).await.unwrap().status, TaskStatus::Running);

    let claims = pool.claims().await.unwrap();
    let claimed: Vec<&String> = claims.values().flatten().collect();
    assert_eq!(claimed, vec!["b.ts"]);

    assert!(matches!(
        pool.cancel_task(running).await,
        Err(PoolError::InvalidTransition { .. })
    ));
    pool.shutdown().await;
}

#[tokio::test]
async fn timeouts_requeue_until_retries_are_exhausted() {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
    let (launcher, _requests) = ChannelLauncher::new();
    let pool = PoolBuilder::new()
        .config(PoolConfig {
            pool_size: 1,
            max_retries: 2,
            task_timeout_ms: 1_000,
            ..PoolConfig::default()
        })
        .launcher(launcher)
        .clock(clock.clone())
        .build()
        .unwrap();
    pool.initialize().await.unwrap();

    let id = pool.submit_task(task("a.ts")).await.unwrap();
    let submitted_at = pool.get_task(id).await.unwrap().submitted_at;

    for retries in 1..=2 {
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(pool.run_health_check().await.unwrap(), vec![id]);

        let t = pool.get_task(id).await.unwrap();
        assert_eq!(t.retries, retries);
        assert_eq!(t.status, TaskStatus::Running, "requeued and reassigned");
        assert_eq!(t.submitted_at, submitted_at);
        assert_eq!(t.priority, Priority::Normal);
    }

    clock.advance(chrono::Duration::seconds(2));
    pool.run_health_check().await.unwrap();

    let t = pool.get_task(id).await.unwrap();
    assert_eq!(t.status, TaskStatus::Failed);
    assert_eq!(t.retries, 2);
    assert_eq!(t.error.as_deref(), Some("Timeout"));

    let stats = pool.get_stats().await.unwrap();
    assert_eq!((stats.failed_count, stats.idle), (1, 1));

    let err = pool.wait_for_task(id, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::TaskFailed {
            status: TaskStatus::Failed,
            ..
        }
    ));
    pool.shutdown().await;
}

#[tokio::test]
async fn priority_then_submission_order() {
    let (pool, mut requests) = started(config(1)).await;

    let busy = pool.submit_task(task("busy.ts")).await.unwrap();
    let low = pool
        .submit_task(task("l.ts").with_priority(Priority::Low))
        .await
        .unwrap();
    let normal_1 = pool.submit_task(task("n1.ts")).await.unwrap();
    let critical = pool
        .submit_task(task("c.ts").with_priority(Priority::Critical))
        .await
        .unwrap();
    let normal_2 = pool.submit_task(task("n2.ts")).await.unwrap();
    let high = pool
        .submit_task(task("h.ts").with_priority(Priority::High))
        .await
        .unwrap();
    drain(&mut requests);

    let mut order = Vec::new();
    let mut current = busy;
    for _ in 0..5 {
        pool.report_completion(current).await.unwrap();
        current = drain(&mut requests).remove(0).task_id;
        order.push(current);
    }
    assert_eq!(order, vec![critical, high, normal_1, normal_2, low]);
    pool.shutdown().await;
}

#[tokio::test]
async fn reported_failure_is_retried_then_terminal() {
    let (pool, mut requests) = started(PoolConfig {
        max_retries: 1,
        ..config(1)
    })
    .await;

    let id = pool.submit_task(task("a.ts")).await.unwrap();
    let first = drain(&mut requests).remove(0);
    first.reporter.failed("exit status 1");

    let second = tokio::time::timeout(Duration::from_secs(5), requests.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.attempt, 2);
    assert_eq!(pool.get_task(id).await.unwrap().retries, 1);

    second.reporter.failed("exit status 1");
    let err = pool.wait_for_task(id, Duration::from_secs(5)).await.unwrap_err();
    match err {
        PoolError::TaskFailed { status, error, .. } => {
            assert_eq!(status, TaskStatus::Failed);
            assert_eq!(error.as_deref(), Some("exit status 1"));
        }
        other => panic!("unexpected error: {other}"),
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn invalid_submissions_are_rejected() {
    let (pool, _requests) = started(config(1)).await;

    let err = pool
        .submit_task(TaskSpec::new("nothing", Vec::<String>::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidTask(_)));

    let stats = pool.get_stats().await.unwrap();
    assert_eq!(stats.pending + stats.running, 0);
    pool.shutdown().await;
}

const FILE_UNIVERSE: [&str; 8] = [
    "a.ts", "b.ts", "c.ts", "d.ts", "lib/e.rs", "lib/f.rs", "docs/g.md", "h.json",
];

/// One to three files from a small universe, so conflicts are frequent.
fn random_spec(rng: &mut StdRng, description: String) -> TaskSpec {
    let count = rng.gen_range(1..=3);
    let files: Vec<&str> = (0..count)
        .map(|_| FILE_UNIVERSE[rng.gen_range(0..FILE_UNIVERSE.len())])
        .collect();
    let priority = match rng.gen_range(0..4) {
        0 => Priority::Critical,
        1 => Priority::High,
        2 => Priority::Normal,
        _ => Priority::Low,
    };
    TaskSpec::new(description, files).with_priority(priority)
}

/// Random workloads over a small file universe never put one file in two
/// busy slots.
#[tokio::test]
async fn random_workloads_keep_claims_disjoint() {
    for seed in [7_u64, 42, 1234] {
        let mut rng = StdRng::seed_from_u64(seed);
        let (pool, mut requests) = started(PoolConfig {
            max_retries: 1,
            ..config(4)
        })
        .await;

        let mut ids: Vec<TaskId> = Vec::new();
        for n in 0..30 {
            let spec = random_spec(&mut rng, format!("job {n}"));
            ids.push(pool.submit_task(spec).await.unwrap());
        }

        let mut live: Vec<LaunchRequest> = Vec::new();
        for _ in 0..500 {
            live.extend(drain(&mut requests));
            assert_claims_disjoint(&pool).await;
            if live.is_empty() {
                break;
            }

            let request = live.swap_remove(rng.gen_range(0..live.len()));
            let result = match rng.gen_range(0..4) {
                0 => pool.report_failure(request.task_id, "boom").await,
                1 => pool.cancel_task(request.task_id).await,
                _ => pool.report_completion(request.task_id).await,
            };
            if let Err(e) = result {
                assert!(
                    matches!(e, PoolError::InvalidTransition { .. }),
                    "unexpected error: {e}"
                );
            }
        }

        for id in ids {
            let t = pool.get_task(id).await.unwrap();
            assert!(t.status.is_terminal(), "seed {seed}: {id} left {}", t.status);
        }
        assert!(pool.claims().await.unwrap().is_empty());
        pool.shutdown().await;
    }
}

/// Disjointness within a single snapshot of the claim table and one of the
/// slot table.
async fn assert_snapshot_disjoint(pool: &Pool) {
    let claims = pool.claims().await.unwrap();
    let mut seen = HashSet::new();
    for (slot, files) in &claims {
        for file in files {
            assert!(seen.insert(file.clone()), "{file} claimed twice (again by {slot})");
        }
    }

    let slots = pool.slots().await.unwrap();
    let mut held = HashSet::new();
    for slot in &slots {
        for file in &slot.claimed_files {
            assert!(held.insert(file.clone()), "{file} held by two slots");
        }
    }
}

async fn assert_claims_disjoint(pool: &Pool) {
    assert_snapshot_disjoint(pool).await;
    let claims = pool.claims().await.unwrap();
    for slot in pool.slots().await.unwrap() {
        match slot.current_task_id {
            Some(id) => {
                let t = pool.get_task(id).await.unwrap();
                assert!(t.status.is_active());
                assert_eq!(slot.claimed_files, t.files);
                assert_eq!(claims.get(&slot.id), Some(&t.files));
            }
            None => assert!(slot.claimed_files.is_empty()),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_and_reporters_keep_claims_disjoint() {
    let (pool, mut requests) = started(PoolConfig {
        max_retries: 1,
        ..config(4)
    })
    .await;
    let pool = Arc::new(pool);
    let stop = Arc::new(AtomicBool::new(false));

    let checker = {
        let pool = Arc::clone(&pool);
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            let mut checks = 0_usize;
            while !stop.load(Ordering::SeqCst) {
                assert_snapshot_disjoint(&pool).await;
                checks += 1;
                tokio::task::yield_now().await;
            }
            checks
        })
    };

    // 起動要求ごとに独立したワーカーを立て、ばらばらのタイミングで報告する
    let driver = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let mut launches = 0_u64;
            while let Some(request) = requests.recv().await {
                launches += 1;
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    let mut rng = StdRng::seed_from_u64(launches);
                    let delay = rng.gen_range(0..4);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    match rng.gen_range(0..5) {
                        0 => {
                            request.reporter.failed("boom");
                        }
                        1 => {
                            let _ = pool.cancel_task(request.task_id).await;
                        }
                        _ => {
                            request.reporter.succeeded();
                        }
                    }
                });
            }
        })
    };

    let mut submitters = Vec::new();
    for submitter in 0..4_u64 {
        let pool = Arc::clone(&pool);
        submitters.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(100 + submitter);
            let mut ids = Vec::new();
            for n in 0..15 {
                let spec = random_spec(&mut rng, format!("submitter {submitter} job {n}"));
                ids.push(pool.submit_task(spec).await.unwrap());
                tokio::task::yield_now().await;
            }
            ids
        }));
    }

    let mut ids = Vec::new();
    for submitter in submitters {
        ids.extend(submitter.await.unwrap());
    }
    assert_eq!(ids.len(), 60);

    for &id in &ids {
        let _ = pool.wait_for_task(id, Duration::from_secs(30)).await;
        let t = pool.get_task(id).await.unwrap();
        assert!(t.status.is_terminal(), "{id} left {}", t.status);
    }

    stop.store(true, Ordering::SeqCst);
    assert!(checker.await.unwrap() > 0);
    driver.abort();

    assert_snapshot_disjoint(&pool).await;
    assert!(pool.claims().await.unwrap().is_empty());
    assert_eq!(pool.get_stats().await.unwrap().in_flight(), 0);
    pool.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn process_workers_complete_and_fail() {
    use heddle_core::impls::ProcessLauncher;

    let ok = PoolBuilder::new()
        .config(config(2))
        .launcher(ProcessLauncher::new("sh").args(["-c", "test -n \"$HEDDLE_TASK_ID\""]))
        .build()
        .unwrap();
    ok.initialize().await.unwrap();
    let id = ok.submit_task(task("a.ts")).await.unwrap();
    let done = ok.wait_for_task(id, Duration::from_secs(10)).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    ok.shutdown().await;

    let failing = PoolBuilder::new()
        .config(PoolConfig {
            max_retries: 0,
            ..config(1)
        })
        .launcher(ProcessLauncher::new("sh").args(["-c", "exit 4"]))
        .build()
        .unwrap();
    failing.initialize().await.unwrap();
    let id = failing.submit_task(task("a.ts")).await.unwrap();
    let err = failing
        .wait_for_task(id, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::TaskFailed { .. }));
    failing.shutdown().await;
}
