//! HealthMonitor - タイムアウトしたタスクの回収
//!
//! # フロー
//! 1. 一定間隔（`healthCheckIntervalMs`）で起動
//! 2. `started_at` から `taskTimeoutMs` を超えた試行を failed にする
//! 3. slot と claim を解放し、リトライが残っていれば pending に戻す
//! 4. 空いた slot に割り当てを 1 回実行

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::pool::PoolShared;

pub(crate) struct HealthMonitor {
    shared: Arc<PoolShared>,
    period: Duration,
}

impl HealthMonitor {
    pub(crate) fn new(shared: Arc<PoolShared>, period: Duration) -> Self {
        Self { shared, period }
    }

    pub(crate) async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; the pool has just assigned
        ticker.tick().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // sender dropped: the pool is gone
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let expired = self.shared.health_check().await;
                    if !expired.is_empty() {
                        info!(count = expired.len(), "health check reclaimed timed-out tasks");
                    }
                }
            }
        }
        debug!("health monitor stopped");
    }
}
