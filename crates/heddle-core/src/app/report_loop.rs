//! ReportLoop - ワーカーからの完了報告を処理

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::pool::PoolShared;
use crate::ports::WorkerReport;

/// Drains `WorkerReport`s in arrival order. Each accepted report frees a slot
/// and triggers an assignment pass.
pub(crate) struct ReportLoop {
    shared: Arc<PoolShared>,
    reports: mpsc::UnboundedReceiver<WorkerReport>,
}

impl ReportLoop {
    pub(crate) fn new(shared: Arc<PoolShared>, reports: mpsc::UnboundedReceiver<WorkerReport>) -> Self {
        Self { shared, reports }
    }

    pub(crate) async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let report = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // 変更が入ったら次のループで判定
                    continue;
                }
                report = self.reports.recv() => report,
            };

            let Some(report) = report else {
                break;
            };
            debug!(
                task = %report.task_id,
                slot = %report.slot_id,
                attempt = report.attempt,
                success = report.outcome.is_success(),
                "worker report received"
            );
            self.shared.handle_report(report).await;
        }
        debug!("report loop stopped");
    }
}
