//! ChannelLauncher - プロセス内ドライバーへの受け渡し
//!
//! Launch requests are forwarded over an mpsc channel to whoever holds the
//! receiver: a test, or an embedding application running work on its own
//! tasks. The driver answers through `request.reporter`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::LaunchError;
use crate::ports::{LaunchHandle, LaunchRequest, Launcher};

#[derive(Debug, Clone)]
pub struct ChannelLauncher {
    tx: mpsc::UnboundedSender<LaunchRequest>,
}

impl ChannelLauncher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LaunchRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Launcher for ChannelLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchHandle, LaunchError> {
        self.tx
            .send(request)
            .map_err(|_| LaunchError::Unavailable("launch channel closed".into()))?;
        Ok(LaunchHandle::detached())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SlotId, TaskId};
    use crate::ports::WorkerReporter;
    use ulid::Ulid;

    fn request() -> LaunchRequest {
        let (tx, _rx) = mpsc::unbounded_channel();
        let task_id = TaskId::from_ulid(Ulid::new());
        LaunchRequest {
            slot_id: SlotId::new(1),
            task_id,
            attempt: 1,
            description: "t".into(),
            payload: serde_json::Value::Null,
            reporter: WorkerReporter::new(tx, task_id, SlotId::new(1), 1),
        }
    }

    #[tokio::test]
    async fn forwards_requests() {
        let (launcher, mut rx) = ChannelLauncher::new();
        let req = request();
        let task_id = req.task_id;

        launcher.launch(req).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().task_id, task_id);
    }

    #[tokio::test]
    async fn closed_driver_is_unavailable() {
        let (launcher, rx) = ChannelLauncher::new();
        drop(rx);
        let err = launcher.launch(request()).await.unwrap_err();
        assert!(matches!(err, LaunchError::Unavailable(_)));
    }
}
