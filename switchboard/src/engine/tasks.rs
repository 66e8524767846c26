use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Scope for fire-and-forget work (ban backfills) that must still be stopped
/// and drained on shutdown. Clones share the same scope.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that receives the scope's cancellation token.
    pub fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            warn!("background scope is shut down, task dropped");
            return;
        }
        self.tracker.spawn(task(self.cancel.child_token()));
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Wait until every spawned task has finished, without cancelling them.
    pub async fn idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        // a concurrent shutdown keeps the tracker closed
        if !self.cancel.is_cancelled() {
            self.tracker.reopen();
        }
    }

    /// Cancel all tasks and wait up to `timeout` for them to exit.
    /// Returns false when tasks were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("background tasks drained");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "background tasks did not finish before shutdown timeout"
                );
                false
            }
        }
    }
}
