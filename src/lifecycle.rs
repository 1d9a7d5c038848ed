//! Process lifecycle: shutdown signals and ownership of background tasks.
//!
//! SIGTERM/SIGINT trigger a cancellation token that both stops the HTTP
//! server gracefully and winds down background tasks (the rate-limiter
//! sweeper). Background tasks are registered here rather than free-running,
//! so shutdown can wait for them.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct Lifecycle {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl Lifecycle {
    /// Install signal handlers. Fails if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        let trigger = token.clone();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, shutting down");
                    trigger.cancel();
                }
                _ = sigint.recv() => {
                    tracing::info!("SIGINT received, shutting down");
                    trigger.cancel();
                }
            }
        });

        Ok(Self {
            task_tracker,
            cancellation_token: token,
        })
    }

    /// Token distributed to subsystems that should stop on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Register a background task owned by this lifecycle.
    pub fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.task_tracker.spawn(task);
    }

    /// Cancel everything and wait for owned tasks to finish.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}
