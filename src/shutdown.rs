//! Graceful shutdown: signal handling, tracked background tasks, and
//! session drain.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tracks background tasks and cancels them as a group on shutdown.
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        ShutdownCoordinator {
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Token observed by every tracked task and by the session sweeper.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns a tracked background task that stops on cancellation.
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = future => {
                    info!(task = name, "background task completed");
                }
                _ = cancel.cancelled() => {
                    info!(task = name, "background task stopped by shutdown");
                }
            }
        });
    }

    /// Cancels every tracked task and waits up to `timeout` for them to
    /// finish; stragglers are aborted.
    pub async fn shutdown(mut self, timeout: Duration) {
        info!("initiating graceful shutdown");
        self.cancel.cancel();

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(err) = result {
                    warn!(error = %err, "task failed during shutdown");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("shutdown timeout reached, aborting remaining tasks");
            self.tasks.abort_all();
        }
        info!("shutdown complete");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for SIGTERM or SIGINT.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, initiating shutdown"),
        _ = terminate => info!("received SIGTERM, initiating shutdown"),
    }
}

/// Runs a server future until it exits or a signal arrives, then drains
/// the coordinator.
pub async fn run_with_graceful_shutdown<F, E>(
    server: F,
    coordinator: ShutdownCoordinator,
    timeout: Duration,
) where
    F: Future<Output = Result<(), E>> + Send,
    E: std::fmt::Display,
{
    tokio::select! {
        result = server => match result {
            Ok(()) => info!("server stopped normally"),
            Err(err) => error!(error = %err, "server error"),
        },
        _ = wait_for_signal() => {}
    }
    coordinator.shutdown(timeout).await;
}
