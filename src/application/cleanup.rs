//! Periodic background maintenance with explicit shutdown.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Error returned when a background task does not stop cleanly.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The task panicked before or during shutdown
    #[error("background task panicked")]
    TaskPanicked,
    /// The task was cancelled by the runtime
    #[error("background task was cancelled")]
    TaskCancelled,
}

/// Handle to a periodic maintenance task.
///
/// Dropping the handle does not stop the task. Call
/// [`shutdown`](Self::shutdown) to stop it and wait for it to finish.
#[derive(Debug)]
pub struct CleanupHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl CleanupHandle {
    /// Spawn `tick` every `period` on the current tokio runtime.
    ///
    /// The first tick runs one full period after spawning. The task stops on
    /// its own when `tick` returns `false`.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        debug!(task = name, "maintenance task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !tick() {
                            debug!(task = name, "maintenance target dropped, stopping");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            join,
        }
    }

    /// Whether the task has already exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the task to stop and wait for it.
    ///
    /// No tick runs after this returns.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The receiver is gone if the task already exited.
            let _ = tx.send(());
        }
        match self.join.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => Err(ShutdownError::TaskPanicked),
            Err(_) => Err(ShutdownError::TaskCancelled),
        }
    }
}
