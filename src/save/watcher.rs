//! Restart or stop a runner when a save finishes.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::runner::{RunnerHandle, WeakRunnerHandle};
use crate::save::{SaveCompletion, SaveOperation};

/// What a watcher did with its one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The save succeeded and the runner was told to start.
    Started(SaveCompletion),
    /// The save failed and the runner was told to stop.
    Stopped(SaveCompletion),
    /// The runner refused the start.
    Rejected {
        completion: SaveCompletion,
        reason: String,
    },
    /// The runner was gone by the time the save finished.
    RunnerGone(SaveCompletion),
    /// The operation was dropped without completing.
    SourceClosed,
    /// [`SaveWatcher::detach`] was called first.
    Detached,
    /// The watcher task panicked or was aborted before reacting.
    Failed(String),
}

/// One-shot subscription tying a save operation's outcome to a runner.
///
/// Attach it only when a delayed start is wanted: a successful save calls
/// `start(false)`, which launches the engine even from idle. The watcher
/// reacts to the first notification only and then drops its subscription.
/// Dropping the `SaveWatcher` value does not cancel it; use
/// [`detach`](Self::detach) for that.
#[derive(Debug)]
pub struct SaveWatcher {
    task: JoinHandle<WatchOutcome>,
    cancel: CancellationToken,
}

impl SaveWatcher {
    /// Subscribe to `operation` on behalf of `runner`.
    ///
    /// The subscription is registered before this returns, so a completion
    /// sent right afterwards is not missed.
    #[must_use]
    pub fn attach(runner: &RunnerHandle, operation: &SaveOperation) -> Self {
        let subscription = operation.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch(subscription, runner.downgrade(), cancel.clone()));

        tracing::debug!(kind = %operation.kind(), "Save watcher attached");
        Self { task, cancel }
    }

    /// Stop watching without reacting, if the notification has not arrived yet.
    pub fn detach(&self) {
        self.cancel.cancel();
    }

    /// Whether the watcher has reacted or detached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watcher to finish and report what it did.
    pub async fn finished(self) -> WatchOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Save watcher task failed");
                WatchOutcome::Failed(e.to_string())
            }
        }
    }
}

async fn watch(
    mut subscription: broadcast::Receiver<SaveCompletion>,
    runner: WeakRunnerHandle,
    cancel: CancellationToken,
) -> WatchOutcome {
    let completion = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!("Save watcher detached");
                return WatchOutcome::Detached;
            }
            received = subscription.recv() => match received {
                Ok(completion) => break completion,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Save watcher lagged behind notifications");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("Save operation dropped before completing");
                    return WatchOutcome::SourceClosed;
                }
            },
        }
    };

    // unsubscribe before reacting; later notifications are never seen
    drop(subscription);

    let Some(runner) = runner.upgrade() else {
        tracing::debug!(kind = %completion.kind, "Runner gone before save finished");
        return WatchOutcome::RunnerGone(completion);
    };

    if completion.failed {
        tracing::info!(kind = %completion.kind, "Save failed, stopping runner");
        match runner.stop().await {
            Ok(()) => WatchOutcome::Stopped(completion),
            Err(_) => WatchOutcome::RunnerGone(completion),
        }
    } else {
        tracing::info!(kind = %completion.kind, "Save finished, starting runner");
        match runner.start(false).await {
            Ok(()) => WatchOutcome::Started(completion),
            Err(crate::runner::RunnerError::Closed) => WatchOutcome::RunnerGone(completion),
            Err(e) => {
                tracing::error!(error = %e, "Runner refused to start after save");
                WatchOutcome::Rejected {
                    completion,
                    reason: e.to_string(),
                }
            }
        }
    }
}
