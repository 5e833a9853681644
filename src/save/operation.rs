//! Completion side of a document operation.
//!
//! The save pipeline itself lives elsewhere; this is only the notification
//! it raises when it finishes.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Kind of document operation that completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Save,
    Verify,
    Search,
    Merge,
    /// Operation type code not known to this crate.
    Other(i32),
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Save => write!(f, "save"),
            Self::Verify => write!(f, "verify"),
            Self::Search => write!(f, "search"),
            Self::Merge => write!(f, "merge"),
            Self::Other(code) => write!(f, "operation {code}"),
        }
    }
}

/// Payload of an operation's done notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveCompletion {
    pub kind: OperationKind,
    pub failed: bool,
}

/// Capacity of an operation's completion channel.
const COMPLETION_CAPACITY: usize = 4;

/// Notification source for one in-flight operation.
///
/// Clones share the same channel, so the operation's worker can hold one
/// while watchers subscribe through another.
#[derive(Debug, Clone)]
pub struct SaveOperation {
    kind: OperationKind,
    done: broadcast::Sender<SaveCompletion>,
}

impl SaveOperation {
    #[must_use]
    pub fn new(kind: OperationKind) -> Self {
        let (done, _) = broadcast::channel(COMPLETION_CAPACITY);
        Self { kind, done }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Register for the done notification.
    ///
    /// Only notifications sent after this call are delivered.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SaveCompletion> {
        self.done.subscribe()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.done.receiver_count()
    }

    /// Signal completion. Returns how many subscribers were notified.
    pub fn complete(&self, failed: bool) -> usize {
        self.notify(SaveCompletion {
            kind: self.kind,
            failed,
        })
    }

    /// Deliver an arbitrary completion payload.
    pub fn notify(&self, completion: SaveCompletion) -> usize {
        tracing::debug!(
            kind = %completion.kind,
            failed = completion.failed,
            "Operation done"
        );
        self.done.send(completion).unwrap_or(0)
    }
}
