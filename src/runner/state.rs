//! Run state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process::ExitKind;

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    /// Flagged as running, waiting for a non-delayed start to launch.
    PendingDelayedStart,
    /// A process has been launched and has not been confirmed dead.
    Running,
}

impl RunState {
    /// The merged "a run has been requested and has not ended" flag.
    #[must_use]
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// State machine for tracking the runner lifecycle.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    state: RunState,
    launches: u64,
    abnormal_exits: u64,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            launches: 0,
            abnormal_exits: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `new_state`. Returns false if already there.
    pub fn transition(&mut self, new_state: RunState) -> bool {
        if self.state == new_state {
            return false;
        }
        tracing::debug!(from = ?self.state, to = ?new_state, "State transition");
        self.state = new_state;
        true
    }

    pub fn record_launch(&mut self) {
        self.launches = self.launches.saturating_add(1);
    }

    pub fn record_exit(&mut self, exit: &ExitKind) {
        if !exit.is_success() {
            self.abnormal_exits = self.abnormal_exits.saturating_add(1);
        }
    }

    #[must_use]
    pub fn launches(&self) -> u64 {
        self.launches
    }

    #[must_use]
    pub fn abnormal_exits(&self) -> u64 {
        self.abnormal_exits
    }
}

/// Snapshot published on every run-state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    /// Merged running flag; see [`RunState::is_running`].
    pub running: bool,
    /// Termination has been requested and exit is not yet confirmed.
    pub stopping: bool,
    /// PID of the live process.
    pub pid: Option<u32>,
    /// Startup artifact of the live run.
    pub artifact: Option<PathBuf>,
    /// When the live process was launched.
    pub started_at: Option<DateTime<Utc>>,
    /// Number of launch attempts since the runner was created.
    pub launches: u64,
    /// Number of runs that ended abnormally.
    pub abnormal_exits: u64,
    /// How the most recent run ended.
    pub last_exit: Option<ExitKind>,
    /// Incremented on every notification.
    pub revision: u64,
}

impl RunStatus {
    /// Whether a process is physically alive (as far as the runner knows).
    #[must_use]
    pub fn process_alive(&self) -> bool {
        self.pid.is_some()
    }
}
