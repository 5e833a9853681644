//! Runner error types.

use crate::process::ArtifactError;

/// Errors returned by runner operations.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    /// The startup artifact could not be prepared; nothing was launched.
    #[error("Startup artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// The runner has no launchable profile.
    #[error("No executable configured")]
    NotConfigured,

    /// The operation needs an idle runner.
    #[error("Runner is busy; stop it first")]
    Busy,

    /// The runner task has ended.
    #[error("Runner closed")]
    Closed,
}
