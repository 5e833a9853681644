//! Shared helpers for integration tests.

use std::path::Path;
use std::time::Duration;

use engine_runner::config::{DebugProfile, RunnerOptions};
use engine_runner::runner::{RunStatus, RunnerHandle};
use tempfile::TempDir;

/// Upper bound for any single wait in these tests.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Profile running `script` under `sh -c`.
///
/// The startup artifact argument lands in `$0`.
pub fn sh(script: &str) -> DebugProfile {
    DebugProfile::new("sh").args(["-c", script])
}

/// Options writing artifacts into `dir` with a short termination grace period.
pub fn options(dir: &TempDir) -> RunnerOptions {
    RunnerOptions::default()
        .with_artifact_dir(dir.path())
        .with_terminate_timeout(Duration::from_millis(500))
}

pub async fn wait_for(
    runner: &RunnerHandle,
    predicate: impl FnMut(&RunStatus) -> bool,
) -> RunStatus {
    tokio::time::timeout(TIMEOUT, runner.wait_until(predicate))
        .await
        .expect("timed out waiting for runner")
        .expect("runner closed")
}

pub async fn wait_idle(runner: &RunnerHandle) -> RunStatus {
    wait_for(runner, |s| !s.running).await
}

/// Number of files left in an artifact directory.
pub fn artifact_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
