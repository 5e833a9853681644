//! Engine process spawning and control.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::config::DebugProfile;

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The profile names no executable.
    #[error("No executable configured")]
    NoExecutable,
    /// The binary was not found.
    #[error("Executable not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(executable: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(executable.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(executable.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitKind {
    /// Exit code zero.
    Success,
    /// Non-zero exit code.
    Code(i32),
    /// Killed by a signal.
    Signal(i32),
    /// The process could not be started.
    LaunchFailed(String),
    /// Waiting on the process failed.
    Lost(String),
}

impl ExitKind {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// One-line description used for log diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Success => "process exited normally".to_string(),
            Self::Code(code) => format!("process exited with code {code}"),
            Self::Signal(signal) => format!("process terminated by signal {signal}"),
            Self::LaunchFailed(reason) => format!("failed to launch process: {reason}"),
            Self::Lost(reason) => format!("lost track of process: {reason}"),
        }
    }
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Self::Success,
            Some(code) => Self::Code(code),
            None => signal_of(status),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> ExitKind {
    use std::os::unix::process::ExitStatusExt;

    status
        .signal()
        .map_or_else(|| ExitKind::Lost(status.to_string()), ExitKind::Signal)
}

#[cfg(not(unix))]
fn signal_of(status: ExitStatus) -> ExitKind {
    ExitKind::Lost(status.to_string())
}

/// A running engine process.
#[derive(Debug)]
pub struct EngineProcess {
    child: Child,
}

impl EngineProcess {
    /// Spawn the profile's executable with `args`.
    ///
    /// stdout and stderr are piped; stdin is closed.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(profile: &DebugProfile, args: &[String]) -> Result<Self, SpawnError> {
        if !profile.is_launchable() {
            return Err(SpawnError::NoExecutable);
        }

        let mut cmd = Command::new(&profile.executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if profile.clear_env {
            cmd.env_clear();
        }
        cmd.envs(&profile.env);

        if let Some(ref dir) = profile.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&profile.executable, e))?;

        tracing::debug!(
            executable = %profile.executable,
            ?args,
            pid = ?child.id(),
            "Spawned engine process"
        );

        Ok(Self { child })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.child.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);

            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    tracing::warn!(pid, ?timeout, "Process ignored SIGTERM, killing");
                    self.child.kill().await
                }
            }
        } else {
            // Process already exited
            Ok(())
        }
    }
}
