//! Configuration types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the startup artifact path in [`DebugProfile::artifact_arg`].
pub const ARTIFACT_PLACEHOLDER: &str = "{}";

/// Launch description for the engine process.
///
/// The runner treats this as inert data: it never inspects the arguments
/// beyond appending the startup artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugProfile {
    /// Human readable description shown by `engine-runner profiles`.
    pub description: String,
    /// Executable to launch. Resolved through `PATH` when not absolute.
    pub executable: String,
    /// Arguments passed before the startup artifact argument.
    pub args: Vec<String>,
    /// Working directory; inherited from the runner when unset.
    pub working_dir: Option<PathBuf>,
    /// Environment overrides applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Start from an empty environment instead of inheriting.
    pub clear_env: bool,
    /// Template for the argument referencing the startup artifact.
    pub artifact_arg: String,
    /// Extra script text written to the artifact after the instruction.
    pub script_text: String,
}

fn default_artifact_arg() -> String {
    format!("--script-run={ARTIFACT_PLACEHOLDER}")
}

impl Default for DebugProfile {
    fn default() -> Self {
        Self {
            description: String::new(),
            executable: String::new(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            clear_env: false,
            artifact_arg: default_artifact_arg(),
            script_text: String::new(),
        }
    }
}

impl DebugProfile {
    /// Create a profile launching `executable` with no extra arguments.
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the artifact argument template.
    #[must_use]
    pub fn artifact_arg(mut self, template: impl Into<String>) -> Self {
        self.artifact_arg = template.into();
        self
    }

    /// Set the script text appended to the startup artifact.
    #[must_use]
    pub fn script_text(mut self, text: impl Into<String>) -> Self {
        self.script_text = text.into();
        self
    }

    /// Whether an executable has been set.
    #[must_use]
    pub fn is_launchable(&self) -> bool {
        !self.executable.trim().is_empty()
    }

    /// Build the full argument list for a run using `artifact` as the startup file.
    ///
    /// An empty template means the artifact is not passed on the command line.
    #[must_use]
    pub fn build_args(&self, artifact: &Path) -> Vec<String> {
        let mut args = self.args.clone();

        if !self.artifact_arg.is_empty() {
            let path = artifact.display().to_string();
            args.push(self.artifact_arg.replace(ARTIFACT_PLACEHOLDER, &path));
        }

        args
    }
}

/// Tuning options for a runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// Grace period between SIGTERM and SIGKILL, in milliseconds.
    pub terminate_timeout_ms: u64,
    /// How long exit handling waits for output readers to reach EOF, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Clear the log whenever a new process is launched.
    pub clear_log_on_launch: bool,
    /// Directory for startup artifacts. Defaults to the system temp dir.
    pub artifact_dir: Option<PathBuf>,
    /// Capacity of the output broadcast channel.
    pub output_channel_capacity: usize,
}

/// Default grace period for graceful process termination.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for draining output after exit.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default capacity for the output broadcast channel.
pub const DEFAULT_OUTPUT_CHANNEL_CAPACITY: usize = 256;

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: u64::try_from(DEFAULT_TERMINATE_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
            drain_timeout_ms: u64::try_from(DEFAULT_DRAIN_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            clear_log_on_launch: true,
            artifact_dir: None,
            output_channel_capacity: DEFAULT_OUTPUT_CHANNEL_CAPACITY,
        }
    }
}

impl RunnerOptions {
    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Set the termination grace period.
    #[must_use]
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the artifact directory.
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// Keep the log across launches.
    #[must_use]
    pub fn keep_log(mut self) -> Self {
        self.clear_log_on_launch = false;
        self
    }
}

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Runner tuning.
    pub runner: RunnerOptions,
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,
    /// Named launch profiles.
    pub profiles: BTreeMap<String, DebugProfile>,
}

impl RunnerConfig {
    /// Look up a profile by name, falling back to `default_profile`.
    #[must_use]
    pub fn profile(&self, name: Option<&str>) -> Option<(&str, &DebugProfile)> {
        let name = name.or(self.default_profile.as_deref())?;
        self.profiles
            .get_key_value(name)
            .map(|(key, profile)| (key.as_str(), profile))
    }
}
