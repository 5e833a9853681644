//! Engine process supervisor.
//!
//! A [`Runner`] owns at most one engine process, its startup artifact and
//! the run log. All of its state lives in a single task: [`RunnerHandle`]
//! calls arrive as commands, and process output and exit arrive as events on
//! the same loop, so every mutation is serialized.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DebugProfile, RunnerOptions};
use crate::process::{EngineProcess, ExitKind, StartupArtifact};
use crate::runner::{
    LogReader, RunLog, RunState, RunStateMachine, RunStatus, RunnerError, Utf8Decoder,
};

/// Prefix of diagnostic lines the runner writes into the log.
pub const DIAGNOSTIC_PREFIX: &str = "[engine-runner]";

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;
const READ_CHUNK: usize = 8192;

/// Which pipe a piece of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
enum Command {
    Configure {
        profile: Box<DebugProfile>,
        instruction: String,
        reply: oneshot::Sender<Result<(), RunnerError>>,
    },
    Start {
        delayed: bool,
        reply: oneshot::Sender<Result<(), RunnerError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
enum ProcessEvent {
    Output { stream: OutputStream, bytes: Vec<u8> },
    Exited { generation: u64, exit: ExitKind },
}

#[derive(Debug)]
struct LiveProcess {
    generation: u64,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    stopping: bool,
}

/// Supervisor task state. Created and driven through [`Runner::spawn`].
#[derive(Debug)]
pub struct Runner {
    options: RunnerOptions,
    profile: DebugProfile,
    instruction: String,
    machine: RunStateMachine,
    artifact: Option<StartupArtifact>,
    live: Option<LiveProcess>,
    generation: u64,
    last_exit: Option<ExitKind>,
    stdout_decoder: Utf8Decoder,
    stderr_decoder: Utf8Decoder,
    log: LogReader,
    status_tx: watch::Sender<RunStatus>,
    output_tx: broadcast::Sender<String>,
    event_tx: mpsc::Sender<ProcessEvent>,
}

impl Runner {
    /// Start a runner task on the current tokio runtime.
    ///
    /// The task ends when [`RunnerHandle::shutdown`] is called or the last
    /// strong handle is dropped; any live process is terminated first.
    #[must_use]
    pub fn spawn(options: RunnerOptions) -> RunnerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (status_tx, status_rx) = watch::channel(RunStatus::default());
        let (output_tx, _) = broadcast::channel(options.output_channel_capacity.max(1));
        let log = LogReader::new();

        let runner = Self {
            options,
            profile: DebugProfile::default(),
            instruction: String::new(),
            machine: RunStateMachine::new(),
            artifact: None,
            live: None,
            generation: 0,
            last_exit: None,
            stdout_decoder: Utf8Decoder::new(),
            stderr_decoder: Utf8Decoder::new(),
            log: log.clone(),
            status_tx,
            output_tx: output_tx.clone(),
            event_tx,
        };
        tokio::spawn(runner.run(command_rx, event_rx));

        RunnerHandle {
            commands: command_tx,
            status: status_rx,
            output: output_tx,
            log,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<ProcessEvent>,
    ) {
        tracing::debug!("Runner task started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Configure { profile, instruction, reply }) => {
                        let _ = reply.send(self.configure(*profile, instruction));
                    }
                    Some(Command::Start { delayed, reply }) => {
                        let _ = reply.send(self.start(delayed));
                    }
                    Some(Command::Stop { reply }) => {
                        self.stop();
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.teardown(&mut events).await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        self.teardown(&mut events).await;
                        return;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
    }

    fn configure(&mut self, profile: DebugProfile, instruction: String) -> Result<(), RunnerError> {
        if self.machine.state().is_running() {
            tracing::warn!(state = ?self.machine.state(), "Configure rejected while a run is active");
            return Err(RunnerError::Busy);
        }

        tracing::info!(
            executable = %profile.executable,
            instruction_len = instruction.len(),
            "Runner configured"
        );
        self.profile = profile;
        self.instruction = instruction;
        Ok(())
    }

    fn start(&mut self, delayed: bool) -> Result<(), RunnerError> {
        match (self.machine.state(), delayed) {
            (RunState::Running, _) | (RunState::PendingDelayedStart, true) => {
                tracing::debug!(
                    state = ?self.machine.state(),
                    delayed,
                    "Start ignored, run already requested"
                );
                Ok(())
            }
            (RunState::Idle, true) => {
                tracing::info!("Delayed start requested");
                self.machine.transition(RunState::PendingDelayedStart);
                self.emit();
                Ok(())
            }
            (_, false) => self.launch(),
        }
    }

    fn launch(&mut self) -> Result<(), RunnerError> {
        if !self.profile.is_launchable() {
            tracing::error!("Cannot launch without an executable");
            self.abandon_start();
            return Err(RunnerError::NotConfigured);
        }

        let artifact = match StartupArtifact::create(
            self.options.artifact_dir.as_deref(),
            &self.instruction,
            &self.profile.script_text,
        ) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(error = %e, "Failed to prepare startup artifact");
                self.abandon_start();
                return Err(e.into());
            }
        };

        if self.options.clear_log_on_launch {
            self.log.write(RunLog::clear);
        }
        self.stdout_decoder = Utf8Decoder::new();
        self.stderr_decoder = Utf8Decoder::new();
        self.generation += 1;
        self.machine.record_launch();
        self.machine.transition(RunState::Running);

        let args = self.profile.build_args(artifact.path());
        self.artifact = Some(artifact);

        match EngineProcess::spawn(&self.profile, &args) {
            Ok(process) => {
                let pid = process.id();
                let cancel = CancellationToken::new();
                tracing::info!(
                    pid = ?pid,
                    generation = self.generation,
                    executable = %self.profile.executable,
                    "Engine process launched"
                );

                self.live = Some(LiveProcess {
                    generation: self.generation,
                    pid,
                    started_at: Utc::now(),
                    cancel: cancel.clone(),
                    stopping: false,
                });
                tokio::spawn(supervise(
                    process,
                    self.generation,
                    cancel,
                    self.options.terminate_timeout(),
                    self.options.drain_timeout(),
                    self.event_tx.clone(),
                ));
                self.emit();
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    executable = %self.profile.executable,
                    "Engine process failed to launch"
                );
                self.emit();
                self.finish_run(ExitKind::LaunchFailed(e.to_string()));
            }
        }

        Ok(())
    }

    /// Fall back to idle after a start that could not launch anything.
    fn abandon_start(&mut self) {
        if self.machine.transition(RunState::Idle) {
            self.emit();
        }
    }

    fn stop(&mut self) {
        match self.machine.state() {
            RunState::Idle => tracing::debug!("Stop ignored, runner idle"),
            RunState::PendingDelayedStart => {
                tracing::info!("Delayed start cancelled");
                self.machine.transition(RunState::Idle);
                self.emit();
            }
            RunState::Running => {
                let Some(live) = self.live.as_mut() else {
                    return;
                };
                if live.stopping {
                    tracing::debug!(pid = ?live.pid, "Termination already in flight");
                    return;
                }
                live.stopping = true;
                live.cancel.cancel();
                tracing::info!(pid = ?live.pid, "Termination requested");
                self.emit();
            }
        }
    }

    fn handle_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output { stream, bytes } => {
                let text = match stream {
                    OutputStream::Stdout => self.stdout_decoder.decode(&bytes),
                    OutputStream::Stderr => self.stderr_decoder.decode(&bytes),
                };
                self.append_output(&text);
            }
            ProcessEvent::Exited { generation, exit } => {
                if self.live.as_ref().map(|live| live.generation) != Some(generation) {
                    tracing::debug!(generation, "Ignoring exit of a previous run");
                    return;
                }
                self.live = None;
                self.finish_run(exit);
            }
        }
    }

    fn append_output(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.log.write(|log| log.append(text));
        let _ = self.output_tx.send(text.to_string());
    }

    /// Common exit path for normal exits, crashes and launch failures.
    fn finish_run(&mut self, exit: ExitKind) {
        let stdout_tail = self.stdout_decoder.finish();
        let stderr_tail = self.stderr_decoder.finish();
        self.append_output(&stdout_tail);
        self.append_output(&stderr_tail);

        if exit.is_success() {
            tracing::info!(generation = self.generation, "Engine process exited");
        } else {
            tracing::warn!(
                generation = self.generation,
                exit = %exit.describe(),
                "Engine process ended abnormally"
            );
            let line = format!("{DIAGNOSTIC_PREFIX} {}", exit.describe());
            self.log.write(|log| log.append_line(&line));
            let _ = self.output_tx.send(format!("{line}\n"));
        }

        if let Some(artifact) = self.artifact.take() {
            remove_artifact(artifact);
        }

        self.machine.record_exit(&exit);
        self.last_exit = Some(exit);
        self.machine.transition(RunState::Idle);
        self.emit();
    }

    async fn teardown(&mut self, events: &mut mpsc::Receiver<ProcessEvent>) {
        self.stop();

        while self.live.is_some() {
            match events.recv().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }

        if let Some(artifact) = self.artifact.take() {
            remove_artifact(artifact);
        }
        tracing::debug!("Runner task stopped");
    }

    /// Publish a run-state-changed notification.
    fn emit(&self) {
        let live = self.live.as_ref();
        let state = self.machine.state();
        let status = RunStatus {
            state,
            running: state.is_running(),
            stopping: live.is_some_and(|l| l.stopping),
            pid: live.and_then(|l| l.pid),
            artifact: self.artifact.as_ref().map(|a| a.path().to_path_buf()),
            started_at: live.map(|l| l.started_at),
            launches: self.machine.launches(),
            abnormal_exits: self.machine.abnormal_exits(),
            last_exit: self.last_exit.clone(),
            revision: 0,
        };

        self.status_tx.send_modify(move |current| {
            let revision = current.revision.wrapping_add(1);
            *current = RunStatus { revision, ..status };
        });
    }
}

fn remove_artifact(artifact: StartupArtifact) {
    let path = artifact.path().to_path_buf();
    if let Err(e) = artifact.remove() {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove startup artifact");
    }
}

/// Own one process until it exits, then report the exit.
///
/// Output readers are drained before the exit event is sent so that the log
/// is complete when the runner goes idle.
async fn supervise(
    mut process: EngineProcess,
    generation: u64,
    cancel: CancellationToken,
    terminate_timeout: Duration,
    drain_timeout: Duration,
    events: mpsc::Sender<ProcessEvent>,
) {
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = process.take_stdout() {
        readers.push(tokio::spawn(pump(stdout, OutputStream::Stdout, events.clone())));
    }
    if let Some(stderr) = process.take_stderr() {
        readers.push(tokio::spawn(pump(stderr, OutputStream::Stderr, events.clone())));
    }

    let waited = tokio::select! {
        status = process.wait() => Some(status),
        () = cancel.cancelled() => None,
    };

    let result = match waited {
        Some(result) => result,
        None => {
            tracing::debug!(generation, pid = ?process.id(), "Terminating engine process");
            match process.graceful_terminate(terminate_timeout).await {
                Ok(()) => process.wait().await,
                Err(e) => Err(e),
            }
        }
    };

    drain(readers, drain_timeout).await;

    let exit = match result {
        Ok(status) => ExitKind::from(status),
        Err(e) => ExitKind::Lost(e.to_string()),
    };
    let _ = events.send(ProcessEvent::Exited { generation, exit }).await;
}

async fn drain(readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            tracing::debug!("Output pipe still open after exit, abandoning reader");
            reader.abort();
        }
    }
}

/// Forward whatever is readable from `reader`, chunk by chunk.
async fn pump<R>(mut reader: R, stream: OutputStream, events: mpsc::Sender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = ProcessEvent::Output {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(?stream, error = %e, "Failed to read process output");
                break;
            }
        }
    }
}

/// Public interface to a runner task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<RunStatus>,
    output: broadcast::Sender<String>,
    log: LogReader,
}

impl RunnerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RunnerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| RunnerError::Closed)?;
        response.await.map_err(|_| RunnerError::Closed)
    }

    /// Replace the launch profile and startup instruction.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Busy` while a run is requested or active.
    pub async fn configure(
        &self,
        profile: DebugProfile,
        instruction: impl Into<String>,
    ) -> Result<(), RunnerError> {
        let instruction = instruction.into();
        self.request(|reply| Command::Configure {
            profile: Box::new(profile),
            instruction,
            reply,
        })
        .await?
    }

    /// Request a run.
    ///
    /// With `delayed`, the runner is flagged as running but nothing is
    /// launched until a later `start(false)`. Starting while a run is already
    /// requested does nothing, except that `start(false)` promotes a pending
    /// delayed start.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Artifact` or `RunnerError::NotConfigured` if the
    /// launch could not be prepared; the runner is idle afterwards. A process
    /// that fails to execute is not an error here: it is reported as an exit.
    pub async fn start(&self, delayed: bool) -> Result<(), RunnerError> {
        self.request(|reply| Command::Start { delayed, reply }).await?
    }

    /// Cancel a pending delayed start or request termination of the process.
    ///
    /// Returns once the request is issued. The running flag clears when the
    /// exit is confirmed; use [`wait_until`](Self::wait_until) to observe it.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Closed` if the runner task has ended.
    pub async fn stop(&self) -> Result<(), RunnerError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Terminate any live process, remove the artifact and end the task.
    pub async fn shutdown(self) {
        if self
            .request(|reply| Command::Shutdown { reply })
            .await
            .is_err()
        {
            tracing::debug!("Runner already closed");
        }
    }

    /// Whether a run has been requested and has not ended.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.borrow().running
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.status.borrow().state
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    /// Receiver for run-state-changed notifications.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.clone()
    }

    /// Receiver for output chunks as they are appended to the log.
    #[must_use]
    pub fn subscribe_output(&self) -> broadcast::Receiver<String> {
        self.output.subscribe()
    }

    #[must_use]
    pub fn log(&self) -> &LogReader {
        &self.log
    }

    /// Wait until the published status satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Closed` if the runner ends first.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&RunStatus) -> bool,
    ) -> Result<RunStatus, RunnerError> {
        let mut status = self.status.clone();
        let result = status
            .wait_for(|s| predicate(s))
            .await
            .map(|s| (*s).clone())
            .map_err(|_| RunnerError::Closed);
        result
    }

    /// Wait until no run is requested or active.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Closed` if the runner ends first.
    pub async fn wait_idle(&self) -> Result<RunStatus, RunnerError> {
        self.wait_until(|s| !s.running).await
    }

    /// Handle that does not keep the runner alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakRunnerHandle {
        WeakRunnerHandle {
            commands: self.commands.downgrade(),
            status: self.status.clone(),
            output: self.output.clone(),
            log: self.log.clone(),
        }
    }
}

/// Non-owning reference to a runner task.
#[derive(Debug, Clone)]
pub struct WeakRunnerHandle {
    commands: mpsc::WeakSender<Command>,
    status: watch::Receiver<RunStatus>,
    output: broadcast::Sender<String>,
    log: LogReader,
}

impl WeakRunnerHandle {
    /// Get a usable handle if the runner task is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<RunnerHandle> {
        self.commands.upgrade().map(|commands| RunnerHandle {
            commands,
            status: self.status.clone(),
            output: self.output.clone(),
            log: self.log.clone(),
        })
    }
}
