//! Start/stop state machine tests against real processes.

use engine_runner::config::DebugProfile;
use engine_runner::process::ExitKind;
use engine_runner::runner::{RunState, Runner, RunnerError, DIAGNOSTIC_PREFIX};
use tokio_test::{assert_err, assert_ok};

use crate::support::{artifact_count, options, sh, wait_for, wait_idle, TIMEOUT};

#[tokio::test]
async fn start_while_running_spawns_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);

    assert_ok!(runner.start(false).await);
    let first = runner.status();
    assert_eq!(first.state, RunState::Running);
    assert_eq!(first.launches, 1);
    assert!(first.pid.is_some());

    assert_ok!(runner.start(false).await);
    assert_ok!(runner.start(true).await);
    let second = runner.status();
    assert_eq!(second.state, RunState::Running);
    assert_eq!(second.launches, 1);
    assert_eq!(second.pid, first.pid);
    assert_eq!(second.revision, first.revision);
    assert_eq!(artifact_count(dir.path()), 1);

    assert_ok!(runner.stop().await);
    wait_idle(&runner).await;
}

#[tokio::test]
async fn delayed_start_then_start_launches_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);

    assert_ok!(runner.start(true).await);
    let pending = runner.status();
    assert_eq!(pending.state, RunState::PendingDelayedStart);
    assert!(runner.is_running());
    assert!(!pending.process_alive());
    assert_eq!(pending.launches, 0);
    assert_eq!(artifact_count(dir.path()), 0);

    assert_ok!(runner.start(true).await);
    assert_eq!(runner.status().revision, pending.revision);

    assert_ok!(runner.start(false).await);
    let running = runner.status();
    assert_eq!(running.state, RunState::Running);
    assert_eq!(running.launches, 1);
    assert!(running.process_alive());

    assert_ok!(runner.stop().await);
    wait_idle(&runner).await;
}

#[tokio::test]
async fn stop_cancels_pending_delayed_start() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);

    assert_ok!(runner.start(true).await);
    assert_ok!(runner.stop().await);

    let status = runner.status();
    assert_eq!(status.state, RunState::Idle);
    assert!(!runner.is_running());
    assert_eq!(status.launches, 0);
    assert!(status.last_exit.is_none());
    assert_eq!(artifact_count(dir.path()), 0);
}

#[tokio::test]
async fn stop_idle_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));

    assert_ok!(runner.stop().await);
    assert_eq!(runner.status().revision, 0);
}

#[tokio::test]
async fn stop_running_clears_flag_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);
    assert_ok!(runner.start(false).await);

    let artifact = runner.status().artifact.expect("artifact while running");
    assert!(artifact.exists());

    assert_ok!(runner.stop().await);
    // second stop while termination is in flight
    assert_ok!(runner.stop().await);

    let status = wait_idle(&runner).await;
    assert_eq!(status.state, RunState::Idle);
    assert!(!status.stopping);
    assert!(status.pid.is_none());
    assert!(status.artifact.is_none());
    assert_eq!(status.last_exit, Some(ExitKind::Signal(15)));
    assert_eq!(status.launches, 1);
    assert!(!artifact.exists());
    assert_eq!(artifact_count(dir.path()), 0);
}

#[tokio::test]
async fn stubborn_process_is_killed_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    let script = "trap '' TERM; echo armed; while :; do sleep 1; done";
    assert_ok!(runner.configure(sh(script), "").await);
    assert_ok!(runner.start(false).await);

    // make sure the trap is installed before signalling
    let mut output = runner.subscribe_output();
    tokio::time::timeout(TIMEOUT, async {
        while !runner.log().content().contains("armed") {
            let _ = output.recv().await;
        }
    })
    .await
    .expect("trap never armed");

    assert_ok!(runner.stop().await);
    let status = wait_idle(&runner).await;
    assert_eq!(status.last_exit, Some(ExitKind::Signal(9)));
}

#[tokio::test]
async fn abnormal_exit_is_logged_as_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("echo before; exit 3"), "").await);
    assert_ok!(runner.start(false).await);

    let status = wait_idle(&runner).await;
    assert_eq!(status.last_exit, Some(ExitKind::Code(3)));
    assert_eq!(status.abnormal_exits, 1);
    assert_eq!(
        runner.log().content(),
        format!("before\n{DIAGNOSTIC_PREFIX} process exited with code 3\n")
    );
    assert_eq!(artifact_count(dir.path()), 0);
}

#[tokio::test]
async fn clean_exit_adds_no_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("echo done"), "").await);
    assert_ok!(runner.start(false).await);

    let status = wait_idle(&runner).await;
    assert_eq!(status.last_exit, Some(ExitKind::Success));
    assert_eq!(status.abnormal_exits, 0);
    assert_eq!(runner.log().content(), "done\n");
}

#[tokio::test]
async fn launch_failure_is_reported_as_exit() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(
        runner
            .configure(DebugProfile::new("/nonexistent/engine-binary"), "")
            .await
    );

    assert_ok!(runner.start(false).await);

    let status = wait_idle(&runner).await;
    assert!(matches!(status.last_exit, Some(ExitKind::LaunchFailed(_))));
    assert_eq!(status.launches, 1);
    assert!(runner.log().content().contains("failed to launch process"));
    assert_eq!(artifact_count(dir.path()), 0);
}

#[tokio::test]
async fn artifact_failure_leaves_runner_idle() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let runner = Runner::spawn(options(&dir).with_artifact_dir(&missing));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);

    let err = assert_err!(runner.start(false).await);
    assert!(matches!(err, RunnerError::Artifact(_)));
    let status = runner.status();
    assert_eq!(status.state, RunState::Idle);
    assert_eq!(status.launches, 0);
    assert_eq!(status.revision, 0);

    // a pending delayed start is dropped as well
    assert_ok!(runner.start(true).await);
    let err = assert_err!(runner.start(false).await);
    assert!(matches!(err, RunnerError::Artifact(_)));
    assert_eq!(runner.state(), RunState::Idle);
    assert!(!runner.is_running());
    assert_eq!(runner.status().launches, 0);
}

#[tokio::test]
async fn configure_is_rejected_while_active() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);

    assert_ok!(runner.start(true).await);
    let err = assert_err!(runner.configure(sh("true"), "").await);
    assert!(matches!(err, RunnerError::Busy));

    assert_ok!(runner.start(false).await);
    let err = assert_err!(runner.configure(sh("true"), "").await);
    assert!(matches!(err, RunnerError::Busy));

    assert_ok!(runner.stop().await);
    wait_idle(&runner).await;
    assert_ok!(runner.configure(sh("true"), "").await);
}

#[tokio::test]
async fn artifact_carries_instruction_to_process() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    let profile = sh("cat \"$0\"").artifact_arg("{}");
    assert_ok!(runner.configure(profile, "coc \"Balmora\"").await);
    assert_ok!(runner.start(false).await);

    wait_idle(&runner).await;
    assert_eq!(runner.log().content(), "coc \"Balmora\"");
    assert_eq!(artifact_count(dir.path()), 0);
}

#[tokio::test]
async fn each_launch_gets_a_fresh_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir).keep_log());
    let profile = sh("echo \"$0\"").artifact_arg("{}");
    assert_ok!(runner.configure(profile, "x").await);

    assert_ok!(runner.start(false).await);
    wait_idle(&runner).await;
    assert_ok!(runner.start(false).await);
    wait_for(&runner, |s| s.launches == 2 && !s.running).await;

    let content = runner.log().content();
    let paths: Vec<&str> = content.lines().collect();
    assert_eq!(paths.len(), 2);
    assert_ne!(paths[0], paths[1]);
}

#[tokio::test]
async fn log_is_cleared_on_launch_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("printf run"), "").await);

    assert_ok!(runner.start(false).await);
    wait_idle(&runner).await;
    assert_ok!(runner.start(true).await);
    assert_eq!(runner.log().content(), "run");

    assert_ok!(runner.start(false).await);
    wait_for(&runner, |s| s.launches == 2 && !s.running).await;
    assert_eq!(runner.log().content(), "run");
}

#[tokio::test]
async fn keep_log_accumulates_runs() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir).keep_log());
    assert_ok!(runner.configure(sh("printf run"), "").await);

    assert_ok!(runner.start(false).await);
    wait_idle(&runner).await;
    assert_ok!(runner.start(false).await);
    wait_for(&runner, |s| s.launches == 2 && !s.running).await;

    assert_eq!(runner.log().content(), "runrun");
}

#[tokio::test]
async fn every_transition_is_notified() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);
    let mut changes = runner.subscribe();

    assert_ok!(runner.start(true).await);
    assert!(changes.has_changed().unwrap());
    assert_eq!(
        changes.borrow_and_update().state,
        RunState::PendingDelayedStart
    );

    assert_ok!(runner.stop().await);
    assert!(changes.has_changed().unwrap());
    assert_eq!(changes.borrow_and_update().state, RunState::Idle);
    assert_eq!(runner.status().revision, 2);
}

#[tokio::test]
async fn shutdown_terminates_process_and_removes_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);
    assert_ok!(runner.start(false).await);

    let status = runner.status();
    let artifact = status.artifact.clone().unwrap();
    let watcher = runner.clone();

    runner.shutdown().await;

    assert!(!artifact.exists());
    assert_eq!(artifact_count(dir.path()), 0);
    let err = assert_err!(watcher.start(false).await);
    assert!(matches!(err, RunnerError::Closed));
}
