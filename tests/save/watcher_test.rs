//! Save-gated start tests against real processes.

use engine_runner::runner::{RunState, Runner};
use engine_runner::save::{OperationKind, SaveOperation, SaveWatcher, WatchOutcome};
use tokio_test::assert_ok;

use crate::support::{artifact_count, options, sh, wait_for, wait_idle, TIMEOUT};

async fn outcome(watcher: SaveWatcher) -> WatchOutcome {
    tokio::time::timeout(TIMEOUT, watcher.finished())
        .await
        .expect("watcher never finished")
}

#[tokio::test]
async fn successful_save_launches_pending_run() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);
    assert_ok!(runner.start(true).await);

    let operation = SaveOperation::new(OperationKind::Save);
    let watcher = SaveWatcher::attach(&runner, &operation);
    assert_eq!(operation.complete(false), 1);

    assert!(matches!(outcome(watcher).await, WatchOutcome::Started(c) if !c.failed));
    let status = runner.status();
    assert_eq!(status.state, RunState::Running);
    assert!(status.process_alive());
    assert_eq!(status.launches, 1);
    assert_eq!(artifact_count(dir.path()), 1);

    assert_ok!(runner.stop().await);
    wait_idle(&runner).await;
}

#[tokio::test]
async fn failed_save_cancels_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);
    assert_ok!(runner.start(true).await);

    let operation = SaveOperation::new(OperationKind::Merge);
    let watcher = SaveWatcher::attach(&runner, &operation);
    operation.complete(true);

    assert!(matches!(
        outcome(watcher).await,
        WatchOutcome::Stopped(c) if c.kind == OperationKind::Merge
    ));
    let status = runner.status();
    assert_eq!(status.state, RunState::Idle);
    assert!(!status.running);
    assert_eq!(status.launches, 0);
    assert_eq!(artifact_count(dir.path()), 0);
}

#[tokio::test]
async fn only_first_notification_is_acted_on() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);
    assert_ok!(runner.start(true).await);

    let operation = SaveOperation::new(OperationKind::Save);
    let watcher = SaveWatcher::attach(&runner, &operation);
    operation.complete(false);
    operation.complete(false);

    assert!(matches!(outcome(watcher).await, WatchOutcome::Started(_)));
    assert_eq!(runner.status().launches, 1);
    assert_eq!(operation.subscriber_count(), 0);

    assert_ok!(runner.stop().await);
    wait_idle(&runner).await;

    // no subscriber left to restart the runner
    assert_eq!(operation.complete(false), 0);
    assert_eq!(runner.state(), RunState::Idle);
    assert_eq!(runner.status().launches, 1);
}

#[tokio::test]
async fn failed_save_stops_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);
    assert_ok!(runner.start(false).await);

    let operation = SaveOperation::new(OperationKind::Save);
    let watcher = SaveWatcher::attach(&runner, &operation);
    operation.complete(true);

    assert!(matches!(outcome(watcher).await, WatchOutcome::Stopped(_)));
    let status = wait_idle(&runner).await;
    assert!(status.last_exit.is_some());
    assert_eq!(artifact_count(dir.path()), 0);
}

#[tokio::test]
async fn successful_save_launches_from_idle() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("echo launched"), "").await);

    let operation = SaveOperation::new(OperationKind::Verify);
    let watcher = SaveWatcher::attach(&runner, &operation);
    operation.complete(false);

    assert!(matches!(outcome(watcher).await, WatchOutcome::Started(_)));
    let status = wait_for(&runner, |s| s.launches == 1 && !s.running).await;
    assert_eq!(status.state, RunState::Idle);
    assert_eq!(runner.log().content(), "launched\n");
}

#[tokio::test]
async fn each_watcher_reacts_independently() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("exec sleep 30"), "").await);
    assert_ok!(runner.start(true).await);

    let operation = SaveOperation::new(OperationKind::Save);
    let first = SaveWatcher::attach(&runner, &operation);
    let second = SaveWatcher::attach(&runner, &operation);
    assert_eq!(operation.complete(false), 2);

    assert!(matches!(outcome(first).await, WatchOutcome::Started(_)));
    assert!(matches!(outcome(second).await, WatchOutcome::Started(_)));
    assert_eq!(runner.status().launches, 1);

    assert_ok!(runner.stop().await);
    wait_idle(&runner).await;
}
