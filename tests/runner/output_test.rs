//! Output capture tests.

use engine_runner::runner::Runner;
use tokio::sync::broadcast::error::RecvError;
use tokio_test::assert_ok;

use crate::support::{options, sh, wait_idle};

#[tokio::test]
async fn chunks_arrive_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("printf foo; sleep 0.2; printf bar"), "").await);
    let mut output = runner.subscribe_output();

    assert_ok!(runner.start(false).await);
    wait_idle(&runner).await;

    assert_eq!(runner.log().content(), "foobar");
    assert_eq!(runner.log().len(), 6);

    let mut streamed = String::new();
    loop {
        match output.try_recv() {
            Ok(chunk) => streamed.push_str(&chunk),
            Err(_) => break,
        }
    }
    assert_eq!(streamed, "foobar");
}

#[tokio::test]
async fn stderr_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("echo oops >&2"), "").await);

    assert_ok!(runner.start(false).await);
    wait_idle(&runner).await;

    assert_eq!(runner.log().content(), "oops\n");
}

#[tokio::test]
async fn multibyte_character_split_across_reads() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(
        runner
            .configure(sh("printf '\\303'; sleep 0.2; printf '\\251'"), "")
            .await
    );

    assert_ok!(runner.start(false).await);
    wait_idle(&runner).await;

    assert_eq!(runner.log().content(), "é");
}

#[tokio::test]
async fn large_output_is_complete() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("yes line | head -n 5000"), "").await);

    assert_ok!(runner.start(false).await);
    wait_idle(&runner).await;

    let content = runner.log().content();
    assert_eq!(content.len(), 5000 * "line\n".len());
    assert!(content.lines().all(|l| l == "line"));
}

#[tokio::test]
async fn output_is_readable_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::spawn(options(&dir));
    assert_ok!(runner.configure(sh("echo ready; exec sleep 30"), "").await);
    let mut output = runner.subscribe_output();

    assert_ok!(runner.start(false).await);
    let chunk = tokio::time::timeout(crate::support::TIMEOUT, output.recv())
        .await
        .expect("no output");
    assert!(!matches!(chunk, Err(RecvError::Closed)));
    assert_eq!(runner.log().content(), "ready\n");
    assert!(runner.is_running());

    assert_ok!(runner.stop().await);
    wait_idle(&runner).await;
}
