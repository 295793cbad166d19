#![cfg(unix)]

mod common;

use cloudpipe::forwarder::Severity;
use cloudpipe::supervisor::{CommandSpec, FailureKind, RunError, Supervisor, SupervisorConfig};
use cloudpipe::tailer::TailerEnd;
use common::{RecordingForwarder, sh, supervisor, test_config};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn forwards_stdout_as_info_and_stderr_as_error() {
    let fwd = Arc::new(RecordingForwarder::default());

    let summary = supervisor(&fwd)
        .run(&sh("echo hello; echo oops >&2"))
        .await
        .unwrap();

    assert!(summary.status.success());
    assert_eq!(fwd.payloads(Severity::Info), vec!["hello"]);
    assert_eq!(fwd.payloads(Severity::Error), vec!["oops"]);
    assert_eq!(fwd.entries().len(), 2);
    assert_eq!(fwd.flushes(), 1);
    assert_eq!(summary.stdout.lines, 1);
    assert_eq!(summary.stderr.lines, 1);
    assert_eq!(summary.stdout.end, TailerEnd::Eof);
}

#[tokio::test]
async fn blank_line_becomes_single_space() {
    let fwd = Arc::new(RecordingForwarder::default());

    supervisor(&fwd).run(&sh("echo")).await.unwrap();

    assert_eq!(fwd.entries(), vec![(Severity::Info, " ".to_string())]);
}

#[tokio::test]
async fn terminated_lines_and_trailing_fragment_keep_their_order() {
    let fwd = Arc::new(RecordingForwarder::default());

    supervisor(&fwd).run(&sh(r"printf 'a\nb\n\nc'")).await.unwrap();

    assert_eq!(fwd.payloads(Severity::Info), vec!["a", "b", " ", "c"]);
}

#[tokio::test]
async fn order_within_each_stream_is_preserved() {
    let fwd = Arc::new(RecordingForwarder::default());
    let script = "for i in 1 2 3 4 5 6 7 8; do echo out$i; echo err$i >&2; done";

    supervisor(&fwd).run(&sh(script)).await.unwrap();

    let expected = |prefix: &str| (1..=8).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>();
    assert_eq!(fwd.payloads(Severity::Info), expected("out"));
    assert_eq!(fwd.payloads(Severity::Error), expected("err"));
}

#[tokio::test]
async fn failing_child_is_a_wait_error_after_a_successful_flush() {
    let fwd = Arc::new(RecordingForwarder::default());

    let err = supervisor(&fwd).run(&sh("exit 1")).await.unwrap_err();

    assert!(matches!(err, RunError::Wait { .. }), "{err:?}");
    assert_eq!(err.kind(), FailureKind::Wait);
    assert_eq!(err.exit_code(), 1);
    assert!(fwd.entries().is_empty());
    assert_eq!(fwd.flushes(), 1);
}

#[tokio::test]
async fn child_exit_code_is_kept() {
    let fwd = Arc::new(RecordingForwarder::default());

    let err = supervisor(&fwd).run(&sh("echo partial; exit 42")).await.unwrap_err();

    assert_eq!(err.exit_code(), 42);
    assert_eq!(fwd.payloads(Severity::Info), vec!["partial"]);
}

#[tokio::test]
async fn flush_failure_wins_over_child_status() {
    let fwd = Arc::new(RecordingForwarder::failing());

    let err = supervisor(&fwd).run(&sh("echo hello; exit 3")).await.unwrap_err();

    // A wait would have reported the child's status 3 instead.
    assert!(matches!(err, RunError::Flush(_)), "{err:?}");
    assert_eq!(err.exit_code(), 1);
    assert_eq!(fwd.flushes(), 1);
    assert_eq!(fwd.payloads(Severity::Info), vec!["hello"]);
}

#[tokio::test]
async fn invalid_executable_is_a_start_error_without_entries() {
    let fwd = Arc::new(RecordingForwarder::default());
    let command = CommandSpec::from_argv(vec!["/nonexistent/cloudpipe-missing-binary".into()]).unwrap();

    let err = supervisor(&fwd).run(&command).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Start);
    assert!(err.to_string().contains("/nonexistent/cloudpipe-missing-binary"));
    assert!(fwd.entries().is_empty());
    assert_eq!(fwd.flushes(), 0);
}

#[tokio::test]
async fn flush_happens_after_both_streams_are_drained() {
    let fwd = Arc::new(RecordingForwarder::default());
    let script = "i=0; while [ $i -lt 200 ]; do echo out$i; echo err$i >&2; i=$((i+1)); done";

    supervisor(&fwd).run(&sh(script)).await.unwrap();

    assert_eq!(fwd.entries().len(), 400);
    assert_eq!(fwd.entries_at_flush(), vec![400]);
}

#[tokio::test]
async fn long_lines_are_split_into_several_entries() {
    let fwd = Arc::new(RecordingForwarder::default());
    let config = SupervisorConfig {
        max_line_bytes: 4,
        ..test_config()
    };

    Supervisor::new(fwd.clone(), config, CancellationToken::new())
        .run(&sh("echo abcdefghij"))
        .await
        .unwrap();

    assert_eq!(fwd.payloads(Severity::Info), vec!["abcd", "efgh", "ij"]);
}

#[tokio::test]
async fn cancellation_kills_the_child() {
    let fwd = Arc::new(RecordingForwarder::default());
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(fwd.clone(), test_config(), cancel.clone());

    let started = Instant::now();
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let err = supervisor.run(&sh("echo started; exec sleep 30")).await.unwrap_err();
    trigger.await.unwrap();

    assert!(matches!(err, RunError::Wait { .. }), "{err:?}");
    assert_eq!(err.exit_code(), 128 + 9);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(fwd.payloads(Severity::Info), vec!["started"]);
    assert_eq!(fwd.flushes(), 1);
}

#[tokio::test]
async fn timeout_kills_the_child() {
    let fwd = Arc::new(RecordingForwarder::default());
    let config = SupervisorConfig {
        timeout: Some(Duration::from_millis(300)),
        ..test_config()
    };

    let err = Supervisor::new(fwd.clone(), config, CancellationToken::new())
        .run(&sh("exec sleep 30"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Wait);
    assert_eq!(err.exit_code(), 137);
}

#[tokio::test]
async fn tailers_are_stopped_when_a_grandchild_keeps_the_pipes_open() {
    let fwd = Arc::new(RecordingForwarder::default());
    let config = SupervisorConfig {
        timeout: Some(Duration::from_millis(300)),
        ..test_config()
    };

    // The shell exits right away; the background sleep inherits both pipes.
    let summary = Supervisor::new(fwd.clone(), config, CancellationToken::new())
        .run(&sh("sleep 5 & echo detached"))
        .await
        .unwrap();

    assert!(summary.status.success());
    assert_eq!(summary.stdout.end, TailerEnd::Stopped);
    assert_eq!(summary.stderr.end, TailerEnd::Stopped);
    assert_eq!(fwd.payloads(Severity::Info), vec!["detached"]);
    assert!(summary.elapsed < Duration::from_secs(4));
}

#[tokio::test]
async fn unrepresentable_timeout_means_no_timeout() {
    let fwd = Arc::new(RecordingForwarder::default());
    let config = SupervisorConfig {
        timeout: Some(Duration::MAX),
        ..test_config()
    };

    let summary = Supervisor::new(fwd.clone(), config, CancellationToken::new())
        .run(&sh("echo ok"))
        .await
        .unwrap();

    assert!(summary.status.success());
    assert_eq!(fwd.payloads(Severity::Info), vec!["ok"]);
}
