//! `ProcessRunner` against real child processes.

#![cfg(unix)]

use std::time::{Duration, Instant};

use smoke::core::types::{CommandInvocation, CommandStatus};
use smoke::error::PollError;
use smoke::io::process::{CommandRunner, ProcessRunner};

fn sh(script: &str) -> CommandInvocation {
    CommandInvocation::new("sh", ["-c", script])
}

#[test]
fn captures_stdout_stderr_and_exit_code() {
    let runner = ProcessRunner::default();
    let result = runner
        .run(&sh("echo 'status: create succeeded'; echo oops >&2; exit 3"))
        .expect("run");
    assert_eq!(result.status, CommandStatus::Exited(3));
    assert_eq!(result.stdout_text(), "status: create succeeded\n");
    assert_eq!(result.stderr, b"oops\n");
    assert!(result.combined_output().contains("oops"));
}

#[test]
fn timeout_kills_child_and_is_distinct_from_exit() {
    let runner = ProcessRunner::default();
    let result = runner
        .run(&sh("exec sleep 5").with_timeout(Duration::from_millis(200)))
        .expect("run");
    assert_eq!(result.status, CommandStatus::TimedOut);
    assert_eq!(result.status.code(), None);
    assert!(result.duration < Duration::from_secs(4));
}

#[test]
fn timeout_holds_when_a_descendant_keeps_the_pipes_open() {
    let runner = ProcessRunner::default();
    let started = Instant::now();
    let result = runner
        .run(&sh("echo staging; sleep 6; echo done").with_timeout(Duration::from_millis(200)))
        .expect("run");
    assert_eq!(result.status, CommandStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(result.duration < Duration::from_secs(3));
    assert_eq!(result.stdout_text(), "staging\n");
}

#[test]
fn clean_exit_does_not_wait_out_background_children() {
    let runner = ProcessRunner::default();
    let started = Instant::now();
    let result = runner
        .run(&sh("sleep 6 & echo pushed").with_timeout(Duration::from_secs(1)))
        .expect("run");
    assert_eq!(result.status, CommandStatus::Exited(0));
    assert_eq!(result.stdout_text(), "pushed\n");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn missing_binary_is_a_launch_error() {
    let runner = ProcessRunner::default();
    let err = runner
        .run(&CommandInvocation::new("definitely-not-a-cf-binary", ["api"]))
        .unwrap_err();
    assert!(matches!(err, PollError::ProcessLaunch { .. }));
    assert!(!err.is_platform_failure());
}

#[test]
fn output_is_truncated_at_limit() {
    let runner = ProcessRunner {
        output_limit_bytes: 16,
        ..ProcessRunner::default()
    };
    let result = runner.run(&sh("printf '%0100d' 0")).expect("run");
    assert!(result.status.success());
    assert_eq!(result.stdout.len(), 16);
}
