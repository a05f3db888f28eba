//! End-to-end scenarios for the poll engine with scripted commands and a fake clock.

use std::time::Duration;

use smoke::core::backoff::{Backoff, RetryPolicy};
use smoke::core::rules;
use smoke::core::types::{CommandInvocation, PollPhase, TimeoutCause};
use smoke::error::PollError;
use smoke::io::clock::Clock;
use smoke::poll::{PollRequest, poll_command};
use smoke::test_support::{FakeClock, ScriptedRunner, failed, ok};

fn service_query(_: u32) -> CommandInvocation {
    CommandInvocation::new("cf", ["service", "redis-1"])
}

#[test]
fn succeeds_on_third_attempt_after_two_sleeps() {
    let runner = ScriptedRunner::new(vec![
        ok("status: create in progress"),
        ok("status: create in progress"),
        ok("status: create succeeded"),
    ]);
    let clock = FakeClock::new();
    let rules = rules::await_service_creation();
    let policy = RetryPolicy::new(Duration::from_millis(1000), 3, Backoff::None);
    let request = PollRequest {
        operation: "await service creation",
        rules: &rules,
        policy: &policy,
        deadline: None,
    };

    let report = poll_command(&request, &runner, &clock, service_query).expect("poll");

    assert_eq!(report.phase, PollPhase::Succeeded);
    assert_eq!(report.attempts, 3);
    assert_eq!(runner.calls(), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(1000), Duration::from_millis(1000)]
    );
}

#[test]
fn pending_forever_times_out_on_attempts() {
    let runner = ScriptedRunner::repeating(ok("status: create in progress"));
    let clock = FakeClock::new();
    let rules = rules::await_service_creation();
    let policy = RetryPolicy::new(Duration::from_millis(500), 2, Backoff::None);
    let request = PollRequest {
        operation: "await service creation",
        rules: &rules,
        policy: &policy,
        deadline: None,
    };

    let report = poll_command(&request, &runner, &clock, service_query).expect("poll");

    assert_eq!(report.phase, PollPhase::TimedOut);
    assert_eq!(report.timeout_cause, Some(TimeoutCause::AttemptsExhausted));
    assert_eq!(runner.calls(), 2);
    match report.into_result() {
        Err(PollError::PollTimeout { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected poll timeout, got {other:?}"),
    }
}

#[test]
fn failure_marker_stops_immediately_without_sleeping() {
    let runner = ScriptedRunner::new(vec![failed(1, "status: create failed")]);
    let clock = FakeClock::new();
    let rules = rules::await_service_creation();
    let policy = RetryPolicy::new(Duration::from_millis(1000), 5, Backoff::Linear);
    let request = PollRequest {
        operation: "await service creation",
        rules: &rules,
        policy: &policy,
        deadline: None,
    };

    let report = poll_command(&request, &runner, &clock, service_query).expect("poll");

    assert_eq!(report.phase, PollPhase::FailedPermanently);
    assert_eq!(runner.calls(), 1);
    assert!(clock.sleeps().is_empty());
    assert!(matches!(
        report.into_result(),
        Err(PollError::PermanentFailure { .. })
    ));
}

#[test]
fn deadline_ends_poll_before_attempts_run_out() {
    let runner = ScriptedRunner::repeating(ok("status: create in progress"));
    let clock = FakeClock::new();
    let rules = rules::await_service_creation();
    let policy = RetryPolicy::new(Duration::from_secs(1), 100, Backoff::None);
    let request = PollRequest {
        operation: "await service creation",
        rules: &rules,
        policy: &policy,
        deadline: Some(clock.now() + Duration::from_millis(2500)),
    };

    let report = poll_command(&request, &runner, &clock, service_query).expect("poll");

    assert_eq!(report.phase, PollPhase::TimedOut);
    assert_eq!(report.timeout_cause, Some(TimeoutCause::DeadlineExceeded));
    assert!(report.attempts < 100);
    assert_eq!(runner.calls(), 3);
    // The last wait is cut short so the poll never sleeps past the deadline.
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_millis(500)
        ]
    );
    assert_eq!(clock.now(), clock.start() + Duration::from_millis(2500));
}

#[test]
fn expired_deadline_still_makes_one_attempt() {
    let runner = ScriptedRunner::repeating(ok("status: create in progress"));
    let clock = FakeClock::new();
    let deadline = clock.now();
    clock.advance(Duration::from_secs(5));
    let rules = rules::await_service_creation();
    let policy = RetryPolicy::new(Duration::from_secs(1), 10, Backoff::None);
    let request = PollRequest {
        operation: "await service creation",
        rules: &rules,
        policy: &policy,
        deadline: Some(deadline),
    };

    let report = poll_command(&request, &runner, &clock, service_query).expect("poll");

    assert_eq!(runner.calls(), 1);
    assert_eq!(report.timeout_cause, Some(TimeoutCause::DeadlineExceeded));
}

#[test]
fn never_exceeds_max_attempts() {
    for max_attempts in 1..=8 {
        for backoff in [Backoff::None, Backoff::Linear, Backoff::Exponential] {
            let runner = ScriptedRunner::repeating(failed(1, "Server error, status code: 502"));
            let clock = FakeClock::new();
            let rules = rules::command_succeeds();
            let policy = RetryPolicy::new(Duration::from_millis(10), max_attempts, backoff);
            let request = PollRequest {
                operation: "cf bind-service",
                rules: &rules,
                policy: &policy,
                deadline: None,
            };
            let report = poll_command(&request, &runner, &clock, |_| {
                CommandInvocation::new("cf", ["bind-service", "app", "redis-1"])
            })
            .expect("poll");
            assert_eq!(runner.calls(), max_attempts as usize);
            assert_eq!(report.attempts, max_attempts);
            assert_eq!(clock.sleeps().len(), max_attempts as usize - 1);
        }
    }
}

#[test]
fn independent_polls_run_concurrently() {
    let rules = rules::await_service_creation();
    let policy = RetryPolicy::new(Duration::from_millis(5), 4, Backoff::None);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let rules = &rules;
                let policy = &policy;
                scope.spawn(move || {
                    let runner = ScriptedRunner::new(vec![
                        ok("status: create in progress"),
                        ok("status: create succeeded"),
                    ]);
                    let clock = FakeClock::new();
                    let instance = format!("redis-{i}");
                    let request = PollRequest {
                        operation: "await service creation",
                        rules,
                        policy,
                        deadline: None,
                    };
                    let report = poll_command(&request, &runner, &clock, |_| {
                        CommandInvocation::new("cf", ["service", instance.as_str()])
                    })
                    .expect("poll");
                    (report.attempts, runner.arg_lines())
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let (attempts, lines) = handle.join().expect("join");
            assert_eq!(attempts, 2);
            assert_eq!(lines, vec![format!("service redis-{i}"); 2]);
        }
    });
}
