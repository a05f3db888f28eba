//! Poll-until-terminal engine.
//!
//! Repeatedly probes, classifies the captured result, and either stops on a
//! terminal verdict or sleeps per the retry policy and probes again. The
//! loop exits through exactly one of `Succeeded`, `FailedPermanently` or
//! `TimedOut`; both budgets (attempt count and wall-clock deadline) are
//! checked on every attempt.

use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::core::backoff::RetryPolicy;
use crate::core::budget::{clamp_to_deadline, deadline_passed};
use crate::core::classifier::{RuleSet, classify};
use crate::core::types::{
    ClassificationOutcome, CommandInvocation, CommandResult, CommandStatus, PollPhase, PollState,
    TimeoutCause,
};
use crate::error::PollError;
use crate::io::clock::Clock;
use crate::io::process::CommandRunner;

/// One observation of the operation being polled.
pub trait Probe {
    /// Produce a fresh result for `attempt` (1-based).
    fn probe(&mut self, attempt: u32) -> Result<CommandResult, PollError>;
}

/// Probe that runs a freshly built invocation on each attempt.
pub struct CommandProbe<'a, R: ?Sized, F> {
    runner: &'a R,
    factory: F,
}

impl<'a, R, F> CommandProbe<'a, R, F>
where
    R: CommandRunner + ?Sized,
    F: FnMut(u32) -> CommandInvocation,
{
    pub fn new(runner: &'a R, factory: F) -> Self {
        Self { runner, factory }
    }
}

impl<R, F> Probe for CommandProbe<'_, R, F>
where
    R: CommandRunner + ?Sized,
    F: FnMut(u32) -> CommandInvocation,
{
    fn probe(&mut self, attempt: u32) -> Result<CommandResult, PollError> {
        let invocation = (self.factory)(attempt);
        debug!(attempt, command = %invocation.display_line(), "running command");
        self.runner.run(&invocation)
    }
}

/// What to poll and within which budget.
#[derive(Debug, Clone, Copy)]
pub struct PollRequest<'a> {
    /// Label used in logs and error messages.
    pub operation: &'a str,
    pub rules: &'a RuleSet,
    pub policy: &'a RetryPolicy,
    /// Wall-clock limit across all attempts.
    pub deadline: Option<Instant>,
}

/// Terminal state of one poll, with the last result kept for diagnostics.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub operation: String,
    pub phase: PollPhase,
    pub attempts: u32,
    pub elapsed: Duration,
    pub timeout_cause: Option<TimeoutCause>,
    pub last_outcome: ClassificationOutcome,
    pub last_result: CommandResult,
}

impl PollReport {
    pub fn succeeded(&self) -> bool {
        self.phase == PollPhase::Succeeded
    }

    /// Turn the two failure states into distinct errors.
    pub fn into_result(self) -> Result<PollReport, PollError> {
        let output = self.last_result.combined_output();
        let phase = self.phase;
        match phase {
            PollPhase::Succeeded => Ok(self),
            PollPhase::FailedPermanently if self.last_result.status == CommandStatus::TimedOut => {
                Err(PollError::CommandTimeout {
                    operation: self.operation,
                    timeout: self.last_result.duration,
                    output,
                })
            }
            PollPhase::FailedPermanently => {
                let reason = match self.last_outcome {
                    ClassificationOutcome::PermanentFailure(reason) => reason,
                    other => format!("{other:?}"),
                };
                Err(PollError::PermanentFailure {
                    operation: self.operation,
                    reason,
                    output,
                })
            }
            PollPhase::TimedOut | PollPhase::Polling => Err(PollError::PollTimeout {
                operation: self.operation,
                attempts: self.attempts,
                elapsed: self.elapsed,
                cause: self
                    .timeout_cause
                    .unwrap_or(TimeoutCause::AttemptsExhausted),
                output,
            }),
        }
    }
}

/// Drive `probe` until a terminal state.
///
/// Returns `Err` only for harness failures (launch errors, invalid backoff
/// input); platform outcomes, including failure and timeout, come back in
/// the report. At least one attempt is always made.
#[instrument(skip_all, fields(operation = request.operation, max_attempts = request.policy.max_attempts))]
pub fn poll_until_terminal<P, C>(
    request: &PollRequest<'_>,
    probe: &mut P,
    clock: &C,
) -> Result<PollReport, PollError>
where
    P: Probe + ?Sized,
    C: Clock + ?Sized,
{
    let started = clock.now();
    let budget = request.policy.attempt_budget();
    let mut state = PollState::new();

    loop {
        let result = probe.probe(state.attempt)?;
        let outcome = classify(&result, request.rules);
        state.elapsed = clock.now().saturating_duration_since(started);
        state.last_outcome = Some(outcome.clone());

        let phase = match &outcome {
            ClassificationOutcome::Success => PollPhase::Succeeded,
            ClassificationOutcome::PermanentFailure(_) => PollPhase::FailedPermanently,
            ClassificationOutcome::Pending | ClassificationOutcome::TransientFailure(_) => {
                PollPhase::Polling
            }
        };
        if phase.is_terminal() {
            if phase == PollPhase::Succeeded {
                info!(attempt = state.attempt, "operation succeeded");
            } else {
                warn!(attempt = state.attempt, outcome = ?outcome, "operation failed permanently");
            }
            return Ok(finish(request, state, phase, None, result));
        }

        if state.attempt >= budget {
            warn!(attempt = state.attempt, "attempt budget exhausted");
            return Ok(finish(
                request,
                state,
                PollPhase::TimedOut,
                Some(TimeoutCause::AttemptsExhausted),
                result,
            ));
        }
        if deadline_passed(request.deadline, clock.now()) {
            warn!(attempt = state.attempt, "poll deadline exceeded");
            return Ok(finish(
                request,
                state,
                PollPhase::TimedOut,
                Some(TimeoutCause::DeadlineExceeded),
                result,
            ));
        }

        let wait = request.policy.wait_for(state.attempt)?;
        let wait = clamp_to_deadline(wait, request.deadline, clock.now());
        match &outcome {
            ClassificationOutcome::TransientFailure(reason) => warn!(
                attempt = state.attempt,
                reason = %reason,
                wait_ms = wait.as_millis() as u64,
                "transient failure, retrying"
            ),
            _ => debug!(
                attempt = state.attempt,
                wait_ms = wait.as_millis() as u64,
                "still pending"
            ),
        }
        clock.sleep(wait);

        if deadline_passed(request.deadline, clock.now()) {
            state.elapsed = clock.now().saturating_duration_since(started);
            warn!(attempt = state.attempt, "poll deadline exceeded during backoff");
            return Ok(finish(
                request,
                state,
                PollPhase::TimedOut,
                Some(TimeoutCause::DeadlineExceeded),
                result,
            ));
        }
        state.attempt += 1;
    }
}

/// Poll a CLI command built fresh for each attempt.
pub fn poll_command<R, C, F>(
    request: &PollRequest<'_>,
    runner: &R,
    clock: &C,
    factory: F,
) -> Result<PollReport, PollError>
where
    R: CommandRunner + ?Sized,
    C: Clock + ?Sized,
    F: FnMut(u32) -> CommandInvocation,
{
    let mut probe = CommandProbe::new(runner, factory);
    poll_until_terminal(request, &mut probe, clock)
}

fn finish(
    request: &PollRequest<'_>,
    state: PollState,
    phase: PollPhase,
    timeout_cause: Option<TimeoutCause>,
    last_result: CommandResult,
) -> PollReport {
    PollReport {
        operation: request.operation.to_string(),
        phase,
        attempts: state.attempt,
        elapsed: state.elapsed,
        timeout_cause,
        last_outcome: state
            .last_outcome
            .unwrap_or(ClassificationOutcome::Pending),
        last_result,
    }
}
