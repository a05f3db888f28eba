//! Typed failures surfaced by the command runner and the poll engine.
//!
//! Orchestration code (CF wrapper, app client, suite) wraps these in
//! `anyhow::Error` with context; callers that need to tell a permanent
//! rejection from an unfinished operation can downcast back to [`PollError`].

use std::time::Duration;

use thiserror::Error;

use crate::core::types::TimeoutCause;

#[derive(Debug, Error)]
pub enum PollError {
    /// The external program could not be started at all.
    #[error("failed to launch `{program}`: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program started but waiting on it or killing it failed.
    #[error("i/o error while running `{program}`: {source}")]
    ProcessIo {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A single invocation exceeded its timeout and the operation treats that as fatal.
    #[error("{operation}: command timed out after {timeout:?}\n{output}")]
    CommandTimeout {
        operation: String,
        timeout: Duration,
        output: String,
    },

    /// The platform rejected the operation.
    #[error("{operation} failed: {reason}\n{output}")]
    PermanentFailure {
        operation: String,
        reason: String,
        output: String,
    },

    /// The operation never reached a terminal state within its budget.
    #[error("{operation} did not finish: {cause} after {attempts} attempt(s) in {elapsed:?}\n{output}")]
    PollTimeout {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        cause: TimeoutCause,
        output: String,
    },

    /// Backoff was asked for the wait before attempt zero.
    #[error("invalid attempt number {0} (attempts start at 1)")]
    InvalidAttempt(u32),
}

impl PollError {
    /// Whether the failure came from the platform rather than from the harness itself.
    pub fn is_platform_failure(&self) -> bool {
        matches!(
            self,
            PollError::PermanentFailure { .. }
                | PollError::PollTimeout { .. }
                | PollError::CommandTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_timeout_message_names_the_exhausted_budget() {
        let err = PollError::PollTimeout {
            operation: "await service creation".to_string(),
            attempts: 2,
            elapsed: Duration::from_secs(10),
            cause: TimeoutCause::AttemptsExhausted,
            output: "in progress".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("await service creation did not finish"));
        assert!(msg.contains("attempts exhausted"));
        assert!(msg.contains("in progress"));
    }

    #[test]
    fn launch_errors_are_not_platform_failures() {
        let err = PollError::ProcessLaunch {
            program: "cf".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(!err.is_platform_failure());
        assert!(
            PollError::PermanentFailure {
                operation: "create".to_string(),
                reason: "failed".to_string(),
                output: String::new(),
            }
            .is_platform_failure()
        );
    }
}
