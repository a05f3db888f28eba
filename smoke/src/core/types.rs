//! Shared deterministic types for the polling core.
//!
//! These types define stable contracts between the command runner, the
//! classifier and the poll engine. They carry no I/O handles.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One external command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Overrides the runner's default per-call timeout.
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Render as a shell-like line for logs.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// The process exited on its own. Signal terminations are reported as `-1`.
    Exited(i32),
    /// The runner killed the process after its timeout elapsed.
    TimedOut,
}

impl CommandStatus {
    pub fn success(self) -> bool {
        self == CommandStatus::Exited(0)
    }

    pub fn code(self) -> Option<i32> {
        match self {
            CommandStatus::Exited(code) => Some(code),
            CommandStatus::TimedOut => None,
        }
    }
}

/// Captured outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

impl CommandResult {
    pub fn exited(code: i32, stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: CommandStatus::Exited(code),
            stdout: stdout.into(),
            stderr: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: CommandStatus::TimedOut,
            stdout: Vec::new(),
            stderr: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Stdout followed by stderr, lossily decoded. This is the text the classifier scans.
    pub fn combined_output(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Verdict for a single captured result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Success,
    TransientFailure(String),
    PermanentFailure(String),
    /// Still in progress; no terminal marker seen yet.
    Pending,
}

impl ClassificationOutcome {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClassificationOutcome::Pending | ClassificationOutcome::TransientFailure(_)
        )
    }
}

/// Terminal state of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Polling,
    Succeeded,
    FailedPermanently,
    TimedOut,
}

impl PollPhase {
    pub fn is_terminal(self) -> bool {
        self != PollPhase::Polling
    }
}

/// Which budget ran out when a poll timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutCause {
    AttemptsExhausted,
    DeadlineExceeded,
}

impl fmt::Display for TimeoutCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutCause::AttemptsExhausted => write!(f, "attempts exhausted"),
            TimeoutCause::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Per-loop bookkeeping, owned by exactly one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    /// 1-indexed number of the attempt in flight (or last made).
    pub attempt: u32,
    pub elapsed: Duration,
    pub last_outcome: Option<ClassificationOutcome>,
}

impl PollState {
    pub fn new() -> Self {
        Self {
            attempt: 1,
            elapsed: Duration::ZERO,
            last_outcome: None,
        }
    }
}

impl Default for PollState {
    fn default() -> Self {
        Self::new()
    }
}
