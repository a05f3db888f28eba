//! Test-only doubles for the command runner, the HTTP transport and the clock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::types::{CommandInvocation, CommandResult};
use crate::error::PollError;
use crate::io::app::{HttpRequest, HttpTransport};
use crate::io::clock::Clock;
use crate::io::process::CommandRunner;

enum Script {
    Queue {
        results: VecDeque<CommandResult>,
        then: Option<CommandResult>,
    },
    LaunchFailure(String),
    Responder(ResponseFn<CommandInvocation>),
}

/// Runner that replays queued results instead of spawning processes.
pub struct ScriptedRunner {
    script: Mutex<Script>,
    invocations: Mutex<Vec<CommandInvocation>>,
}

impl ScriptedRunner {
    /// Replay `results` in order; running past the end panics.
    pub fn new(results: Vec<CommandResult>) -> Self {
        Self::from_script(Script::Queue {
            results: results.into(),
            then: None,
        })
    }

    /// Return `result` on every call.
    pub fn repeating(result: CommandResult) -> Self {
        Self::from_script(Script::Queue {
            results: VecDeque::new(),
            then: Some(result),
        })
    }

    /// Replay `results`, then keep returning `then`.
    pub fn then_repeat(results: Vec<CommandResult>, then: CommandResult) -> Self {
        Self::from_script(Script::Queue {
            results: results.into(),
            then: Some(then),
        })
    }

    /// Every call fails as if `program` were missing.
    pub fn failing_launch(program: &str) -> Self {
        Self::from_script(Script::LaunchFailure(program.to_string()))
    }

    /// Answer each call with `respond`, for flows too long to script in order.
    pub fn responding(
        respond: impl FnMut(&CommandInvocation) -> CommandResult + Send + 'static,
    ) -> Self {
        Self::from_script(Script::Responder(Box::new(respond)))
    }

    fn from_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.invocations.lock().expect("invocations lock").len()
    }

    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.lock().expect("invocations lock").clone()
    }

    /// Argument lists of every call, for asserting on CLI usage.
    pub fn arg_lines(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|inv| inv.args.join(" "))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &CommandInvocation) -> Result<CommandResult, PollError> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(invocation.clone());
        let mut script = self.script.lock().expect("script lock");
        match &mut *script {
            Script::Queue { results, then } => match results.pop_front() {
                Some(result) => Ok(result),
                None => Ok(then
                    .clone()
                    .unwrap_or_else(|| panic!("no scripted result for `{}`", invocation.display_line()))),
            },
            Script::LaunchFailure(program) => Err(PollError::ProcessLaunch {
                program: program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            Script::Responder(respond) => Ok(respond(invocation)),
        }
    }
}

type ResponseFn<T> = Box<dyn FnMut(&T) -> CommandResult + Send>;

/// HTTP transport that replays queued results and records every request.
pub struct ScriptedTransport {
    results: Mutex<VecDeque<CommandResult>>,
    respond: Option<Mutex<ResponseFn<HttpRequest>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(results: Vec<CommandResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            respond: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(result: CommandResult) -> Self {
        Self::responding(move |_| result.clone())
    }

    pub fn responding(
        respond: impl FnMut(&HttpRequest) -> CommandResult + Send + 'static,
    ) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            respond: Some(Mutex::new(Box::new(respond))),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> CommandResult {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if let Some(result) = self.results.lock().expect("results lock").pop_front() {
            return result;
        }
        match &self.respond {
            Some(respond) => {
                let mut respond = respond.lock().expect("responder lock");
                (*respond)(request)
            }
            None => panic!("no scripted response for {}", request.url),
        }
    }
}

/// Clock whose time only moves when something sleeps on it.
pub struct FakeClock {
    base: Instant,
    state: Mutex<FakeClockState>,
}

#[derive(Default)]
struct FakeClockState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            state: Mutex::new(FakeClockState::default()),
        }
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().expect("clock lock").sleeps.clone()
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.state.lock().expect("clock lock").offset += by;
    }

    pub fn start(&self) -> Instant {
        self.base
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.state.lock().expect("clock lock").offset
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().expect("clock lock");
        state.offset += duration;
        state.sleeps.push(duration);
    }
}

/// `cf`-style output with exit 0.
pub fn ok(stdout: &str) -> CommandResult {
    CommandResult::exited(0, stdout)
}

/// `cf`-style failure with the given exit code.
pub fn failed(code: i32, stdout: &str) -> CommandResult {
    CommandResult::exited(code, stdout)
}
