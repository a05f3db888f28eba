//! Running external commands with timeouts and bounded output.

use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::{CommandInvocation, CommandResult, CommandStatus};
use crate::error::PollError;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Executes one invocation and captures its result.
///
/// Implementations must not share mutable state between calls; the poll
/// engine may drive several runners from different threads.
pub trait CommandRunner {
    fn run(&self, invocation: &CommandInvocation) -> Result<CommandResult, PollError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, invocation: &CommandInvocation) -> Result<CommandResult, PollError> {
        (**self).run(invocation)
    }
}

/// Spawns real child processes, inheriting the host environment.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub default_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %invocation.program))]
    fn run(&self, invocation: &CommandInvocation) -> Result<CommandResult, PollError> {
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        run_command_with_timeout(cmd, &invocation.program, timeout, self.output_limit_bytes)
    }
}

/// How long the output readers may keep draining once the child is gone.
///
/// A killed `cf` can leave descendants that still hold the pipes open; their
/// output is not waited for past this grace.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Run `cmd` with a hard `timeout`, capturing at most `output_limit_bytes` of
/// each stream.
///
/// The call returns within `timeout` plus [`OUTPUT_DRAIN_GRACE`] even when the
/// child's own children outlive it: whatever output arrived by then is kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandResult, PollError> {
    let io_err = |source: std::io::Error| PollError::ProcessIo {
        program: program.to_string(),
        source,
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| {
        error!(err = %source, "failed to launch command");
        PollError::ProcessLaunch {
            program: program.to_string(),
            source,
        }
    })?;
    debug!(pid = child.id(), "command launched");

    let stdout = child
        .stdout
        .take()
        .map(|pipe| Capture::start(pipe, output_limit_bytes))
        .ok_or_else(|| io_err(std::io::Error::other("stdout was not piped")))?;
    let stderr = child
        .stderr
        .take()
        .map(|pipe| Capture::start(pipe, output_limit_bytes))
        .ok_or_else(|| io_err(std::io::Error::other("stderr was not piped")))?;

    let (status, drain_until) = match child.wait_timeout(timeout).map_err(io_err)? {
        Some(exit) => {
            // Background descendants may keep the pipes open after a clean exit.
            let rest = timeout.saturating_sub(started.elapsed());
            (
                CommandStatus::Exited(exit.code().unwrap_or(-1)),
                Instant::now().checked_add(rest.saturating_add(OUTPUT_DRAIN_GRACE)),
            )
        }
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command exceeded its timeout, killing"
            );
            child.kill().map_err(io_err)?;
            child.wait().map_err(io_err)?;
            (
                CommandStatus::TimedOut,
                Instant::now().checked_add(OUTPUT_DRAIN_GRACE),
            )
        }
    };

    let stdout = stdout.finish(drain_until).map_err(io_err)?;
    let stderr = stderr.finish(drain_until).map_err(io_err)?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            limit = output_limit_bytes,
            "command output over limit"
        );
    }

    let duration = started.elapsed();
    debug!(?status, duration_ms = duration.as_millis() as u64, "command finished");
    Ok(CommandResult {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        duration,
    })
}

/// Bytes kept from one stream and the count of bytes dropped over the limit.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

impl Captured {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let keep = chunk.len().min(limit.saturating_sub(self.bytes.len()));
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }
}

/// A pipe drained on its own thread into a shared buffer.
struct Capture {
    buffer: Arc<Mutex<Captured>>,
    done: mpsc::Receiver<std::io::Result<()>>,
}

impl Capture {
    fn start<P: Read + Send + 'static>(pipe: P, limit: usize) -> Self {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let _ = tx.send(drain(pipe, &sink, limit));
        });
        Self { buffer, done }
    }

    /// Wait for EOF until `until`, then take whatever has been read.
    ///
    /// `None` waits for EOF without a bound.
    fn finish(self, until: Option<Instant>) -> std::io::Result<Captured> {
        let outcome = match until {
            Some(until) => self
                .done
                .recv_timeout(until.saturating_duration_since(Instant::now())),
            None => self.done.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match outcome {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                debug!("pipe still open after the command ended, keeping partial output");
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(std::io::Error::other("output reader thread panicked"));
            }
        }
        let mut captured = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::take(&mut *captured))
    }
}

fn drain<P: Read>(mut pipe: P, sink: &Mutex<Captured>, limit: usize) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match pipe.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(&chunk[..n], limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_keeps_up_to_limit_and_counts_the_rest() {
        let data = vec![b'x'; 20_000];
        let captured = Capture::start(std::io::Cursor::new(data), 100)
            .finish(None)
            .expect("drain");
        assert_eq!(captured.bytes.len(), 100);
        assert_eq!(captured.dropped, 19_900);
    }

    #[test]
    fn capture_keeps_short_input_whole() {
        let captured = Capture::start(&b"service: redis-1"[..], 100)
            .finish(Instant::now().checked_add(Duration::from_secs(5)))
            .expect("drain");
        assert_eq!(captured.bytes, b"service: redis-1");
        assert_eq!(captured.dropped, 0);
    }

    #[test]
    fn captured_push_across_chunks() {
        let mut captured = Captured::default();
        captured.push(b"abcd", 6);
        captured.push(b"efgh", 6);
        assert_eq!(captured.bytes, b"abcdef");
        assert_eq!(captured.dropped, 2);
    }
}
