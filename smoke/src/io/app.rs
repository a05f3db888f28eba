//! HTTP client for the sample app bound to the service under test.
//!
//! Each check is polled with the same engine as CLI commands: an HTTP
//! response is folded into a [`CommandResult`] (2xx is exit 0, anything else
//! exit 1, body on stdout) so the shared rule sets apply unchanged.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::backoff::RetryPolicy;
use crate::core::budget::deadline_after;
use crate::core::classifier::RuleSet;
use crate::core::rules;
use crate::core::types::{CommandResult, CommandStatus};
use crate::error::PollError;
use crate::io::clock::Clock;
use crate::poll::{PollRequest, Probe, poll_until_terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Form-encoded body fields.
    pub form: Vec<(String, String)>,
}

/// Sends one request and folds the outcome into a [`CommandResult`].
///
/// Transport errors are not harness failures: they come back as exit 1 with
/// the error on stderr so the poll can retry them.
pub trait HttpTransport {
    fn send(&self, request: &HttpRequest) -> CommandResult;
}

impl<T: HttpTransport + ?Sized> HttpTransport for &T {
    fn send(&self, request: &HttpRequest) -> CommandResult {
        (**self).send(request)
    }
}

/// Blocking `reqwest` transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration, skip_ssl_validation: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(skip_ssl_validation)
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> CommandResult {
        let started = Instant::now();
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Put => self.client.put(&request.url).form(&request.form),
        };
        let mut result = match builder.send() {
            Ok(response) => {
                let status = response.status();
                let body = match response.bytes() {
                    Ok(bytes) => bytes.to_vec(),
                    Err(err) => {
                        let mut result = CommandResult::exited(1, Vec::new());
                        result.stderr = format!("read body: {err}").into_bytes();
                        result.duration = started.elapsed();
                        return result;
                    }
                };
                let mut result = CommandResult::exited(i32::from(!status.is_success()), body);
                if !status.is_success() {
                    result.stderr = format!("HTTP {status}").into_bytes();
                }
                result
            }
            Err(err) if err.is_timeout() => {
                let mut result = CommandResult::timed_out();
                result.stderr = err.to_string().into_bytes();
                result
            }
            Err(err) => {
                let mut result = CommandResult::exited(1, Vec::new());
                result.stderr = err.to_string().into_bytes();
                result
            }
        };
        result.duration = started.elapsed();
        result
    }
}

/// Probe that re-sends the same request on every attempt.
pub struct HttpProbe<'a, T: ?Sized> {
    transport: &'a T,
    request: HttpRequest,
}

impl<'a, T: HttpTransport + ?Sized> HttpProbe<'a, T> {
    pub fn new(transport: &'a T, request: HttpRequest) -> Self {
        Self { transport, request }
    }
}

impl<T: HttpTransport + ?Sized> Probe for HttpProbe<'_, T> {
    fn probe(&mut self, attempt: u32) -> Result<CommandResult, PollError> {
        debug!(attempt, url = %self.request.url, "sending request");
        let result = self.transport.send(&self.request);
        if result.status == CommandStatus::TimedOut {
            debug!(attempt, "request timed out");
        }
        Ok(result)
    }
}

/// The sample app at `uri`.
pub struct App<T, C> {
    uri: String,
    transport: T,
    clock: C,
    timeout: Duration,
    policy: RetryPolicy,
}

impl<T: HttpTransport, C: Clock> App<T, C> {
    /// Checks retry every `retry_interval` until `timeout` has passed.
    pub fn new(
        uri: impl Into<String>,
        transport: T,
        clock: C,
        timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            uri: uri.into().trim_end_matches('/').to_string(),
            transport,
            clock,
            timeout,
            policy: RetryPolicy::spanning(retry_interval, timeout),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// `GET /` answers with a 2xx.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn is_running(&self) -> Result<()> {
        self.check(
            "app is running",
            &rules::response_ok(),
            self.get(self.uri.clone()),
        )
        .context("app is not responding")
    }

    /// `PUT /<key>` with `data=<value>`.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn write(&self, key: &str, value: &str) -> Result<()> {
        let request = HttpRequest {
            method: HttpMethod::Put,
            url: format!("{}/{key}", self.uri),
            form: vec![("data".to_string(), value.to_string())],
        };
        self.check("write key", &rules::response_ok(), request)
            .with_context(|| format!("failed to write '{key}'"))
    }

    /// `GET /<key>` returns a body containing `expected`.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn read_assert(&self, key: &str, expected: &str) -> Result<()> {
        self.check(
            "read key",
            &rules::response_contains(expected),
            self.get(format!("{}/{key}", self.uri)),
        )
        .with_context(|| format!("reading '{key}' did not return '{expected}'"))
    }

    /// `GET /tls/<version>/<key>` over a client pinned to `version` (e.g. `v1.2`).
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn read_tls_assert(&self, version: &str, key: &str, expected: &str) -> Result<()> {
        self.check(
            "tls read key",
            &rules::response_contains(expected),
            self.get(format!("{}/tls/{version}/{key}", self.uri)),
        )
        .with_context(|| format!("TLS {version} read of '{key}' did not return '{expected}'"))
    }

    fn get(&self, url: String) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url,
            form: Vec::new(),
        }
    }

    fn check(&self, operation: &str, rules: &RuleSet, request: HttpRequest) -> Result<()> {
        let poll = PollRequest {
            operation,
            rules,
            policy: &self.policy,
            deadline: deadline_after(self.clock.now(), self.timeout),
        };
        let mut probe = HttpProbe::new(&self.transport, request);
        poll_until_terminal(&poll, &mut probe, &self.clock)?.into_result()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeClock, ScriptedTransport};

    fn app<'a>(
        transport: &'a ScriptedTransport,
        clock: &'a FakeClock,
    ) -> App<&'a ScriptedTransport, &'a FakeClock> {
        App::new(
            "https://app-1.apps.example.com/",
            transport,
            clock,
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn is_running_retries_until_2xx() {
        let transport = ScriptedTransport::new(vec![
            CommandResult::exited(1, "404 Not Found: Requested route does not exist."),
            CommandResult::exited(0, "hello"),
        ]);
        let clock = FakeClock::new();
        app(&transport, &clock).is_running().expect("running");
        assert_eq!(transport.urls(), vec![
            "https://app-1.apps.example.com",
            "https://app-1.apps.example.com",
        ]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn write_sends_form_body() {
        let transport = ScriptedTransport::new(vec![CommandResult::exited(0, "success")]);
        let clock = FakeClock::new();
        app(&transport, &clock)
            .write("mykey", "myvalue")
            .expect("write");
        let sent = transport.requests();
        assert_eq!(sent[0].method, HttpMethod::Put);
        assert_eq!(sent[0].url, "https://app-1.apps.example.com/mykey");
        assert_eq!(
            sent[0].form,
            vec![("data".to_string(), "myvalue".to_string())]
        );
    }

    #[test]
    fn read_assert_gives_up_at_deadline() {
        let transport = ScriptedTransport::repeating(CommandResult::exited(0, "othervalue"));
        let clock = FakeClock::new();
        let err = app(&transport, &clock)
            .read_assert("mykey", "myvalue")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PollError>(),
            Some(PollError::PollTimeout { .. })
        ));
        assert!(clock.now() <= clock.start() + Duration::from_secs(10));
    }

    #[test]
    fn unbounded_timeout_still_checks() {
        let transport = ScriptedTransport::new(vec![
            CommandResult::exited(1, "502 Bad Gateway"),
            CommandResult::exited(0, "hello"),
        ]);
        let clock = FakeClock::new();
        App::new(
            "https://app-1.apps.example.com",
            &transport,
            &clock,
            Duration::MAX,
            Duration::from_secs(1),
        )
        .is_running()
        .expect("running");
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn tls_read_uses_versioned_path() {
        let transport = ScriptedTransport::new(vec![CommandResult::exited(
            1,
            "protocol not supported: tlsv1.1",
        )]);
        let clock = FakeClock::new();
        app(&transport, &clock)
            .read_tls_assert("v1.1", "mykey", rules::TLS_PROTOCOL_NOT_SUPPORTED)
            .expect("tls read");
        assert_eq!(
            transport.urls(),
            vec!["https://app-1.apps.example.com/tls/v1.1/mykey"]
        );
    }

    #[test]
    fn transport_timeouts_are_retried() {
        let transport = ScriptedTransport::new(vec![
            CommandResult::timed_out(),
            CommandResult::exited(0, "myvalue"),
        ]);
        let clock = FakeClock::new();
        app(&transport, &clock)
            .read_assert("mykey", "myvalue")
            .expect("read");
        assert_eq!(transport.requests().len(), 2);
    }
}
