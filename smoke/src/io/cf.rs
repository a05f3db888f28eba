//! Wrapper around the `cf` CLI.
//!
//! Every call goes through the poll engine: plain commands retry on non-zero
//! exits until the configured attempt budget is spent, asynchronous service
//! operations poll `cf service` / `cf services` until a terminal marker
//! appears or the long deadline passes.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::core::backoff::RetryPolicy;
use crate::core::budget::deadline_after;
use crate::core::classifier::RuleSet;
use crate::core::rules;
use crate::core::types::{CommandInvocation, PollPhase};
use crate::io::clock::Clock;
use crate::io::config::SmokeConfig;
use crate::io::process::CommandRunner;
use crate::poll::{PollReport, PollRequest, poll_command};

/// Interval between `cf service` checks while an asynchronous operation runs.
pub const ASYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of `cf create-service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCreation {
    Created,
    /// The plan has no free instances; the scenario cannot run.
    PlanQuotaReached,
}

/// Which asynchronous service operation to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfTimeouts {
    /// Budget for ordinary commands and the timeout of each invocation.
    pub short: Duration,
    /// Budget for asynchronous service operations, and the timeout of a
    /// single `cf start`.
    pub long: Duration,
}

impl Default for CfTimeouts {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(3 * 60),
            long: Duration::from_secs(15 * 60),
        }
    }
}

/// Testing wrapper around the `cf` CLI.
pub struct Cf<R, C> {
    runner: R,
    clock: C,
    program: String,
    retry: RetryPolicy,
    await_policy: RetryPolicy,
    timeouts: CfTimeouts,
}

impl<R: CommandRunner, C: Clock> Cf<R, C> {
    pub fn new(runner: R, clock: C, program: impl Into<String>, retry: RetryPolicy) -> Self {
        let timeouts = CfTimeouts::default();
        Self {
            runner,
            clock,
            program: program.into(),
            retry,
            await_policy: RetryPolicy::spanning(ASYNC_POLL_INTERVAL, timeouts.long),
            timeouts,
        }
    }

    pub fn from_config(runner: R, clock: C, config: &SmokeConfig) -> Self {
        Self::new(runner, clock, config.cf_binary.clone(), config.retry.policy()).with_timeouts(
            CfTimeouts {
                short: config.short_timeout(),
                long: config.long_timeout(),
            },
        )
    }

    pub fn with_timeouts(mut self, timeouts: CfTimeouts) -> Self {
        self.await_policy = RetryPolicy::spanning(self.await_policy.baseline, timeouts.long);
        self.timeouts = timeouts;
        self
    }

    /// Override the interval between asynchronous operation checks.
    pub fn with_async_poll_interval(mut self, interval: Duration) -> Self {
        self.await_policy = RetryPolicy::spanning(interval, self.timeouts.long);
        self
    }

    pub fn timeouts(&self) -> &CfTimeouts {
        &self.timeouts
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// `cf api <endpoint> [--skip-ssl-validation]`
    pub fn api(&self, endpoint: &str, skip_ssl_validation: bool) -> Result<()> {
        let mut args = vec!["api".to_string(), endpoint.to_string()];
        if skip_ssl_validation {
            args.push("--skip-ssl-validation".to_string());
        }
        self.expect_success("cf api", args)
            .context("failed to target Cloud Foundry")
    }

    /// `cf auth <user> <password>`
    pub fn auth(&self, user: &str, password: &str) -> Result<()> {
        self.expect_success("cf auth", strings(["auth", user, password]))
            .context("failed to `cf auth` with target Cloud Foundry")
    }

    /// `cf auth <client> <secret> --client-credentials`
    pub fn auth_client(&self, client: &str, secret: &str) -> Result<()> {
        self.expect_success(
            "cf auth",
            strings(["auth", client, secret, "--client-credentials"]),
        )
        .context("failed to `cf auth` with client credentials")
    }

    /// `cf create-quota <name> [args...]`
    pub fn create_quota(&self, name: &str, extra: &[&str]) -> Result<()> {
        let mut args = strings(["create-quota", name]);
        args.extend(extra.iter().map(|s| s.to_string()));
        self.expect_success("cf create-quota", args)
            .context("failed to `cf create-quota`")
    }

    /// `cf delete-quota <name> -f`
    pub fn delete_quota(&self, name: &str) -> Result<()> {
        self.expect_success("cf delete-quota", strings(["delete-quota", name, "-f"]))
            .context("failed to delete quota")
    }

    /// `cf create-org <org> -q <quota>`
    pub fn create_org(&self, org: &str, quota: &str) -> Result<()> {
        self.expect_success("cf create-org", strings(["create-org", org, "-q", quota]))
            .context("failed to create test org")
    }

    /// `cf delete-org <org> -f`
    pub fn delete_org(&self, org: &str) -> Result<()> {
        self.expect_success("cf delete-org", strings(["delete-org", org, "-f"]))
            .context("failed to delete test org")
    }

    /// `cf create-space <space> -o <org>`
    pub fn create_space(&self, space: &str, org: &str) -> Result<()> {
        self.expect_success("cf create-space", strings(["create-space", space, "-o", org]))
            .context("failed to create test space")
    }

    /// `cf target -o <org>`
    pub fn target_org(&self, org: &str) -> Result<()> {
        self.expect_success("cf target", strings(["target", "-o", org]))
            .context("failed to target test org")
    }

    /// `cf target -o <org> -s <space>`
    pub fn target_org_and_space(&self, org: &str, space: &str) -> Result<()> {
        self.expect_success("cf target", strings(["target", "-o", org, "-s", space]))
            .context("failed to target test org and space")
    }

    /// Re-enable access so the call is idempotent: disable, then enable.
    pub fn enable_service_access(&self, org: &str, service: &str, plan: Option<&str>) -> Result<()> {
        let plan_args = |verb: &str| {
            let mut args = strings([verb, service, "-o", org]);
            if let Some(plan) = plan {
                args.extend(strings(["-p", plan]));
            }
            args
        };
        self.expect_success("cf disable-service-access", plan_args("disable-service-access"))
            .context("failed to disable service access for test org")?;
        self.expect_success("cf enable-service-access", plan_args("enable-service-access"))
            .context("failed to enable service access for test org")
    }

    /// `cf create-user <name> <password>`; an existing user is accepted.
    pub fn create_user(&self, name: &str, password: &str) -> Result<()> {
        self.run_until(
            "cf create-user",
            &rules::create_user(),
            &self.retry,
            self.short_limits(),
            strings(["create-user", name, password]),
        )
        .context("failed to create user")?;
        Ok(())
    }

    /// `cf delete-user -f <name>`
    pub fn delete_user(&self, name: &str) -> Result<()> {
        self.expect_success("cf delete-user", strings(["delete-user", "-f", name]))
            .context("failed to delete user")
    }

    /// `cf set-space-role <name> <org> <space> <role>`
    pub fn set_space_role(&self, name: &str, org: &str, space: &str, role: &str) -> Result<()> {
        self.expect_success(
            "cf set-space-role",
            strings(["set-space-role", name, org, space, role]),
        )
        .context("failed to set space role")
    }

    /// `cf push <app> [args...]`
    pub fn push(&self, app: &str, extra: &[String]) -> Result<()> {
        let mut args = strings(["push", app]);
        args.extend(extra.iter().cloned());
        self.expect_success("cf push", args)
            .context("failed to `cf push` test app")
    }

    /// `cf delete <app> -f -r`
    pub fn delete_app(&self, app: &str) -> Result<()> {
        self.expect_success("cf delete", strings(["delete", app, "-f", "-r"]))
            .context("failed to `cf delete` test app")
    }

    /// `cf start <app>`. Staging can take minutes, so a single invocation may
    /// run for the whole long timeout.
    pub fn start(&self, app: &str) -> Result<()> {
        self.run_until(
            "cf start",
            &rules::command_succeeds(),
            &self.retry,
            self.staging_limits(),
            strings(["start", app]),
        )
        .context("failed to start test app")?;
        Ok(())
    }

    /// `cf set-env <app> <name> <value>`
    pub fn set_env(&self, app: &str, name: &str, value: &str) -> Result<()> {
        self.expect_success("cf set-env", strings(["set-env", app, name, value]))
            .context("failed to set environment variable for test app")
    }

    /// `cf create-service`, then wait for the instance to finish creating.
    #[instrument(skip(self))]
    pub fn create_service(&self, service: &str, plan: &str, instance: &str) -> Result<ServiceCreation> {
        let report = self.poll(
            "cf create-service",
            &rules::create_service(),
            &self.retry,
            self.short_limits(),
            strings(["create-service", service, plan, instance]),
        )?;
        if report.phase == PollPhase::FailedPermanently
            && report
                .last_result
                .combined_output()
                .contains(rules::INSTANCE_LIMIT_REACHED)
        {
            info!(plan, "no plan instances available");
            return Ok(ServiceCreation::PlanQuotaReached);
        }
        report
            .into_result()
            .context("failed to create service instance")?;
        self.await_service(ServiceOperation::Create, instance)?;
        Ok(ServiceCreation::Created)
    }

    /// Wait for an asynchronous operation on `instance` to reach a terminal state.
    pub fn await_service(&self, operation: ServiceOperation, instance: &str) -> Result<PollReport> {
        let (label, rule_set, args) = match operation {
            ServiceOperation::Create => (
                "await service creation",
                rules::await_service_creation(),
                strings(["service", instance]),
            ),
            ServiceOperation::Update => (
                "await service update",
                rules::await_service_update(),
                strings(["service", instance]),
            ),
            ServiceOperation::Delete => (
                "await service deletion",
                rules::await_service_deletion(instance),
                strings(["services"]),
            ),
        };
        self.run_until(label, &rule_set, &self.await_policy, self.wait_limits(), args)
            .with_context(|| format!("service instance '{instance}' did not settle"))
    }

    /// `cf delete-service -f <instance>`
    pub fn delete_service(&self, instance: &str) -> Result<()> {
        self.expect_success("cf delete-service", strings(["delete-service", "-f", instance]))
            .with_context(|| format!("failed to delete service {instance}"))
    }

    /// Retry the delete until the platform accepts it, then wait until the instance is gone.
    #[instrument(skip(self))]
    pub fn ensure_service_instance_gone(&self, instance: &str) -> Result<()> {
        self.run_until(
            "cf delete-service",
            &rules::delete_service_accepted(),
            &self.retry,
            self.wait_limits(),
            strings(["delete-service", "-f", instance]),
        )
        .with_context(|| format!("failed to delete service instance {instance}"))?;
        self.run_until(
            "await service instance gone",
            &rules::service_instance_gone(instance),
            &self.await_policy,
            self.wait_limits(),
            strings(["service", instance]),
        )
        .with_context(|| format!("service instance {instance} still present"))?;
        info!(instance, "service instance deleted");
        Ok(())
    }

    /// Wait until `cf services` lists nothing.
    pub fn ensure_no_services(&self) -> Result<()> {
        self.run_until(
            "await no services",
            &rules::no_services(),
            &self.await_policy,
            self.wait_limits(),
            strings(["services"]),
        )
        .context("services still present in test space")?;
        Ok(())
    }

    /// `cf bind-service <app> <instance>`
    pub fn bind_service(&self, app: &str, instance: &str) -> Result<()> {
        self.expect_success("cf bind-service", strings(["bind-service", app, instance]))
            .context("failed to bind service instance to test app")
    }

    /// `cf unbind-service <app> <instance>`
    pub fn unbind_service(&self, app: &str, instance: &str) -> Result<()> {
        self.expect_success("cf unbind-service", strings(["unbind-service", app, instance]))
            .with_context(|| format!("failed to unbind {instance} instance from {app}"))
    }

    /// `cf create-service-key <instance> <key>`
    pub fn create_service_key(&self, instance: &str, key: &str) -> Result<()> {
        self.expect_success(
            "cf create-service-key",
            strings(["create-service-key", instance, key]),
        )
        .context("failed to create service key")
    }

    /// `cf delete-service-key <instance> <key> -f`
    pub fn delete_service_key(&self, instance: &str, key: &str) -> Result<()> {
        self.expect_success(
            "cf delete-service-key",
            strings(["delete-service-key", instance, key, "-f"]),
        )
        .context("failed to delete service key")
    }

    /// Open a TCP rule from the space to the instance's host and port.
    #[instrument(skip(self))]
    pub fn create_and_bind_security_group(
        &self,
        security_group: &str,
        instance: &str,
        key: &str,
        org: &str,
        space: &str,
    ) -> Result<()> {
        let credentials = self.service_key_credentials(instance, key)?;
        let rules = vec![SecurityGroupRule {
            protocol: "tcp".to_string(),
            destination: credentials.host,
            ports: credentials.port.to_string(),
        }];

        let mut file = tempfile::Builder::new()
            .prefix("smoke-test-security-group-")
            .suffix(".json")
            .tempfile()
            .context("create security group file")?;
        serde_json::to_writer(&mut file, &rules).context("failed to encode security groups")?;
        file.flush().context("flush security group file")?;
        let path = file.path().to_string_lossy().into_owned();

        self.expect_success(
            "cf create-security-group",
            strings(["create-security-group", security_group, path.as_str()]),
        )
        .context("failed to create security group")?;
        self.expect_success(
            "cf bind-security-group",
            strings(["bind-security-group", security_group, org, space]),
        )
        .context("failed to bind security group to space")
    }

    /// `cf delete-security-group <name> -f`
    pub fn delete_security_group(&self, security_group: &str) -> Result<()> {
        self.expect_success(
            "cf delete-security-group",
            strings(["delete-security-group", security_group, "-f"]),
        )
        .context("failed to delete security group")
    }

    /// `cf logout`
    pub fn logout(&self) -> Result<()> {
        self.expect_success("cf logout", strings(["logout"]))
            .context("failed to logout")
    }

    /// Host and port from a service key, via the v2 API.
    pub fn service_key_credentials(&self, instance: &str, key: &str) -> Result<Credentials> {
        let report = self
            .run_until(
                "cf service-key",
                &rules::command_succeeds(),
                &self.retry,
                self.short_limits(),
                strings(["service-key", instance, key, "--guid"]),
            )
            .context("failed to retrieve service key guid")?;
        let guid = report.last_result.stdout_text().trim().to_string();
        if guid.is_empty() {
            bail!("empty guid for service key {key}");
        }

        let report = self
            .run_until(
                "cf curl",
                &rules::command_succeeds(),
                &self.retry,
                self.short_limits(),
                strings(["curl", format!("/v2/service_keys/{guid}").as_str()]),
            )
            .context("failed to retrieve service key")?;
        parse_service_key(&report.last_result.stdout)
    }

    fn expect_success(&self, operation: &str, args: Vec<String>) -> Result<()> {
        self.run_until(
            operation,
            &rules::command_succeeds(),
            &self.retry,
            self.short_limits(),
            args,
        )?;
        Ok(())
    }

    fn short_limits(&self) -> Limits {
        Limits {
            budget: self.timeouts.short,
            per_call: self.timeouts.short,
        }
    }

    fn wait_limits(&self) -> Limits {
        Limits {
            budget: self.timeouts.long,
            per_call: self.timeouts.short,
        }
    }

    fn staging_limits(&self) -> Limits {
        Limits {
            budget: self.timeouts.long,
            per_call: self.timeouts.long,
        }
    }

    fn run_until(
        &self,
        operation: &str,
        rules: &RuleSet,
        policy: &RetryPolicy,
        limits: Limits,
        args: Vec<String>,
    ) -> Result<PollReport> {
        let report = self.poll(operation, rules, policy, limits, args)?;
        Ok(report.into_result()?)
    }

    fn poll(
        &self,
        operation: &str,
        rules: &RuleSet,
        policy: &RetryPolicy,
        limits: Limits,
        args: Vec<String>,
    ) -> Result<PollReport> {
        let request = PollRequest {
            operation,
            rules,
            policy,
            deadline: deadline_after(self.clock.now(), limits.budget),
        };
        let report = poll_command(&request, &self.runner, &self.clock, |_| {
            CommandInvocation::new(self.program.clone(), args.clone())
                .with_timeout(limits.per_call)
        })?;
        Ok(report)
    }
}

/// Wall-clock budget of one operation and the timeout of each `cf` call in it.
#[derive(Debug, Clone, Copy)]
struct Limits {
    budget: Duration,
    per_call: Duration,
}

/// Connection details from a service key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
struct SecurityGroupRule {
    protocol: String,
    destination: String,
    ports: String,
}

#[derive(Debug, Deserialize)]
struct ServiceKeyResponse {
    entity: ServiceKeyEntity,
}

#[derive(Debug, Deserialize)]
struct ServiceKeyEntity {
    credentials: RawCredentials,
}

#[derive(Debug, Deserialize)]
struct RawCredentials {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
}

fn parse_service_key(body: &[u8]) -> Result<Credentials> {
    let resp: ServiceKeyResponse =
        serde_json::from_slice(body).context("failed to decode service key response")?;
    let RawCredentials { host, port } = resp.entity.credentials;
    if host.is_empty() {
        return Err(anyhow!("invalid service key, missing host"));
    }
    if port == 0 {
        return Err(anyhow!("invalid service key, missing port"));
    }
    Ok(Credentials { host, port })
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
