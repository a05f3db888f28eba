//! Suite configuration loaded once from `CONFIG_PATH` (JSON or TOML).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::backoff::{Backoff, RetryPolicy};

/// Smoke-test configuration.
///
/// Field names follow the JSON config consumed by the platform's test
/// pipelines. Missing optional fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SmokeConfig {
    /// Platform API endpoint (e.g. `api.sys.example.com`).
    pub api: String,
    pub apps_domain: String,
    pub admin_user: String,
    pub admin_password: String,
    /// Client credentials take precedence over user/password when both are set.
    pub admin_client: String,
    pub admin_client_secret: String,
    pub skip_ssl_validation: bool,

    pub service_name: String,
    pub plan_names: Vec<String>,

    pub tls_enabled: bool,
    /// Versions the service accepts, e.g. `["tlsv1.2"]`.
    pub tls_versions: Vec<String>,

    pub retry: RetryConfig,

    /// CLI binary used for every platform call.
    pub cf_binary: String,
    /// Deadline for ordinary CLI operations.
    pub short_timeout_secs: u64,
    /// Deadline for slow asynchronous operations (service create/delete).
    pub long_timeout_secs: u64,
    pub command_output_limit_bytes: usize,

    /// Path to the sample app pushed during each scenario.
    pub app_path: String,
    pub buildpack: String,
    /// Interval between checks against the running app.
    pub app_retry_interval_ms: u64,

    /// Keep the org/space/user/quota after the suite finishes.
    pub keep_suite_resources: bool,
    /// Prefix for generated org, space, user and quota names.
    pub name_prefix: String,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            api: String::new(),
            apps_domain: String::new(),
            admin_user: String::new(),
            admin_password: String::new(),
            admin_client: String::new(),
            admin_client_secret: String::new(),
            skip_ssl_validation: false,
            service_name: String::new(),
            plan_names: Vec::new(),
            tls_enabled: false,
            tls_versions: Vec::new(),
            retry: RetryConfig::default(),
            cf_binary: "cf".to_string(),
            short_timeout_secs: 3 * 60,
            long_timeout_secs: 15 * 60,
            command_output_limit_bytes: 1_000_000,
            app_path: "assets/cf-redis-example-app".to_string(),
            buildpack: "ruby_buildpack".to_string(),
            app_retry_interval_ms: 1000,
            keep_suite_resources: false,
            name_prefix: "SMOKE".to_string(),
        }
    }
}

/// Retry settings as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub baseline_interval_milliseconds: u64,
    pub max_attempts: u32,
    /// `none`, `linear` or `exponential` (case-insensitive).
    pub backoff: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            baseline_interval_milliseconds: 500,
            max_attempts: 10,
            backoff: "none".to_string(),
        }
    }
}

impl RetryConfig {
    /// Resolve the configured algorithm name.
    ///
    /// `exponential` keeps the timing the suite has always produced for it,
    /// which is linear; unknown names fall back to `none`.
    pub fn backoff(&self) -> Backoff {
        match self.backoff.to_ascii_lowercase().as_str() {
            "linear" => Backoff::Linear,
            "exponential" => {
                warn!("backoff 'exponential' is applied with linear timing");
                Backoff::Linear
            }
            "none" | "" => Backoff::None,
            other => {
                warn!(backoff = other, "unknown backoff algorithm, using none");
                Backoff::None
            }
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.baseline_interval_milliseconds),
            self.max_attempts,
            self.backoff(),
        )
    }
}

impl SmokeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api.trim().is_empty() {
            return Err(anyhow!("api must be set"));
        }
        if self.apps_domain.trim().is_empty() {
            return Err(anyhow!("apps_domain must be set"));
        }
        if self.service_name.trim().is_empty() {
            return Err(anyhow!("service_name must be set"));
        }
        if self.plan_names.is_empty() || self.plan_names.iter().any(|p| p.trim().is_empty()) {
            return Err(anyhow!("plan_names must be a non-empty list of names"));
        }
        if !self.uses_client_credentials()
            && (self.admin_user.is_empty() || self.admin_password.is_empty())
        {
            return Err(anyhow!(
                "either admin_client/admin_client_secret or admin_user/admin_password must be set"
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be >= 1"));
        }
        if self.short_timeout_secs == 0 || self.long_timeout_secs == 0 {
            return Err(anyhow!("short_timeout_secs and long_timeout_secs must be > 0"));
        }
        if self.command_output_limit_bytes == 0 {
            return Err(anyhow!("command_output_limit_bytes must be > 0"));
        }
        if self.cf_binary.trim().is_empty() {
            return Err(anyhow!("cf_binary must be set"));
        }
        Ok(())
    }

    pub fn uses_client_credentials(&self) -> bool {
        !self.admin_client.is_empty() && !self.admin_client_secret.is_empty()
    }

    pub fn short_timeout(&self) -> Duration {
        Duration::from_secs(self.short_timeout_secs)
    }

    pub fn long_timeout(&self) -> Duration {
        Duration::from_secs(self.long_timeout_secs)
    }

    pub fn app_retry_interval(&self) -> Duration {
        Duration::from_millis(self.app_retry_interval_ms)
    }

    /// Whether the service is expected to accept `version` (e.g. `tlsv1.2`).
    pub fn has_tls_version(&self, version: &str) -> bool {
        self.tls_versions.iter().any(|v| v.eq_ignore_ascii_case(version))
    }
}

/// Load and validate config. `.json` files are parsed as JSON, everything else as TOML.
pub fn load_config(path: &Path) -> Result<SmokeConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg: SmokeConfig = if is_json {
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    };
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    debug!(
        path = %path.display(),
        plans = cfg.plan_names.len(),
        max_attempts = cfg.retry.max_attempts,
        "config loaded"
    );
    Ok(cfg)
}
