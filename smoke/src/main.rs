//! `redis-smoke`: smoke tests for the Redis service on Cloud Foundry.
//!
//! `run` drives the full suite and prints a step report; `await` polls one
//! asynchronous service operation; `validate-config` only loads the config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::error;

use smoke::exit_codes;
use smoke::io::app::ReqwestTransport;
use smoke::io::cf::{Cf, ServiceOperation};
use smoke::io::clock::SystemClock;
use smoke::io::config::{SmokeConfig, load_config};
use smoke::io::process::ProcessRunner;
use smoke::logging;
use smoke::suite::Suite;

/// Per-request timeout for calls to the sample app; checks retry on top of it.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "redis-smoke",
    version,
    about = "Smoke tests for the Redis service on Cloud Foundry"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON or TOML config file.
    #[arg(long, env = "CONFIG_PATH")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Run the suite for every configured plan.
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        /// Only run these plans (repeatable). Must be listed in the config.
        #[arg(long = "plan", value_name = "NAME")]
        plans: Vec<String>,
        /// Also write the report as JSON.
        #[arg(long, value_name = "PATH")]
        report_json: Option<PathBuf>,
    },
    /// Load and validate the config, then exit.
    ValidateConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Poll one asynchronous service operation until it settles.
    Await {
        operation: AwaitOperation,
        /// Service instance name.
        instance: String,
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AwaitOperation {
    Create,
    Update,
    Delete,
}

impl From<AwaitOperation> for ServiceOperation {
    fn from(op: AwaitOperation) -> Self {
        match op {
            AwaitOperation::Create => ServiceOperation::Create,
            AwaitOperation::Update => ServiceOperation::Update,
            AwaitOperation::Delete => ServiceOperation::Delete,
        }
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

/// `Err` means the invocation itself was invalid; step failures come back as exit codes.
fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            config,
            plans,
            report_json,
        } => cmd_run(&config.config, &plans, report_json.as_deref()),
        Command::ValidateConfig { config } => cmd_validate_config(&config.config),
        Command::Await {
            operation,
            instance,
            config,
        } => cmd_await(&config.config, operation, &instance),
    }
}

fn cmd_run(config_path: &Path, plans: &[String], report_json: Option<&Path>) -> Result<i32> {
    let config = load_config(config_path)?;
    let plans = select_plans(&config, plans)?;
    let runner = process_runner(&config);
    let transport = ReqwestTransport::new(HTTP_REQUEST_TIMEOUT, config.skip_ssl_validation)?;

    let report =
        Suite::new(&config, &runner, &SystemClock, &transport).run(&plans, &mut rand::thread_rng());
    print!("{}", report.render_text());

    if let Some(path) = report_json {
        if let Err(err) = report.write_json(path) {
            error!(error = %format!("{err:#}"), "failed to write json report");
            return Ok(exit_codes::FAILED);
        }
    }
    Ok(if report.failed() {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

fn cmd_validate_config(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    println!(
        "config ok: {} plan(s) of '{}' against {}",
        config.plan_names.len(),
        config.service_name,
        config.api
    );
    Ok(exit_codes::OK)
}

fn cmd_await(config_path: &Path, operation: AwaitOperation, instance: &str) -> Result<i32> {
    let config = load_config(config_path)?;
    let cf = Cf::from_config(process_runner(&config), SystemClock, &config);
    match cf.await_service(operation.into(), instance) {
        Ok(report) => {
            println!(
                "{}: succeeded after {} attempt(s) in {:.1}s",
                report.operation,
                report.attempts,
                report.elapsed.as_secs_f64()
            );
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("{err:#}");
            Ok(exit_codes::FAILED)
        }
    }
}

fn process_runner(config: &SmokeConfig) -> ProcessRunner {
    ProcessRunner {
        default_timeout: config.short_timeout(),
        output_limit_bytes: config.command_output_limit_bytes,
    }
}

/// Plans requested on the command line, or every configured plan.
fn select_plans(config: &SmokeConfig, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(config.plan_names.clone());
    }
    for plan in requested {
        if !config.plan_names.contains(plan) {
            bail!(
                "plan '{plan}' is not in plan_names ({})",
                config.plan_names.join(", ")
            );
        }
    }
    Ok(requested.to_vec())
}
