//! The smoke-test narrative.
//!
//! Before the suite: connect, log in, create a quota, org, space and user.
//! Then, for every plan and binding mode, one scenario of three phases:
//! setup (push the app), body (create, bind, exercise the service) and a
//! teardown that always runs and removes what the first two phases created.
//! After the suite the org, user and quota are removed unless configured to
//! keep them.

use std::cell::Cell;
use std::fmt;

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, instrument};

use crate::core::rules::TLS_PROTOCOL_NOT_SUPPORTED;
use crate::io::app::{App, HttpTransport};
use crate::io::cf::{Cf, ServiceCreation};
use crate::io::clock::Clock;
use crate::io::config::SmokeConfig;
use crate::io::process::CommandRunner;
use crate::report::SmokeReport;
use crate::step::{PhaseReport, Step, StepOutcome, run_phase, skip_phase};

const TEST_KEY: &str = "mykey";
const TEST_VALUE: &str = "myvalue";
const SPACE_ROLE: &str = "SpaceDeveloper";
const QUOTA_ARGS: [&str; 7] = [
    "-m",
    "10G",
    "-r",
    "1000",
    "-s",
    "100",
    "--allow-paid-service-plans",
];
/// URL segment and config name for each TLS version probed, newest first.
const TLS_VERSIONS: [(&str, &str); 3] = [("v1.2", "tlsv1.2"), ("v1.1", "tlsv1.1"), ("v1", "tlsv1")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    Plain,
    Tls,
}

impl fmt::Display for BindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingMode::Plain => f.write_str("without TLS"),
            BindingMode::Tls => f.write_str("with TLS"),
        }
    }
}

/// Suite-wide resources, created once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteNames {
    pub org: String,
    pub space: String,
    pub quota: String,
    pub user: String,
    pub password: String,
}

impl SuiteNames {
    pub fn random(prefix: &str, rng: &mut impl Rng) -> Self {
        Self {
            org: random_name(&format!("{prefix}-ORG"), rng),
            space: random_name(&format!("{prefix}-SPACE"), rng),
            quota: random_name(&format!("{prefix}-QUOTA"), rng),
            user: random_name(&format!("{prefix}-USER"), rng),
            password: rng
                .sample_iter(&Alphanumeric)
                .take(24)
                .map(char::from)
                .collect(),
        }
    }
}

/// Per-scenario resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioNames {
    pub app: String,
    pub instance: String,
    pub service_key: String,
    pub security_group: String,
}

impl ScenarioNames {
    pub fn random(rng: &mut impl Rng) -> Self {
        Self {
            app: random_name("smoke-app", rng),
            instance: random_name("smoke-redis", rng),
            service_key: random_name("smoke-key", rng),
            security_group: random_name("smoke-sg", rng),
        }
    }
}

/// Scenario resources whose creating step was reached.
///
/// A create that fails may still leave the resource behind, so reaching the
/// step is enough to schedule its cleanup. Teardown leaves out everything
/// else: deleting what was never created fails on a real foundation and would
/// halt the teardown before the app is removed.
#[derive(Debug, Default)]
struct Provisioned {
    app: Cell<bool>,
    instance: Cell<bool>,
    binding: Cell<bool>,
    service_key: Cell<bool>,
    security_group: Cell<bool>,
}

impl Provisioned {
    /// Every resource, for listing a teardown that never gets to run.
    fn all() -> Self {
        let all = Self::default();
        for flag in [
            &all.app,
            &all.instance,
            &all.binding,
            &all.service_key,
            &all.security_group,
        ] {
            flag.set(true);
        }
        all
    }
}

fn random_name(prefix: &str, rng: &mut impl Rng) -> String {
    format!("{prefix}-{:016x}", rng.r#gen::<u64>())
}

/// Drives the whole suite against one platform.
pub struct Suite<'a, R, C, T> {
    config: &'a SmokeConfig,
    cf: Cf<&'a R, &'a C>,
    clock: &'a C,
    transport: &'a T,
}

impl<'a, R, C, T> Suite<'a, R, C, T>
where
    R: CommandRunner,
    C: Clock,
    T: HttpTransport,
{
    pub fn new(config: &'a SmokeConfig, runner: &'a R, clock: &'a C, transport: &'a T) -> Self {
        Self {
            config,
            cf: Cf::from_config(runner, clock, config),
            clock,
            transport,
        }
    }

    /// Run every scenario for `plans` and return the report.
    #[instrument(skip_all, fields(plans = plans.len()))]
    pub fn run(&self, plans: &[String], rng: &mut impl Rng) -> SmokeReport {
        let mut report = SmokeReport::new(Utc::now());
        let names = SuiteNames::random(&self.config.name_prefix, rng);

        let before = run_phase("setup", self.suite_setup_steps(&names));
        let ready = before.completed();
        report.push("Before suite", vec![before]);

        let mut modes = vec![BindingMode::Plain];
        if self.config.tls_enabled {
            modes.push(BindingMode::Tls);
        }
        for mode in modes {
            for plan in plans {
                let scenario = ScenarioNames::random(rng);
                let title = format!(
                    "{}: create, bind to, write to, read from, unbind, and destroy a service instance ({mode})",
                    plan.to_uppercase()
                );
                let phases = if ready {
                    info!(plan = %plan, mode = %mode, app = %scenario.app, "running scenario");
                    self.run_scenario(plan, mode, &names, &scenario)
                } else {
                    self.skip_scenario(plan, mode, &names, &scenario)
                };
                report.push(title, phases);
            }
        }

        if self.config.keep_suite_resources {
            info!(org = %names.org, "keeping suite resources");
        } else {
            report.push(
                "After suite",
                vec![run_phase("teardown", self.suite_teardown_steps(&names))],
            );
        }

        report.finish(Utc::now());
        report
    }

    fn run_scenario(
        &self,
        plan: &str,
        mode: BindingMode,
        names: &SuiteNames,
        scenario: &ScenarioNames,
    ) -> Vec<PhaseReport> {
        let app = self.app(scenario);
        let provisioned = Provisioned::default();
        let setup = run_phase(
            "setup",
            self.scenario_setup_steps(mode, names, scenario, &provisioned),
        );
        let body_steps = self.scenario_body_steps(plan, mode, names, scenario, &app, &provisioned);
        let body = if setup.completed() {
            run_phase("body", body_steps)
        } else {
            skip_phase("body", body_steps)
        };
        let teardown = run_phase(
            "teardown",
            self.scenario_teardown_steps(plan, scenario, &provisioned),
        );
        vec![setup, body, teardown]
    }

    fn skip_scenario(
        &self,
        plan: &str,
        mode: BindingMode,
        names: &SuiteNames,
        scenario: &ScenarioNames,
    ) -> Vec<PhaseReport> {
        let app = self.app(scenario);
        let provisioned = Provisioned::all();
        vec![
            skip_phase(
                "setup",
                self.scenario_setup_steps(mode, names, scenario, &provisioned),
            ),
            skip_phase(
                "body",
                self.scenario_body_steps(plan, mode, names, scenario, &app, &provisioned),
            ),
            skip_phase(
                "teardown",
                self.scenario_teardown_steps(plan, scenario, &provisioned),
            ),
        ]
    }

    fn app(&self, scenario: &ScenarioNames) -> App<&'a T, &'a C> {
        App::new(
            format!("https://{}.{}", scenario.app, self.config.apps_domain),
            self.transport,
            self.clock,
            self.config.short_timeout(),
            self.config.app_retry_interval(),
        )
    }

    fn connect_and_login_steps(&self) -> Vec<Step<'_>> {
        let cfg = self.config;
        let login = if cfg.uses_client_credentials() {
            Step::new("Log in as admin client", move || {
                self.cf.auth_client(&cfg.admin_client, &cfg.admin_client_secret)
            })
        } else {
            Step::new("Log in as admin user", move || {
                self.cf.auth(&cfg.admin_user, &cfg.admin_password)
            })
        };
        vec![
            Step::new("Connect to CloudFoundry", move || {
                self.cf.api(&cfg.api, cfg.skip_ssl_validation)
            }),
            login,
        ]
    }

    fn suite_setup_steps<'s>(&'s self, names: &'s SuiteNames) -> Vec<Step<'s>> {
        let mut steps = self.connect_and_login_steps();
        steps.extend([
            Step::new(format!("Create '{}' quota", names.quota), move || {
                self.cf.create_quota(&names.quota, &QUOTA_ARGS)
            }),
            Step::new(format!("Create '{}' org", names.org), move || {
                self.cf.create_org(&names.org, &names.quota)
            }),
            Step::new(format!("Create '{}' space", names.space), move || {
                self.cf.create_space(&names.space, &names.org)
            }),
            Step::new(format!("Create '{}' user", names.user), move || {
                self.cf.create_user(&names.user, &names.password)
            }),
            Step::new(
                format!("Grant {SPACE_ROLE} role to '{}'", names.user),
                move || {
                    self.cf
                        .set_space_role(&names.user, &names.org, &names.space, SPACE_ROLE)
                },
            ),
        ]);
        steps
    }

    fn suite_teardown_steps<'s>(&'s self, names: &'s SuiteNames) -> Vec<Step<'s>> {
        vec![
            Step::new(format!("Delete '{}' org", names.org), move || {
                self.cf.delete_org(&names.org)
            }),
            Step::new(format!("Delete '{}' user", names.user), move || {
                self.cf.delete_user(&names.user)
            }),
            Step::new(format!("Delete '{}' quota", names.quota), move || {
                self.cf.delete_quota(&names.quota)
            }),
            Step::new("Log out", move || self.cf.logout()),
        ]
    }

    fn scenario_setup_steps<'s>(
        &'s self,
        mode: BindingMode,
        names: &'s SuiteNames,
        scenario: &'s ScenarioNames,
        provisioned: &'s Provisioned,
    ) -> Vec<Step<'s>> {
        let cfg = self.config;
        let push_args = vec![
            "-m".to_string(),
            "256M".to_string(),
            "-p".to_string(),
            cfg.app_path.clone(),
            "-d".to_string(),
            cfg.apps_domain.clone(),
            "-b".to_string(),
            cfg.buildpack.clone(),
            "--no-start".to_string(),
        ];

        let mut steps = self.connect_and_login_steps();
        steps.extend([
            Step::new(
                format!("Target '{}' org and '{}' space", names.org, names.space),
                move || self.cf.target_org_and_space(&names.org, &names.space),
            ),
            Step::new("Push the redis sample app to Cloud Foundry", move || {
                provisioned.app.set(true);
                self.cf.push(&scenario.app, &push_args)
            }),
        ]);
        if mode == BindingMode::Tls {
            let versions = serde_json::to_string(&cfg.tls_versions).unwrap_or_default();
            steps.push(Step::new("Enable TLS", move || {
                self.cf.set_env(&scenario.app, "tls_enabled", "true")
            }));
            steps.push(Step::new(format!("Set TLS versions to {versions}"), move || {
                self.cf.set_env(&scenario.app, "tls_versions", &versions)
            }));
        }
        steps
    }

    fn scenario_body_steps<'s>(
        &'s self,
        plan: &'s str,
        mode: BindingMode,
        names: &'s SuiteNames,
        scenario: &'s ScenarioNames,
        app: &'s App<&'a T, &'a C>,
        provisioned: &'s Provisioned,
    ) -> Vec<Step<'s>> {
        let cfg = self.config;
        let mut steps = vec![
            Step::new(
                format!("Enable service plan access for '{}' org", names.org),
                move || {
                    self.cf
                        .enable_service_access(&names.org, &cfg.service_name, Some(plan))
                },
            ),
            Step::skippable(
                format!("Create a '{plan}' plan instance of Redis"),
                move || {
                    provisioned.instance.set(true);
                    match self
                        .cf
                        .create_service(&cfg.service_name, plan, &scenario.instance)?
                    {
                        ServiceCreation::Created => Ok(StepOutcome::Completed),
                        ServiceCreation::PlanQuotaReached => {
                            provisioned.instance.set(false);
                            Ok(StepOutcome::Skipped(format!(
                                "no free instances of the '{plan}' plan"
                            )))
                        }
                    }
                },
            ),
            Step::new(
                format!(
                    "Bind the redis sample app '{}' to the '{plan}' plan instance '{}' of Redis",
                    scenario.app, scenario.instance
                ),
                move || {
                    provisioned.binding.set(true);
                    self.cf.bind_service(&scenario.app, &scenario.instance)
                },
            ),
            Step::new(
                format!(
                    "Create service key for the '{plan}' plan instance '{}' of Redis",
                    scenario.instance
                ),
                move || {
                    provisioned.service_key.set(true);
                    self.cf
                        .create_service_key(&scenario.instance, &scenario.service_key)
                },
            ),
            Step::new(
                format!(
                    "Create and bind security group '{}' for running smoke tests",
                    scenario.security_group
                ),
                move || {
                    provisioned.security_group.set(true);
                    self.cf.create_and_bind_security_group(
                        &scenario.security_group,
                        &scenario.instance,
                        &scenario.service_key,
                        &names.org,
                        &names.space,
                    )
                },
            ),
            Step::new("Start the app", move || self.cf.start(&scenario.app)),
            Step::new("Verify that the app is responding", move || {
                app.is_running()
            }),
            Step::new("Write a key/value pair to Redis", move || {
                app.write(TEST_KEY, TEST_VALUE)
            }),
            Step::new("Read the key/value pair back", move || {
                app.read_assert(TEST_KEY, TEST_VALUE)
            }),
        ];
        if mode == BindingMode::Tls {
            for (label, name) in TLS_VERSIONS {
                let (expected, verb) = if cfg.has_tls_version(name) {
                    (TEST_VALUE, "succeed")
                } else {
                    (TLS_PROTOCOL_NOT_SUPPORTED, "fail")
                };
                steps.push(Step::new(
                    format!("Reading the value with a TLS{label} client should {verb}"),
                    move || app.read_tls_assert(label, TEST_KEY, expected),
                ));
            }
        }
        steps
    }

    fn scenario_teardown_steps<'s>(
        &'s self,
        plan: &'s str,
        scenario: &'s ScenarioNames,
        provisioned: &Provisioned,
    ) -> Vec<Step<'s>> {
        let mut steps = Vec::new();
        if provisioned.binding.get() {
            steps.push(Step::new(
                format!("Unbind the '{plan}' plan instance"),
                move || self.cf.unbind_service(&scenario.app, &scenario.instance),
            ));
        }
        if provisioned.security_group.get() {
            steps.push(Step::new(
                format!("Delete security group '{}'", scenario.security_group),
                move || self.cf.delete_security_group(&scenario.security_group),
            ));
        }
        if provisioned.service_key.get() {
            steps.push(Step::new(
                format!(
                    "Delete the service key {} for the '{plan}' plan instance",
                    scenario.service_key
                ),
                move || {
                    self.cf
                        .delete_service_key(&scenario.instance, &scenario.service_key)
                },
            ));
        }
        if provisioned.instance.get() {
            steps.push(Step::new(
                format!("Delete the '{plan}' plan instance"),
                move || self.cf.delete_service(&scenario.instance),
            ));
            steps.push(Step::new(
                format!("Ensure service instance for plan '{plan}' has been deleted"),
                move || self.cf.ensure_service_instance_gone(&scenario.instance),
            ));
        }
        if provisioned.app.get() {
            steps.push(Step::new("Delete the app", move || {
                self.cf.delete_app(&scenario.app)
            }));
        }
        if steps.is_empty() {
            info!(app = %scenario.app, "nothing to tear down");
        }
        steps
    }
}
