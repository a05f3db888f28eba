//! Step sequencing: ordered, named steps grouped into phases.
//!
//! A phase runs its steps in order and stops at the first one that fails or
//! asks to skip; the steps after it are recorded as not run. Steps carry no
//! retry logic of their own, every retry happens inside the poll engine.

use std::fmt;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Recorded result of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResult {
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SKIPPED")]
    Skipped,
    #[serde(rename = "NOT RUN")]
    NotRun,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepResult::Passed => "PASSED",
            StepResult::Failed => "FAILED",
            StepResult::Skipped => "SKIPPED",
            StepResult::NotRun => "NOT RUN",
        };
        f.write_str(label)
    }
}

/// What a step action reports when it does not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// The step could not apply; the rest of the phase is not run.
    Skipped(String),
}

type Action<'a> = Box<dyn FnOnce() -> Result<StepOutcome> + 'a>;

pub struct Step<'a> {
    description: String,
    action: Action<'a>,
}

impl<'a> Step<'a> {
    pub fn new(description: impl Into<String>, action: impl FnOnce() -> Result<()> + 'a) -> Self {
        Self::skippable(description, move || action().map(|()| StepOutcome::Completed))
    }

    /// A step whose action may decide the phase cannot continue without failing it.
    pub fn skippable(
        description: impl Into<String>,
        action: impl FnOnce() -> Result<StepOutcome> + 'a,
    ) -> Self {
        Self {
            description: description.into(),
            action: Box::new(action),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Step<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub description: String,
    pub result: StepResult,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepRecord {
    fn not_run(description: String) -> Self {
        Self {
            description,
            result: StepResult::NotRun,
            duration_secs: 0.0,
            message: None,
        }
    }
}

/// Every step of one phase, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub steps: Vec<StepRecord>,
}

impl PhaseReport {
    pub fn failed(&self) -> bool {
        self.steps.iter().any(|s| s.result == StepResult::Failed)
    }

    pub fn skipped(&self) -> bool {
        self.steps.iter().any(|s| s.result == StepResult::Skipped)
    }

    /// Whether every step ran and passed.
    pub fn completed(&self) -> bool {
        self.steps.iter().all(|s| s.result == StepResult::Passed)
    }

    pub fn count(&self, result: StepResult) -> usize {
        self.steps.iter().filter(|s| s.result == result).count()
    }
}

/// Run `steps` in order, halting at the first failure or skip.
pub fn run_phase(name: &str, steps: Vec<Step<'_>>) -> PhaseReport {
    let mut records = Vec::with_capacity(steps.len());
    let mut halted = false;

    for step in steps {
        let Step {
            description,
            action,
        } = step;
        if halted {
            records.push(StepRecord::not_run(description));
            continue;
        }

        let started = Instant::now();
        let outcome = action();
        let duration_secs = started.elapsed().as_secs_f64();
        let (result, message) = match outcome {
            Ok(StepOutcome::Completed) => {
                info!(phase = name, step = %description, "step passed");
                (StepResult::Passed, None)
            }
            Ok(StepOutcome::Skipped(reason)) => {
                warn!(phase = name, step = %description, reason = %reason, "step skipped");
                halted = true;
                (StepResult::Skipped, Some(reason))
            }
            Err(err) => {
                error!(phase = name, step = %description, error = %format!("{err:#}"), "step failed");
                halted = true;
                (StepResult::Failed, Some(format!("{err:#}")))
            }
        };
        records.push(StepRecord {
            description,
            result,
            duration_secs,
            message,
        });
    }

    PhaseReport {
        name: name.to_string(),
        steps: records,
    }
}

/// Record a phase whose steps never get a chance to run.
pub fn skip_phase(name: &str, steps: Vec<Step<'_>>) -> PhaseReport {
    PhaseReport {
        name: name.to_string(),
        steps: steps
            .into_iter()
            .map(|step| StepRecord::not_run(step.description))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;

    #[test]
    fn first_failure_halts_phase() {
        let ran = Cell::new(0);
        let steps = vec![
            Step::new("one", || {
                ran.set(ran.get() + 1);
                Ok(())
            }),
            Step::new("two", || Err(anyhow!("boom"))),
            Step::new("three", || {
                ran.set(ran.get() + 1);
                Ok(())
            }),
        ];
        let report = run_phase("body", steps);
        let results: Vec<_> = report.steps.iter().map(|s| s.result).collect();
        assert_eq!(
            results,
            vec![StepResult::Passed, StepResult::Failed, StepResult::NotRun]
        );
        assert_eq!(ran.get(), 1);
        assert_eq!(report.steps[1].message.as_deref(), Some("boom"));
        assert!(report.failed());
    }

    #[test]
    fn skip_halts_without_failing() {
        let steps = vec![
            Step::skippable("create", || {
                Ok(StepOutcome::Skipped("plan quota reached".to_string()))
            }),
            Step::new("bind", || Ok(())),
        ];
        let report = run_phase("body", steps);
        assert!(!report.failed());
        assert!(report.skipped());
        assert_eq!(report.count(StepResult::NotRun), 1);
    }

    #[test]
    fn skipped_phase_runs_nothing() {
        let ran = Cell::new(false);
        let report = skip_phase(
            "body",
            vec![Step::new("write", || {
                ran.set(true);
                Ok(())
            })],
        );
        assert!(!ran.get());
        assert_eq!(report.steps[0].result, StepResult::NotRun);
    }

    #[test]
    fn results_serialize_with_report_labels() {
        let json = serde_json::to_string(&StepResult::NotRun).expect("json");
        assert_eq!(json, "\"NOT RUN\"");
        assert_eq!(StepResult::Skipped.to_string(), "SKIPPED");
    }
}
