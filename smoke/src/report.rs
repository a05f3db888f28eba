//! Smoke-test report: phases grouped by suite section, rendered as text or JSON.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::step::{PhaseReport, StepResult};

/// Steps of one suite section (before suite, one scenario, after suite).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportGroup {
    pub title: String,
    pub phases: Vec<PhaseReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmokeReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub groups: Vec<ReportGroup>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_run: usize,
}

impl SmokeReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            groups: Vec::new(),
        }
    }

    pub fn push(&mut self, title: impl Into<String>, phases: Vec<PhaseReport>) {
        self.groups.push(ReportGroup {
            title: title.into(),
            phases,
        });
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    pub fn failed(&self) -> bool {
        self.phases().any(PhaseReport::failed)
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for phase in self.phases() {
            summary.passed += phase.count(StepResult::Passed);
            summary.failed += phase.count(StepResult::Failed);
            summary.skipped += phase.count(StepResult::Skipped);
            summary.not_run += phase.count(StepResult::NotRun);
        }
        summary
    }

    fn phases(&self) -> impl Iterator<Item = &PhaseReport> {
        self.groups.iter().flat_map(|g| g.phases.iter())
    }

    /// Plain-text rendering printed at the end of a run.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Smoke test results ({})", self.started_at.to_rfc3339());
        for group in &self.groups {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", group.title);
            for phase in &group.phases {
                let _ = writeln!(out, "  {}:", phase.name);
                for step in &phase.steps {
                    let _ = write!(out, "    [{}] {}", step.result, step.description);
                    if step.result != StepResult::NotRun {
                        let _ = write!(out, " ({:.1}s)", step.duration_secs);
                    }
                    let _ = writeln!(out);
                    if let Some(message) = &step.message {
                        for line in message.lines() {
                            let _ = writeln!(out, "        {line}");
                        }
                    }
                }
            }
        }
        let summary = self.summary();
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} passed, {} failed, {} skipped, {} not run",
            summary.passed, summary.failed, summary.skipped, summary.not_run
        );
        out
    }

    /// Write pretty JSON with a trailing newline.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create report dir {}", parent.display()))?;
        }
        let mut payload = serde_json::to_string_pretty(self).context("serialize report")?;
        payload.push('\n');
        fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepRecord;

    fn record(description: &str, result: StepResult, message: Option<&str>) -> StepRecord {
        StepRecord {
            description: description.to_string(),
            result,
            duration_secs: 1.5,
            message: message.map(str::to_string),
        }
    }

    fn sample() -> SmokeReport {
        let mut report = SmokeReport::new(Utc::now());
        report.push(
            "before suite",
            vec![PhaseReport {
                name: "setup".to_string(),
                steps: vec![record("Connect to CloudFoundry", StepResult::Passed, None)],
            }],
        );
        report.push(
            "SHARED-VM (plain)",
            vec![PhaseReport {
                name: "body".to_string(),
                steps: vec![
                    record(
                        "Create a 'shared-vm' plan instance of Redis",
                        StepResult::Failed,
                        Some("create-service failed\nstatus: create failed"),
                    ),
                    record("Bind the app", StepResult::NotRun, None),
                ],
            }],
        );
        report
    }

    #[test]
    fn summary_counts_every_result() {
        let report = sample();
        assert!(report.failed());
        assert_eq!(
            report.summary(),
            ReportSummary {
                passed: 1,
                failed: 1,
                skipped: 0,
                not_run: 1,
            }
        );
    }

    #[test]
    fn text_lists_steps_with_messages() {
        let text = sample().render_text();
        assert!(text.contains("[PASSED] Connect to CloudFoundry (1.5s)"));
        assert!(text.contains("[NOT RUN] Bind the app\n"));
        assert!(text.contains("        status: create failed"));
        assert!(text.ends_with("1 passed, 1 failed, 0 skipped, 1 not run\n"));
    }

    #[test]
    fn json_report_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reports").join("smoke.json");
        let mut report = sample();
        report.finish(Utc::now());
        report.write_json(&path).expect("write");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"NOT RUN\""));
        let parsed: SmokeReport = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, report);
    }
}
