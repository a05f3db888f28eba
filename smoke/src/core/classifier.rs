//! Deterministic classification of captured command output.
//!
//! A [`RuleSet`] is an ordered list of `(matcher, verdict)` pairs. The first
//! matching rule decides; when nothing matches the exit status does.

use regex::Regex;

use crate::core::types::{ClassificationOutcome, CommandResult, CommandStatus};

/// Predicate over a captured result.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Output contains the substring.
    Contains(String),
    /// Output does not contain the substring.
    Absent(String),
    /// Some single line contains every substring.
    LineContainsAll(Vec<String>),
    Pattern(Regex),
    /// Process exited with exactly this code.
    Exit(i32),
    TimedOut,
    All(Vec<Matcher>),
    Always,
}

impl Matcher {
    pub fn contains(needle: impl Into<String>) -> Self {
        Matcher::Contains(needle.into())
    }

    pub fn absent(needle: impl Into<String>) -> Self {
        Matcher::Absent(needle.into())
    }

    pub fn line_contains_all<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Matcher::LineContainsAll(needles.into_iter().map(Into::into).collect())
    }

    fn matches(&self, status: CommandStatus, output: &str) -> bool {
        match self {
            Matcher::Contains(needle) => output.contains(needle.as_str()),
            Matcher::Absent(needle) => !output.contains(needle.as_str()),
            Matcher::LineContainsAll(needles) => output
                .lines()
                .any(|line| needles.iter().all(|n| line.contains(n.as_str()))),
            Matcher::Pattern(re) => re.is_match(output),
            Matcher::Exit(code) => status == CommandStatus::Exited(*code),
            Matcher::TimedOut => status == CommandStatus::TimedOut,
            Matcher::All(inner) => inner.iter().all(|m| m.matches(status, output)),
            Matcher::Always => true,
        }
    }
}

/// Outcome tag attached to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Transient,
    Permanent,
    Pending,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub matcher: Matcher,
    pub verdict: Verdict,
    /// Human-readable reason carried by failure outcomes.
    pub reason: String,
}

impl Rule {
    pub fn new(matcher: Matcher, verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            matcher,
            verdict,
            reason: reason.into(),
        }
    }

    fn outcome(&self) -> ClassificationOutcome {
        match self.verdict {
            Verdict::Success => ClassificationOutcome::Success,
            Verdict::Pending => ClassificationOutcome::Pending,
            Verdict::Transient => ClassificationOutcome::TransientFailure(self.reason.clone()),
            Verdict::Permanent => ClassificationOutcome::PermanentFailure(self.reason.clone()),
        }
    }
}

/// Priority-ordered rules for one operation.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    /// Verdict for a timed-out invocation no rule matched.
    pub on_timeout: Verdict,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            on_timeout: Verdict::Transient,
        }
    }

    pub fn with_timeout_verdict(mut self, verdict: Verdict) -> Self {
        self.on_timeout = verdict;
        self
    }
}

/// Classify `result` against `rules`.
///
/// - First matching rule wins.
/// - Timed out, unmatched: `rules.on_timeout` (transient by default).
/// - Exit 0, unmatched: `Pending`.
/// - Non-zero exit, unmatched: `PermanentFailure`.
pub fn classify(result: &CommandResult, rules: &RuleSet) -> ClassificationOutcome {
    let output = result.combined_output();
    if let Some(rule) = rules
        .rules
        .iter()
        .find(|rule| rule.matcher.matches(result.status, &output))
    {
        return rule.outcome();
    }

    match result.status {
        CommandStatus::TimedOut => Rule::new(
            Matcher::TimedOut,
            rules.on_timeout,
            "command timed out",
        )
        .outcome(),
        CommandStatus::Exited(0) => ClassificationOutcome::Pending,
        CommandStatus::Exited(code) => {
            ClassificationOutcome::PermanentFailure(format!("command exited with status {code}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creation_rules() -> RuleSet {
        RuleSet::new(vec![
            Rule::new(Matcher::contains("failed"), Verdict::Permanent, "create failed"),
            Rule::new(
                Matcher::contains("create succeeded"),
                Verdict::Success,
                "create succeeded",
            ),
        ])
    }

    #[test]
    fn first_matching_rule_wins() {
        let result = CommandResult::exited(0, "status: create succeeded\nlast op: failed");
        assert_eq!(
            classify(&result, &creation_rules()),
            ClassificationOutcome::PermanentFailure("create failed".to_string())
        );
    }

    #[test]
    fn success_marker() {
        let result = CommandResult::exited(0, "status: create succeeded");
        assert_eq!(
            classify(&result, &creation_rules()),
            ClassificationOutcome::Success
        );
    }

    #[test]
    fn unmatched_exit_zero_is_pending() {
        let result = CommandResult::exited(0, "status: create in progress");
        assert_eq!(
            classify(&result, &creation_rules()),
            ClassificationOutcome::Pending
        );
    }

    #[test]
    fn unmatched_non_zero_is_permanent() {
        let result = CommandResult::exited(1, "FAILED\nNot logged in");
        assert!(matches!(
            classify(&result, &RuleSet::new(Vec::new())),
            ClassificationOutcome::PermanentFailure(reason) if reason.contains("status 1")
        ));
    }

    #[test]
    fn timeout_is_transient_unless_overridden() {
        let result = CommandResult::timed_out();
        let rules = RuleSet::new(Vec::new());
        assert!(matches!(
            classify(&result, &rules),
            ClassificationOutcome::TransientFailure(_)
        ));
        let strict = rules.with_timeout_verdict(Verdict::Permanent);
        assert!(matches!(
            classify(&result, &strict),
            ClassificationOutcome::PermanentFailure(_)
        ));
    }

    #[test]
    fn classification_is_idempotent() {
        let rules = creation_rules();
        let result = CommandResult::exited(0, "update in progress");
        assert_eq!(classify(&result, &rules), classify(&result, &rules));
    }

    #[test]
    fn stderr_is_scanned_too() {
        let mut result = CommandResult::exited(0, "");
        result.stderr = b"create succeeded".to_vec();
        assert_eq!(
            classify(&result, &creation_rules()),
            ClassificationOutcome::Success
        );
    }

    #[test]
    fn line_matcher_requires_same_line() {
        let rules = RuleSet::new(vec![Rule::new(
            Matcher::line_contains_all(["redis-1", "failed"]),
            Verdict::Permanent,
            "delete failed",
        )]);
        let split = CommandResult::exited(0, "redis-1  delete in progress\nredis-2  failed");
        assert_eq!(classify(&split, &rules), ClassificationOutcome::Pending);
        let same = CommandResult::exited(0, "redis-1  delete failed");
        assert!(matches!(
            classify(&same, &rules),
            ClassificationOutcome::PermanentFailure(_)
        ));
    }

    #[test]
    fn conjunction_and_exit_code() {
        let rules = RuleSet::new(vec![Rule::new(
            Matcher::All(vec![Matcher::Exit(0), Matcher::absent("redis-1")]),
            Verdict::Success,
            "gone",
        )]);
        assert_eq!(
            classify(&CommandResult::exited(0, "No services found"), &rules),
            ClassificationOutcome::Success
        );
        // Absent name in an error listing must not count as gone.
        assert!(matches!(
            classify(&CommandResult::exited(1, "FAILED"), &rules),
            ClassificationOutcome::PermanentFailure(_)
        ));
    }

    #[test]
    fn regex_pattern() {
        let re = Regex::new(r"(?m)^status:\s+create succeeded$").expect("regex");
        let rules = RuleSet::new(vec![Rule::new(Matcher::Pattern(re), Verdict::Success, "ok")]);
        assert_eq!(
            classify(&CommandResult::exited(0, "name: x\nstatus:  create succeeded\n"), &rules),
            ClassificationOutcome::Success
        );
    }
}
