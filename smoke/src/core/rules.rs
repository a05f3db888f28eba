//! Classification rule sets for each platform operation.

use crate::core::classifier::{Matcher, Rule, RuleSet, Verdict};

pub const CREATE_SUCCEEDED: &str = "create succeeded";
pub const UPDATE_SUCCEEDED: &str = "update succeeded";
pub const FAILED: &str = "failed";
pub const NO_SERVICES_FOUND: &str = "No services found";
pub const USER_ALREADY_EXISTS: &str = "scim_resource_already_exists";
pub const INSTANCE_LIMIT_REACHED: &str = "instance limit for this service has been reached";
pub const TLS_PROTOCOL_NOT_SUPPORTED: &str = "protocol not supported:";

/// A plain CLI call: exit 0 is success, anything else is retried until the budget runs out.
pub fn command_succeeds() -> RuleSet {
    RuleSet::new(vec![
        Rule::new(Matcher::Exit(0), Verdict::Success, "exit 0"),
        Rule::new(Matcher::Always, Verdict::Transient, "command did not exit 0"),
    ])
}

/// `cf service <instance>` while a create is in flight.
pub fn await_service_creation() -> RuleSet {
    await_last_operation(CREATE_SUCCEEDED, "service creation failed")
}

/// `cf service <instance>` while an update is in flight.
pub fn await_service_update() -> RuleSet {
    await_last_operation(UPDATE_SUCCEEDED, "service update failed")
}

fn await_last_operation(success_marker: &str, failure_reason: &str) -> RuleSet {
    RuleSet::new(vec![
        Rule::new(Matcher::contains(FAILED), Verdict::Permanent, failure_reason),
        Rule::new(
            Matcher::All(vec![Matcher::Exit(0), Matcher::contains(success_marker)]),
            Verdict::Success,
            success_marker,
        ),
    ])
}

/// `cf services` while `instance` is being deleted.
pub fn await_service_deletion(instance: &str) -> RuleSet {
    RuleSet::new(vec![
        Rule::new(
            Matcher::line_contains_all([instance, FAILED]),
            Verdict::Permanent,
            format!("operation on service instance '{instance}' failed"),
        ),
        Rule::new(
            Matcher::All(vec![Matcher::Exit(0), Matcher::absent(instance)]),
            Verdict::Success,
            "instance no longer listed",
        ),
    ])
}

/// `cf delete-service -f <instance>` that must eventually be accepted.
pub fn delete_service_accepted() -> RuleSet {
    RuleSet::new(vec![
        Rule::new(Matcher::Exit(0), Verdict::Success, "delete accepted"),
        Rule::new(
            Matcher::Always,
            Verdict::Transient,
            "delete-service was rejected",
        ),
    ])
}

/// `cf service <instance>` until the platform reports it is gone.
pub fn service_instance_gone(instance: &str) -> RuleSet {
    RuleSet::new(vec![
        Rule::new(
            Matcher::contains(format!("Service instance {instance} not found")),
            Verdict::Success,
            "instance not found",
        ),
        Rule::new(
            Matcher::contains("delete failed"),
            Verdict::Permanent,
            format!("deletion of service instance '{instance}' failed"),
        ),
        Rule::new(
            Matcher::Exit(0),
            Verdict::Pending,
            "instance still present",
        ),
    ])
}

/// `cf services` until nothing is left in the space.
pub fn no_services() -> RuleSet {
    RuleSet::new(vec![
        Rule::new(
            Matcher::contains(NO_SERVICES_FOUND),
            Verdict::Success,
            NO_SERVICES_FOUND,
        ),
        Rule::new(Matcher::Exit(0), Verdict::Pending, "services remain"),
    ])
}

/// `cf create-user`: an existing user is as good as a new one.
pub fn create_user() -> RuleSet {
    RuleSet::new(vec![
        Rule::new(Matcher::Exit(0), Verdict::Success, "user created"),
        Rule::new(
            Matcher::contains(USER_ALREADY_EXISTS),
            Verdict::Success,
            "user already exists",
        ),
        Rule::new(Matcher::Always, Verdict::Transient, "failed to create user"),
    ])
}

/// `cf create-service`: the plan quota being full is reported as permanent so the
/// caller can turn it into a skip.
pub fn create_service() -> RuleSet {
    RuleSet::new(vec![
        Rule::new(
            Matcher::contains(INSTANCE_LIMIT_REACHED),
            Verdict::Permanent,
            INSTANCE_LIMIT_REACHED,
        ),
        Rule::new(Matcher::Exit(0), Verdict::Success, "create accepted"),
        Rule::new(
            Matcher::Always,
            Verdict::Transient,
            "create-service did not exit 0",
        ),
    ])
}

/// HTTP probe whose body must contain `expected`, whatever the status code.
pub fn response_contains(expected: &str) -> RuleSet {
    RuleSet::new(vec![
        Rule::new(
            Matcher::contains(expected),
            Verdict::Success,
            "expected body",
        ),
        Rule::new(
            Matcher::Always,
            Verdict::Transient,
            format!("response did not contain '{expected}'"),
        ),
    ])
}

/// HTTP probe that only needs a 2xx.
pub fn response_ok() -> RuleSet {
    command_succeeds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::classify;
    use crate::core::types::{ClassificationOutcome, CommandResult};

    #[test]
    fn creation_in_progress_is_pending() {
        let out = CommandResult::exited(0, "status:    create in progress\n");
        assert_eq!(
            classify(&out, &await_service_creation()),
            ClassificationOutcome::Pending
        );
    }

    #[test]
    fn creation_failure_beats_success_marker() {
        let out = CommandResult::exited(0, "create succeeded\nlast operation failed\n");
        assert!(matches!(
            classify(&out, &await_service_creation()),
            ClassificationOutcome::PermanentFailure(_)
        ));
    }

    #[test]
    fn update_needs_its_own_marker() {
        let out = CommandResult::exited(0, "status: create succeeded");
        assert_eq!(
            classify(&out, &await_service_update()),
            ClassificationOutcome::Pending
        );
        let out = CommandResult::exited(0, "status: update succeeded");
        assert_eq!(
            classify(&out, &await_service_update()),
            ClassificationOutcome::Success
        );
    }

    #[test]
    fn deletion_tracks_listing() {
        let rules = await_service_deletion("redis-abc");
        let listed = CommandResult::exited(0, "redis-abc   p-redis   delete in progress\n");
        assert_eq!(classify(&listed, &rules), ClassificationOutcome::Pending);
        let gone = CommandResult::exited(0, "No services found\n");
        assert_eq!(classify(&gone, &rules), ClassificationOutcome::Success);
        let failed = CommandResult::exited(0, "redis-abc   p-redis   delete failed\n");
        assert!(matches!(
            classify(&failed, &rules),
            ClassificationOutcome::PermanentFailure(_)
        ));
        let other_failed = CommandResult::exited(0, "redis-xyz  delete failed\n");
        assert_eq!(classify(&other_failed, &rules), ClassificationOutcome::Success);
    }

    #[test]
    fn gone_matches_not_found_even_on_non_zero_exit() {
        let rules = service_instance_gone("redis-abc");
        let out = CommandResult::exited(1, "FAILED\nService instance redis-abc not found\n");
        assert_eq!(classify(&out, &rules), ClassificationOutcome::Success);
        let present = CommandResult::exited(0, "name: redis-abc\nstatus: delete in progress");
        assert_eq!(classify(&present, &rules), ClassificationOutcome::Pending);
    }

    #[test]
    fn existing_user_is_success() {
        let out = CommandResult::exited(1, "error: scim_resource_already_exists");
        assert_eq!(classify(&out, &create_user()), ClassificationOutcome::Success);
    }

    #[test]
    fn plan_quota_is_permanent() {
        let out = CommandResult::exited(
            1,
            "FAILED\nService broker error: instance limit for this service has been reached",
        );
        assert!(matches!(
            classify(&out, &create_service()),
            ClassificationOutcome::PermanentFailure(reason) if reason == INSTANCE_LIMIT_REACHED
        ));
    }

    #[test]
    fn tls_rejection_body_matches_on_error_status() {
        let mut out = CommandResult::exited(1, "protocol not supported: tlsv1.1");
        out.stderr = b"HTTP 500".to_vec();
        assert_eq!(
            classify(&out, &response_contains(TLS_PROTOCOL_NOT_SUPPORTED)),
            ClassificationOutcome::Success
        );
    }

    #[test]
    fn plain_command_failure_is_retryable() {
        let out = CommandResult::exited(1, "FAILED\nServer error, status code: 502");
        assert!(classify(&out, &command_succeeds()).is_retryable());
    }
}
