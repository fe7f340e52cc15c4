//! Policy validation engine
//!
//! Stateless predicate functions over a declaration's permission policy,
//! consulted by the admission webhook before a record is persisted and again
//! by the reconciler on every pass (configuration may have changed since
//! admission). Checks are independent and cumulative; callers collect every
//! failure rather than stopping at the first.

use crate::config::ValidationConfig;
use crate::policy::document::{Effect, PolicyDocument};

/// Action prefix that triggers the narrower S3 resource blacklist
const S3_ACTION_PREFIX: &str = "s3:";

/// Total name budget imposed by downstream systems
const MAX_NAME_BUDGET: usize = 63;

/// Room reserved for an appended timestamp suffix
const RESERVED_SUFFIX_LEN: usize = 11;

/// Longest declaration name that still leaves room for the suffix
pub const MAX_DECLARATION_NAME_LEN: usize = MAX_NAME_BUDGET - RESERVED_SUFFIX_LEN;

/// Why a field failed validation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationReason {
    /// An Allow statement grants an action outside the configured whitelist
    ForbiddenAction,
    /// An Allow statement references a blacklisted resource
    ForbiddenResource,
    /// The namespace is at its declaration quota
    QuotaExceeded,
    /// The declaration name leaves no room for the downstream suffix
    NameTooLong,
}

impl std::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ForbiddenAction => "ForbiddenAction",
            Self::ForbiddenResource => "ForbiddenResource",
            Self::QuotaExceeded => "QuotaExceeded",
            Self::NameTooLong => "NameTooLong",
        };
        f.write_str(s)
    }
}

/// One structured validation failure, addressed to the offending field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// JSON path of the offending field
    pub field: String,
    /// Failure category
    pub reason: ValidationReason,
    /// Human-readable explanation
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, reason: ValidationReason, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.field, self.reason, self.message)
    }
}

/// Which admission operation a quota check applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaOp {
    /// A new declaration is being created
    Create,
    /// An existing declaration is being updated in place
    Update,
}

/// Check every Allow statement's actions against the configured prefix
/// whitelist
///
/// Deny statements are exempt: policy restrictions apply only to permissions
/// actually granted. Statements granting any S3 action additionally have each
/// of their resources checked for exact membership in the S3 blacklist, a
/// narrower service-specific rule distinct from [`check_resources`].
pub fn check_actions(doc: &PolicyDocument, cfg: &ValidationConfig) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for (i, stmt) in doc.statement.iter().enumerate() {
        if stmt.effect != Effect::Allow {
            continue;
        }

        let mut grants_s3 = false;
        for action in &stmt.action {
            if action.starts_with(S3_ACTION_PREFIX) {
                grants_s3 = true;
            }
            let allowed = cfg
                .allowed_action_prefixes
                .iter()
                .any(|prefix| action.starts_with(prefix));
            if !allowed {
                errors.push(FieldError::new(
                    format!("spec.policyDocument.Statement[{i}].Action"),
                    ValidationReason::ForbiddenAction,
                    format!("action {action} does not match any allowed prefix"),
                ));
            }
        }

        if grants_s3 {
            for resource in &stmt.resource {
                if cfg.restricted_s3_resources.iter().any(|r| r == resource) {
                    errors.push(FieldError::new(
                        format!("spec.policyDocument.Statement[{i}].Resource"),
                        ValidationReason::ForbiddenResource,
                        format!("s3 resource {resource} is restricted"),
                    ));
                }
            }
        }
    }

    errors
}

/// Check every Allow statement's resources for substring containment of any
/// configured blacklist entry
pub fn check_resources(doc: &PolicyDocument, cfg: &ValidationConfig) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for (i, stmt) in doc.statement.iter().enumerate() {
        if stmt.effect != Effect::Allow {
            continue;
        }
        for resource in &stmt.resource {
            if let Some(entry) = cfg
                .restricted_resources
                .iter()
                .find(|entry| resource.contains(entry.as_str()))
            {
                errors.push(FieldError::new(
                    format!("spec.policyDocument.Statement[{i}].Resource"),
                    ValidationReason::ForbiddenResource,
                    format!("resource {resource} matches restricted entry {entry}"),
                ));
            }
        }
    }

    errors
}

/// Check the per-namespace declaration quota
///
/// Create uses `existing + 1 >= max`, update uses `existing > max`. The
/// asymmetry deliberately tolerates exactly one in-place update at the
/// boundary and is preserved as documented behavior.
pub fn check_quota(existing: usize, max: usize, op: QuotaOp) -> Option<FieldError> {
    let over = match op {
        QuotaOp::Create => existing + 1 >= max,
        QuotaOp::Update => existing > max,
    };
    over.then(|| {
        FieldError::new(
            "metadata.namespace",
            ValidationReason::QuotaExceeded,
            format!("namespace holds {existing} declarations with a maximum of {max}"),
        )
    })
}

/// Check that the declaration name leaves room for the downstream suffix
pub fn check_name_length(name: &str) -> Option<FieldError> {
    (name.len() > MAX_DECLARATION_NAME_LEN).then(|| {
        FieldError::new(
            "metadata.name",
            ValidationReason::NameTooLong,
            format!(
                "name is {} characters, maximum is {MAX_DECLARATION_NAME_LEN}",
                name.len()
            ),
        )
    })
}

/// Run the stateless checks (action, resource, name) and collect every
/// failure
///
/// Quota is checked separately by callers that can count the namespace's
/// existing declarations.
pub fn check_policy(name: &str, doc: &PolicyDocument, cfg: &ValidationConfig) -> Vec<FieldError> {
    let mut errors = check_actions(doc, cfg);
    errors.extend(check_resources(doc, cfg));
    errors.extend(check_name_length(name));
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(statements: serde_json::Value) -> PolicyDocument {
        serde_json::from_value(json!({"Version": "2012-10-17", "Statement": statements}))
            .expect("valid document")
    }

    fn cfg() -> ValidationConfig {
        ValidationConfig {
            allowed_action_prefixes: vec!["s3:".into(), "sts:".into()],
            restricted_resources: vec!["kops".into()],
            restricted_s3_resources: vec!["arn:aws:s3:::cluster-state".into()],
            ..Default::default()
        }
    }

    // =========================================================================
    // Action check
    // =========================================================================

    /// Story: a tenant granting an action outside the whitelist is rejected
    #[test]
    fn story_allow_outside_whitelist_is_forbidden() {
        let doc = doc(json!([
            {"Effect": "Allow", "Action": "ec2:RunInstances", "Resource": "*"}
        ]));
        let errors = check_actions(&doc, &cfg());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, ValidationReason::ForbiddenAction);
        assert!(errors[0].field.contains("Statement[0].Action"));
    }

    /// Story: Deny statements are exempt — restricting what a tenant may
    /// forbid would only weaken their policies
    #[test]
    fn story_deny_statements_never_fail_the_action_check() {
        let doc = doc(json!([
            {"Effect": "Deny", "Action": "ec2:RunInstances", "Resource": "*"},
            {"Effect": "Deny", "Action": "*", "Resource": "*"}
        ]));
        assert!(check_actions(&doc, &cfg()).is_empty());
    }

    #[test]
    fn whitelisted_actions_pass() {
        let doc = doc(json!([
            {"Effect": "Allow", "Action": ["s3:GetObject", "sts:AssumeRole"], "Resource": "*"}
        ]));
        assert!(check_actions(&doc, &cfg()).is_empty());
    }

    /// The S3 blacklist is exact-match and only consulted for statements
    /// that grant S3 actions
    #[test]
    fn s3_statements_check_the_exact_s3_blacklist() {
        let restricted = doc(json!([
            {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::cluster-state"}
        ]));
        let errors = check_actions(&restricted, &cfg());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, ValidationReason::ForbiddenResource);

        // Substring of a blacklisted entry does not match; the rule is exact
        let near_miss = doc(json!([
            {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::cluster-state-backup"}
        ]));
        assert!(check_actions(&near_miss, &cfg()).is_empty());

        // Same resource under a non-S3 action never consults the S3 list
        let non_s3 = doc(json!([
            {"Effect": "Allow", "Action": "sts:AssumeRole", "Resource": "arn:aws:s3:::cluster-state"}
        ]));
        assert!(check_actions(&non_s3, &cfg()).is_empty());
    }

    // =========================================================================
    // Resource check
    // =========================================================================

    /// Story: the general blacklist matches by substring, catching any ARN
    /// that touches protected infrastructure
    #[test]
    fn story_blacklisted_substring_in_allow_resource_is_forbidden() {
        let doc = doc(json!([
            {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::kops-state-store/*"}
        ]));
        let errors = check_resources(&doc, &cfg());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, ValidationReason::ForbiddenResource);
    }

    #[test]
    fn deny_statements_are_exempt_from_the_resource_check() {
        let doc = doc(json!([
            {"Effect": "Deny", "Action": "s3:*", "Resource": "arn:aws:s3:::kops-state-store/*"}
        ]));
        assert!(check_resources(&doc, &cfg()).is_empty());
    }

    // =========================================================================
    // Quota check
    // =========================================================================

    /// Creating the Nth declaration when max is N fails; the (N-1)th
    /// succeeds. Updates tolerate the boundary but not an already-over
    /// namespace. The asymmetry is documented behavior.
    #[test]
    fn quota_boundaries_match_the_documented_asymmetry() {
        let max = 5;

        // (N-1)th create: 3 existing -> becomes 4 of 5
        assert!(check_quota(3, max, QuotaOp::Create).is_none());
        // Nth create: 4 existing -> would become 5 of 5
        assert!(check_quota(4, max, QuotaOp::Create).is_some());

        // Updating with exactly N existing succeeds
        assert!(check_quota(5, max, QuotaOp::Update).is_none());
        // Updating when the namespace already holds N+1 fails
        assert!(check_quota(6, max, QuotaOp::Update).is_some());
    }

    // =========================================================================
    // Name-length check
    // =========================================================================

    #[test]
    fn name_length_boundary_is_52_characters() {
        let ok = "a".repeat(52);
        assert!(check_name_length(&ok).is_none());

        let too_long = "a".repeat(56);
        let err = check_name_length(&too_long).unwrap();
        assert_eq!(err.reason, ValidationReason::NameTooLong);
        assert_eq!(err.field, "metadata.name");
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Story: all checks are cumulative — the tenant sees every violation at
    /// once rather than fixing them one admission attempt at a time
    #[test]
    fn story_check_policy_collects_every_failure() {
        let doc = doc(json!([
            {"Effect": "Allow", "Action": "ec2:RunInstances", "Resource": "arn:aws:s3:::kops-state-store"}
        ]));
        let name = "b".repeat(60);

        let errors = check_policy(&name, &doc, &cfg());
        let reasons: Vec<_> = errors.iter().map(|e| e.reason).collect();
        assert!(reasons.contains(&ValidationReason::ForbiddenAction));
        assert!(reasons.contains(&ValidationReason::ForbiddenResource));
        assert!(reasons.contains(&ValidationReason::NameTooLong));
    }
}
