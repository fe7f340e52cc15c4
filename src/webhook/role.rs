//! IamRole admission handlers
//!
//! Validation denies with the full list of violations joined into one
//! message so a tenant fixes everything in one edit instead of playing
//! whack-a-mole. Mutation only defaults the policy document version.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use kube::api::{Api, ListParams};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use super::WebhookState;
use crate::config::ValidationConfig;
use crate::crd::IamRole;
use crate::policy::validation::{check_policy, check_quota};
use crate::policy::{build_trust_policy, QuotaOp, DEFAULT_POLICY_VERSION};
use crate::Error;

/// Validating admission handler
///
/// Create and Update run the full check set; Delete always passes (cleanup
/// is the finalizer's job, not admission's).
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<IamRole>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<IamRole> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!(error = %err, "malformed admission review");
            return Json(AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };

    let res = AdmissionResponse::from(&req);

    let op = match req.operation {
        Operation::Create => QuotaOp::Create,
        Operation::Update => QuotaOp::Update,
        _ => return Json(res.into_review()),
    };

    let Some(role) = req.object.as_ref() else {
        return Json(res.into_review());
    };
    let namespace = req.namespace.clone().unwrap_or_else(|| "default".to_string());

    let cfg = state.config.snapshot();
    let existing = match count_declarations(&state.kube, &namespace).await {
        Ok(count) => count,
        Err(err) => {
            // Fail closed: without a count the quota check cannot run.
            warn!(%namespace, error = %err, "could not count declarations, denying");
            return Json(res.deny(format!("quota check unavailable: {err}")).into_review());
        }
    };

    let violations = admission_violations(role, &cfg, existing, op);
    if violations.is_empty() {
        debug!(%namespace, role = %role.name_any(), "admission passed");
        Json(res.into_review())
    } else {
        info!(%namespace, role = %role.name_any(), count = violations.len(), "admission denied");
        Json(res.deny(violations.join("; ")).into_review())
    }
}

/// Mutating admission handler
///
/// Adds the default policy document version when the tenant omits it, so
/// every persisted record carries an explicit version.
pub async fn mutate_handler(
    Json(review): Json<AdmissionReview<IamRole>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<IamRole> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!(error = %err, "malformed admission review");
            return Json(AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };

    let res = AdmissionResponse::from(&req);

    let Some(role) = req.object.as_ref() else {
        return Json(res.into_review());
    };

    match default_version_patch(role) {
        None => Json(res.into_review()),
        Some(patch) => match res.with_patch(patch) {
            Ok(patched) => {
                debug!(role = %role.name_any(), "defaulted policy document version");
                Json(patched.into_review())
            }
            Err(err) => {
                warn!(error = %err, "could not serialize mutation patch");
                Json(AdmissionResponse::invalid(err.to_string()).into_review())
            }
        },
    }
}

/// All admission violations for one declaration, as messages
///
/// `existing` is the number of declarations currently in the namespace;
/// updates count themselves, creates do not exist in the store yet.
pub fn admission_violations(
    role: &IamRole,
    cfg: &ValidationConfig,
    existing: usize,
    op: QuotaOp,
) -> Vec<String> {
    let name = role.name_any();

    let mut violations: Vec<String> = check_policy(&name, &role.spec.policy_document, cfg)
        .iter()
        .map(ToString::to_string)
        .collect();

    if let Err(err) = build_trust_policy(role.spec.trust_policy.as_ref(), cfg) {
        violations.push(format!("spec.trustPolicy: {err}"));
    }

    if let Some(quota) = check_quota(existing, cfg.max_roles_per_namespace, op) {
        violations.push(quota.to_string());
    }

    violations
}

/// JSON patch defaulting the policy document version, if it is missing
pub fn default_version_patch(role: &IamRole) -> Option<json_patch::Patch> {
    if !role.spec.policy_document.version.is_empty() {
        return None;
    }

    let patch = json!([
        {
            "op": "add",
            "path": "/spec/policyDocument/Version",
            "value": DEFAULT_POLICY_VERSION,
        }
    ]);
    // Shape is static; deserialization cannot fail.
    serde_json::from_value(patch).ok()
}

async fn count_declarations(client: &Client, namespace: &str) -> Result<usize, Error> {
    let api: Api<IamRole> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::IamRoleSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn test_config() -> ValidationConfig {
        ValidationConfig {
            allowed_action_prefixes: vec!["s3:".to_string()],
            restricted_resources: vec!["cluster-state".to_string()],
            max_roles_per_namespace: 3,
            default_trust_principal_arns: vec!["arn:aws:iam::123456789012:role/node".to_string()],
            ..ValidationConfig::default()
        }
    }

    fn role_from(spec: serde_json::Value) -> IamRole {
        IamRole {
            metadata: ObjectMeta {
                name: Some("my-role".to_string()),
                namespace: Some("team-a".to_string()),
                ..Default::default()
            },
            spec: serde_json::from_value::<IamRoleSpec>(spec).expect("valid spec"),
            status: None,
        }
    }

    fn valid_role() -> IamRole {
        role_from(json!({
            "policyDocument": {
                "Version": "2012-10-17",
                "Statement": [
                    {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::team-a-data/*"}
                ]
            }
        }))
    }

    /// Story: a compliant declaration under quota passes cleanly
    #[test]
    fn story_compliant_declaration_passes() {
        let violations = admission_violations(&valid_role(), &test_config(), 0, QuotaOp::Create);
        assert!(violations.is_empty(), "unexpected: {violations:?}");
    }

    /// Story: a tenant asking for EC2 in an S3-only cluster is told exactly
    /// which action was refused
    #[test]
    fn story_forbidden_action_names_the_action() {
        let role = role_from(json!({
            "policyDocument": {
                "Version": "2012-10-17",
                "Statement": [
                    {"Effect": "Allow", "Action": "ec2:RunInstances", "Resource": "*"}
                ]
            }
        }));

        let violations = admission_violations(&role, &test_config(), 0, QuotaOp::Create);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("ec2:RunInstances"));
    }

    /// Every failing check contributes its own violation; they accumulate
    #[test]
    fn violations_accumulate_across_checks() {
        let role = role_from(json!({
            "policyDocument": {
                "Version": "2012-10-17",
                "Statement": [
                    {"Effect": "Allow", "Action": "ec2:RunInstances",
                     "Resource": "arn:aws:s3:::cluster-state/*"}
                ]
            }
        }));

        // Forbidden action, forbidden resource, and quota all fire at once.
        let violations = admission_violations(&role, &test_config(), 3, QuotaOp::Create);
        assert_eq!(violations.len(), 3);
    }

    /// Quota: creating the Nth declaration when max is N fails, the
    /// (N-1)th succeeds; updates tolerate sitting exactly at the maximum
    #[test]
    fn quota_asymmetry_between_create_and_update() {
        let cfg = test_config(); // max 3
        let role = valid_role();

        assert!(admission_violations(&role, &cfg, 1, QuotaOp::Create).is_empty());
        assert_eq!(admission_violations(&role, &cfg, 2, QuotaOp::Create).len(), 1);

        assert!(admission_violations(&role, &cfg, 3, QuotaOp::Update).is_empty());
        assert_eq!(admission_violations(&role, &cfg, 4, QuotaOp::Update).len(), 1);
    }

    /// A service principal outside the provider's domain is refused at
    /// admission, before the orchestrator ever sees it
    #[test]
    fn bad_trust_override_is_refused() {
        let role = role_from(json!({
            "policyDocument": {
                "Version": "2012-10-17",
                "Statement": [
                    {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "*"}
                ]
            },
            "trustPolicy": {
                "servicePrincipal": "evil.example.com"
            }
        }));

        let violations = admission_violations(&role, &test_config(), 0, QuotaOp::Create);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("spec.trustPolicy"));
    }

    mod version_defaulting {
        use super::*;

        #[test]
        fn missing_version_gets_the_default() {
            let role = role_from(json!({
                "policyDocument": {
                    "Statement": [
                        {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "*"}
                    ]
                }
            }));

            let patch = default_version_patch(&role).expect("patch expected");
            let value = serde_json::to_value(&patch).unwrap();
            assert_eq!(value[0]["op"], json!("add"));
            assert_eq!(value[0]["path"], json!("/spec/policyDocument/Version"));
            assert_eq!(value[0]["value"], json!(DEFAULT_POLICY_VERSION));
        }

        #[test]
        fn explicit_version_is_left_alone() {
            assert!(default_version_patch(&valid_role()).is_none());
        }
    }
}
