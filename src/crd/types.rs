//! Supporting types for the IamRole CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a declared role
///
/// Exactly one value holds at any time; transitions are owned by the
/// reconciliation controller's state machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum LifecycleState {
    /// Declaration observed, no IAM state converged yet
    #[default]
    New,
    /// Initial convergence underway
    CreateInProgress,
    /// Initial convergence failed; retried on the backoff schedule
    CreateError,
    /// Declared and live state converged
    Ready,
    /// Re-convergence after a spec change or drift underway
    UpdateInProgress,
    /// Re-convergence failed; retried on the backoff schedule
    UpdateError,
    /// Deletion marker observed, IAM cleanup underway
    DeleteInProgress,
}

impl LifecycleState {
    /// True for the two error states
    pub fn is_error(&self) -> bool {
        matches!(self, Self::CreateError | Self::UpdateError)
    }

    /// True once initial convergence has succeeded at least once
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// The error state matching the current phase: create-flow states fail
    /// into CreateError, everything after first readiness into UpdateError
    pub fn error_state(&self) -> Self {
        match self {
            Self::New | Self::CreateInProgress | Self::CreateError => Self::CreateError,
            _ => Self::UpdateError,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "New",
            Self::CreateInProgress => "CreateInProgress",
            Self::CreateError => "CreateError",
            Self::Ready => "Ready",
            Self::UpdateInProgress => "UpdateInProgress",
            Self::UpdateError => "UpdateError",
            Self::DeleteInProgress => "DeleteInProgress",
        };
        f.write_str(s)
    }
}

/// Tenant-supplied trust policy override
///
/// When absent, the configured default principal ARNs apply. The federated
/// OIDC form (providerArn + subject) and the AWS/service form are mutually
/// exclusive in the built document; a federated override wins.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrustPolicyOverride {
    /// IAM principal ARNs allowed to assume the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_principal_arns: Option<Vec<String>>,

    /// Service principal; must end with the provider's service domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_principal: Option<String>,

    /// Federated OIDC provider ARN for web-identity assumption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_provider_arn: Option<String>,

    /// Subject the web-identity token must carry
    /// (e.g. "system:serviceaccount:&lt;namespace&gt;:&lt;name&gt;")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_subject: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_new() {
        assert_eq!(LifecycleState::default(), LifecycleState::New);
    }

    #[test]
    fn error_state_tracks_the_current_phase() {
        assert_eq!(LifecycleState::New.error_state(), LifecycleState::CreateError);
        assert_eq!(
            LifecycleState::CreateError.error_state(),
            LifecycleState::CreateError
        );
        assert_eq!(LifecycleState::Ready.error_state(), LifecycleState::UpdateError);
        assert_eq!(
            LifecycleState::UpdateError.error_state(),
            LifecycleState::UpdateError
        );
    }

    #[test]
    fn states_serialize_as_pascal_case_names() {
        let json = serde_json::to_string(&LifecycleState::CreateInProgress).unwrap();
        assert_eq!(json, "\"CreateInProgress\"");
    }
}
