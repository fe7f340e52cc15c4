//! IAM provider interface and role orchestration
//!
//! [`IamApi`] is the narrow verb set the operator needs from the identity
//! provider, with provider error codes already mapped into a small local
//! taxonomy. The SDK binding lives behind this trait; everything above it is
//! provider-agnostic and testable with a mock.

mod aws;
mod orchestrator;

pub use aws::AwsIamClient;
pub use orchestrator::{RoleDrift, RoleOrchestrator};

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Tag marking roles as operator-managed
pub const MANAGED_BY_TAG_KEY: &str = "managed-by";

/// Value of the managed-by tag
pub const MANAGED_BY_TAG_VALUE: &str = "rolekeeper";

/// Tag recording which namespace owns a role; the ownership check compares
/// this tag before converging an existing role
pub const NAMESPACE_TAG_KEY: &str = "rolekeeper.dev/namespace";

/// Error taxonomy for the identity-provider surface
///
/// Provider error codes collapse into these categories at the trait
/// boundary; the orchestrator decides which are benign in which flow
/// (AlreadyExists is success in create flows, NotFound is success in delete
/// flows), and the controller alone decides retry cadence.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IamApiError {
    /// The entity already exists; success path in create flows
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The entity does not exist; success in delete flows, "needs create"
    /// in update flows
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider-side quota or rate limit; transient
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Provider unavailable or throttling; transient
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Anything else: malformed requests, provider-side validation failures
    #[error("{0}")]
    Other(String),
}

impl IamApiError {
    /// Whether the failure is transient from the provider's perspective
    ///
    /// Used for logging distinction only; the controller retries permanent
    /// errors too since local state may still need correction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LimitExceeded(_) | Self::ServiceUnavailable(_))
    }

    /// Map a provider error code into the local taxonomy
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "EntityAlreadyExists" => Self::AlreadyExists(message),
            "NoSuchEntity" => Self::NotFound(message),
            "LimitExceeded" => Self::LimitExceeded(message),
            "ServiceFailure" | "Throttling" => Self::ServiceUnavailable(message),
            _ => Self::Other(message),
        }
    }
}

/// Identity of a live IAM role
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleIdentity {
    /// The role's ARN
    pub arn: String,
    /// The role's stable unique ID
    pub role_id: String,
}

/// Observed state of a live IAM role, as the drift comparison consumes it
#[derive(Clone, Debug, Default)]
pub struct LiveRole {
    /// Role identity
    pub identity: RoleIdentity,
    /// Trust policy document JSON, decoded
    pub trust_policy_json: Option<String>,
    /// Attached permission boundary ARN, if any
    pub permissions_boundary_arn: Option<String>,
    /// Role tags; provider-assigned empty-key entries may be present
    pub tags: BTreeMap<String, String>,
}

/// The orchestrator's input value object
///
/// Rebuilt from the declaration and the current config snapshot on every
/// reconcile pass; never persisted.
#[derive(Clone, Debug, Default)]
pub struct RoleRequest {
    /// Computed role name
    pub role_name: String,
    /// Inline permission policy name
    pub policy_name: String,
    /// Role description
    pub description: String,
    /// Maximum session duration in seconds
    pub session_duration_secs: i32,
    /// Trust policy document JSON
    pub trust_policy_json: String,
    /// Permission policy document JSON
    pub permission_policy_json: String,
    /// Permission boundary ARN; empty skips the attachment
    pub permission_boundary_arn: String,
    /// Managed policies to attach; blank entries are skipped
    pub managed_policy_arns: Vec<String>,
    /// Tags to upsert, including the managed-by and namespace tags
    pub tags: BTreeMap<String, String>,
}

/// Inputs for role creation
#[derive(Clone, Debug, Default)]
pub struct CreateRoleInput {
    /// Role name
    pub role_name: String,
    /// Role description
    pub description: String,
    /// Maximum session duration in seconds
    pub session_duration_secs: i32,
    /// Trust policy document JSON
    pub trust_policy_json: String,
    /// Permission boundary ARN; empty omits the boundary
    pub permission_boundary_arn: String,
}

/// Narrow identity-provider verb set
///
/// Each call is synchronous from the caller's perspective and returns a
/// typed outcome. Implementations must not retry internally; retry cadence
/// is the controller's responsibility.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamApi: Send + Sync {
    /// Create a role with its trust policy, description, session duration,
    /// and permission boundary
    async fn create_role(&self, input: CreateRoleInput) -> Result<RoleIdentity, IamApiError>;

    /// Fetch a role and its observed configuration
    async fn get_role(&self, role_name: &str) -> Result<LiveRole, IamApiError>;

    /// Replace the role's trust (assume-role) policy document
    async fn update_assume_role_policy(
        &self,
        role_name: &str,
        trust_policy_json: &str,
    ) -> Result<(), IamApiError>;

    /// Upsert tags on the role
    async fn tag_role(
        &self,
        role_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), IamApiError>;

    /// Attach or refresh the role's permission boundary
    async fn put_permissions_boundary(
        &self,
        role_name: &str,
        boundary_arn: &str,
    ) -> Result<(), IamApiError>;

    /// Remove the role's permission boundary
    async fn delete_permissions_boundary(&self, role_name: &str) -> Result<(), IamApiError>;

    /// Attach a managed policy by ARN
    async fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), IamApiError>;

    /// Detach a managed policy by ARN
    async fn detach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), IamApiError>;

    /// Create or replace the role's inline permission policy
    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy_json: &str,
    ) -> Result<(), IamApiError>;

    /// Fetch the role's inline permission policy document JSON
    async fn get_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<String, IamApiError>;

    /// Delete the role's inline permission policy
    async fn delete_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<(), IamApiError>;

    /// Delete the role itself
    async fn delete_role(&self, role_name: &str) -> Result<(), IamApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_codes_map_into_the_local_taxonomy() {
        assert!(matches!(
            IamApiError::from_code("EntityAlreadyExists", "role exists"),
            IamApiError::AlreadyExists(_)
        ));
        assert!(matches!(
            IamApiError::from_code("NoSuchEntity", "no role"),
            IamApiError::NotFound(_)
        ));
        assert!(matches!(
            IamApiError::from_code("Throttling", "slow down"),
            IamApiError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            IamApiError::from_code("MalformedPolicyDocument", "bad json"),
            IamApiError::Other(_)
        ));
    }

    #[test]
    fn only_limit_and_availability_errors_are_transient() {
        assert!(IamApiError::LimitExceeded("x".into()).is_retryable());
        assert!(IamApiError::ServiceUnavailable("x".into()).is_retryable());
        assert!(!IamApiError::AlreadyExists("x".into()).is_retryable());
        assert!(!IamApiError::NotFound("x".into()).is_retryable());
        assert!(!IamApiError::Other("x".into()).is_retryable());
    }
}
