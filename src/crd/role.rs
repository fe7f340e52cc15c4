//! IamRole Custom Resource Definition
//!
//! An IamRole is a tenant's declaration of one desired AWS IAM role. Identity
//! is (namespace, name); the computed role name in IAM is a deterministic
//! function of the namespace, so one namespace's declarations can never
//! shadow another's roles.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{LifecycleState, TrustPolicyOverride};
use crate::policy::PolicyDocument;

/// Default maximum session duration for assumed roles (one hour)
pub const DEFAULT_SESSION_DURATION_SECS: i32 = 3600;

/// Specification for an IamRole declaration
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rolekeeper.dev",
    version = "v1alpha1",
    kind = "IamRole",
    plural = "iamroles",
    shortname = "irole",
    status = "IamRoleStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"RoleName","type":"string","jsonPath":".status.roleName"}"#,
    printcolumn = r#"{"name":"Retries","type":"integer","jsonPath":".status.retryCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleSpec {
    /// The permission policy the role should carry
    pub policy_document: PolicyDocument,

    /// Optional trust policy override; cluster defaults apply when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_policy: Option<TrustPolicyOverride>,

    /// Human-readable role description propagated to IAM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_description: Option<String>,

    /// Maximum session duration in seconds for role assumption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration_seconds: Option<i32>,

    /// Additional tags stamped onto the IAM role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl IamRoleSpec {
    /// Session duration, defaulted when the tenant does not set one
    pub fn session_duration(&self) -> i32 {
        self.session_duration_seconds
            .unwrap_or(DEFAULT_SESSION_DURATION_SECS)
    }
}

/// Status subresource for an IamRole
///
/// Written by the controller as a separate write from metadata changes so a
/// crash between the two leaves the record idempotent to retry.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleStatus {
    /// Computed IAM role name (prefix + namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// ARN of the reconciled role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,

    /// Stable unique ID of the reconciled role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,

    /// Current lifecycle state
    #[serde(default)]
    pub state: LifecycleState,

    /// Consecutive failures in the current phase; drives linear backoff
    #[serde(default)]
    pub retry_count: u32,

    /// Human-readable message about the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC 3339 timestamp of the last status transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl IamRoleStatus {
    /// Create a new status in the given state, stamped with the current time
    pub fn with_state(state: LifecycleState) -> Self {
        Self {
            state,
            last_update_time: Some(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }

    /// Set the computed role name and return self for chaining
    pub fn role_name(mut self, name: impl Into<String>) -> Self {
        self.role_name = Some(name.into());
        self
    }

    /// Set the role identity and return self for chaining
    pub fn identity(mut self, arn: impl Into<String>, id: impl Into<String>) -> Self {
        self.role_arn = Some(arn.into());
        self.role_id = Some(id.into());
        self
    }

    /// Set the retry count and return self for chaining
    pub fn retries(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}
