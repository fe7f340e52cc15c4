//! Idempotent role orchestration against the identity provider
//!
//! The orchestrator exposes verbs, not a state machine: each one tolerates
//! "already exists" and "not found" as non-fatal outcomes so that a retry
//! from the top after any partial failure converges rather than compounding.
//! No retry happens here; cadence is owned by the controller one level up.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    CreateRoleInput, IamApi, IamApiError, LiveRole, RoleIdentity, RoleRequest, NAMESPACE_TAG_KEY,
};
use crate::policy::{PolicyDocument, TrustPolicyDocument};
use crate::{Error, Result};

/// Outcome of a drift comparison, reporting the first mismatch found
///
/// Checks run in a fixed order and short-circuit; all four must match for
/// the role to be in sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleDrift {
    /// Declared and live state match structurally
    InSync,
    /// Inline permission policy documents differ
    PermissionPolicy,
    /// Trust policy documents differ
    TrustPolicy,
    /// Permission boundary ARNs differ
    PermissionBoundary,
    /// Tag sets differ
    Tags,
}

impl std::fmt::Display for RoleDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InSync => "in sync",
            Self::PermissionPolicy => "permission policy drift",
            Self::TrustPolicy => "trust policy drift",
            Self::PermissionBoundary => "permission boundary drift",
            Self::Tags => "tag drift",
        };
        f.write_str(s)
    }
}

/// Translates validated declarations into idempotent provider calls
pub struct RoleOrchestrator {
    api: Arc<dyn IamApi>,
}

impl RoleOrchestrator {
    /// Create an orchestrator over the given provider interface
    pub fn new(api: Arc<dyn IamApi>) -> Self {
        Self { api }
    }

    /// Converge the role named in the request to its declared state
    ///
    /// Sequence: fetch (ownership check) -> create or refresh trust ->
    /// tag -> permission boundary (attached, or removed when the
    /// configuration no longer carries one) -> managed policies -> inline
    /// policy.
    /// The first failing step aborts and surfaces its error; no rollback is
    /// attempted, the next pass retries from the top relying on the
    /// idempotence of every step.
    pub async fn ensure_role(&self, req: &RoleRequest) -> Result<RoleIdentity> {
        let existing = match self.api.get_role(&req.role_name).await {
            Ok(live) => {
                self.check_ownership(req, &live)?;
                Some(live)
            }
            Err(IamApiError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let live_has_boundary = existing
            .as_ref()
            .is_some_and(|l| l.permissions_boundary_arn.is_some());

        let identity = match existing {
            Some(live) => {
                debug!(role = %req.role_name, "role exists, refreshing trust policy");
                self.api
                    .update_assume_role_policy(&req.role_name, &req.trust_policy_json)
                    .await?;
                live.identity
            }
            None => self.create(req).await?,
        };

        self.api.tag_role(&req.role_name, &req.tags).await?;

        if !req.permission_boundary_arn.is_empty() {
            self.api
                .put_permissions_boundary(&req.role_name, &req.permission_boundary_arn)
                .await?;
        } else if live_has_boundary {
            // A boundary cleared from configuration must come off the live
            // role, or the drift check would flag it on every pass.
            match self.api.delete_permissions_boundary(&req.role_name).await {
                Ok(()) | Err(IamApiError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        for arn in &req.managed_policy_arns {
            if arn.trim().is_empty() {
                continue;
            }
            self.api.attach_role_policy(&req.role_name, arn).await?;
        }

        self.api
            .put_role_policy(&req.role_name, &req.policy_name, &req.permission_policy_json)
            .await?;

        info!(role = %req.role_name, arn = %identity.arn, "role converged");
        Ok(identity)
    }

    /// Cheaper variant used when only existence and identity are needed
    ///
    /// Skips the full convergence sequence: fetch, create on absence, and
    /// treat a creation race as success.
    pub async fn get_or_create_role(&self, req: &RoleRequest) -> Result<RoleIdentity> {
        match self.api.get_role(&req.role_name).await {
            Ok(live) => {
                self.check_ownership(req, &live)?;
                Ok(live.identity)
            }
            Err(IamApiError::NotFound(_)) => self.create(req).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Tear down the role: detach managed policies, delete the inline
    /// policy, delete the role
    ///
    /// "Not found" at any step means the work is already done and is
    /// treated as success.
    pub async fn delete_role(
        &self,
        role_name: &str,
        policy_name: &str,
        managed_policy_arns: &[String],
    ) -> Result<()> {
        for arn in managed_policy_arns {
            if arn.trim().is_empty() {
                continue;
            }
            match self.api.detach_role_policy(role_name, arn).await {
                Ok(()) | Err(IamApiError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match self.api.delete_role_policy(role_name, policy_name).await {
            Ok(()) | Err(IamApiError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match self.api.delete_role(role_name).await {
            Ok(()) => {
                info!(role = %role_name, "role deleted");
                Ok(())
            }
            Err(IamApiError::NotFound(_)) => {
                debug!(role = %role_name, "role already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the live role matches the declared state
    ///
    /// An absent role or absent inline policy is simply "not in sync";
    /// provider failures propagate.
    pub async fn is_in_sync(&self, req: &RoleRequest) -> Result<bool> {
        let live = match self.api.get_role(&req.role_name).await {
            Ok(live) => live,
            Err(IamApiError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let inline = match self.api.get_role_policy(&req.role_name, &req.policy_name).await {
            Ok(doc) => Some(doc),
            Err(IamApiError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let drift = compare_role(req, &live, inline.as_deref());
        if drift != RoleDrift::InSync {
            debug!(role = %req.role_name, %drift, "drift detected");
        }
        Ok(drift == RoleDrift::InSync)
    }

    async fn create(&self, req: &RoleRequest) -> Result<RoleIdentity> {
        let input = CreateRoleInput {
            role_name: req.role_name.clone(),
            description: req.description.clone(),
            session_duration_secs: req.session_duration_secs,
            trust_policy_json: req.trust_policy_json.clone(),
            permission_boundary_arn: req.permission_boundary_arn.clone(),
        };

        match self.api.create_role(input).await {
            Ok(identity) => {
                info!(role = %req.role_name, "role created");
                Ok(identity)
            }
            Err(IamApiError::AlreadyExists(_)) => {
                // Lost a creation race; the role is there, fetch its identity
                // and continue as if we created it.
                debug!(role = %req.role_name, "creation race, fetching existing role");
                let live = self.api.get_role(&req.role_name).await?;
                self.check_ownership(req, &live)?;
                Ok(live.identity)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fail when the existing role carries a different namespace ownership
    /// tag than the requester
    ///
    /// An absent tag is tolerated: a crash between role creation and the
    /// tagging step leaves our own role momentarily untagged, and the next
    /// pass must be able to adopt it.
    fn check_ownership(&self, req: &RoleRequest, live: &LiveRole) -> Result<()> {
        let requested = req.tags.get(NAMESPACE_TAG_KEY);
        match (live.tags.get(NAMESPACE_TAG_KEY), requested) {
            (Some(owner), Some(claimant)) if owner != claimant => {
                warn!(role = %req.role_name, %owner, %claimant, "ownership conflict");
                Err(Error::ownership_conflict(format!(
                    "role {} is owned by namespace {owner}, requested by {claimant}",
                    req.role_name
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Structural drift comparison between a request and a live role
///
/// Policy documents are parsed and compared as normalized structures so
/// whitespace, key order, and string-vs-array differences never trigger
/// false drift. The boundary ARN compares exactly; tags compare as maps
/// after provider-assigned empty-key entries are dropped. Checks
/// short-circuit at the first mismatch.
pub fn compare_role(req: &RoleRequest, live: &LiveRole, live_inline_json: Option<&str>) -> RoleDrift {
    if !permission_policies_match(&req.permission_policy_json, live_inline_json) {
        return RoleDrift::PermissionPolicy;
    }

    if !trust_policies_match(&req.trust_policy_json, live.trust_policy_json.as_deref()) {
        return RoleDrift::TrustPolicy;
    }

    let live_boundary = live.permissions_boundary_arn.as_deref().unwrap_or("");
    if req.permission_boundary_arn != live_boundary {
        return RoleDrift::PermissionBoundary;
    }

    let live_tags: BTreeMap<_, _> = live
        .tags
        .iter()
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if req.tags != live_tags {
        return RoleDrift::Tags;
    }

    RoleDrift::InSync
}

fn permission_policies_match(declared: &str, live: Option<&str>) -> bool {
    let Some(live) = live else { return false };
    match (
        PolicyDocument::from_json(declared),
        PolicyDocument::from_json(live),
    ) {
        (Ok(a), Ok(b)) => a == b,
        // An unparseable live document can never match a valid declaration
        _ => false,
    }
}

fn trust_policies_match(declared: &str, live: Option<&str>) -> bool {
    let Some(live) = live else { return false };
    match (
        TrustPolicyDocument::from_json(declared),
        TrustPolicyDocument::from_json(live),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
