//! IamRole controller implementation
//!
//! The reconciler drives a per-record state machine
//! (New -> CreateInProgress -> Ready, with CreateError/UpdateError parking
//! failures on a linear backoff schedule) and persists every transition to
//! the status subresource before acting on it. All IAM work goes through
//! the [`RoleOps`] seam so the whole loop is testable with mocks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::{ConfigStore, ValidationConfig};
use crate::crd::{IamRole, IamRoleStatus, LifecycleState};
use crate::iam::{
    RoleIdentity, RoleOrchestrator, RoleRequest, MANAGED_BY_TAG_KEY, MANAGED_BY_TAG_VALUE,
    NAMESPACE_TAG_KEY,
};
use crate::policy::{build_trust_policy, validation::check_policy};
use crate::{Error, BACKOFF_BASE_SECS, FINALIZER};

/// Trait abstracting Kubernetes client operations for IamRole
///
/// Allows mocking the Kubernetes client in tests while using the real
/// client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Patch the status subresource of an IamRole
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IamRoleStatus,
    ) -> Result<(), Error>;

    /// Add the cleanup finalizer if it is not already present
    async fn ensure_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Remove the cleanup finalizer, releasing the record for deletion
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Trait abstracting the IAM orchestration verbs the controller needs
///
/// Implemented by [`RoleOrchestrator`] in production and mocked in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleOps: Send + Sync {
    /// Converge the role to the requested state
    async fn ensure_role(&self, req: &RoleRequest) -> Result<RoleIdentity, Error>;

    /// Tear the role down
    async fn delete_role(
        &self,
        role_name: &str,
        policy_name: &str,
        managed_policy_arns: &[String],
    ) -> Result<(), Error>;

    /// Whether the live role matches the requested state
    async fn is_in_sync(&self, req: &RoleRequest) -> Result<bool, Error>;
}

#[async_trait]
impl RoleOps for RoleOrchestrator {
    async fn ensure_role(&self, req: &RoleRequest) -> Result<RoleIdentity, Error> {
        RoleOrchestrator::ensure_role(self, req).await
    }

    async fn delete_role(
        &self,
        role_name: &str,
        policy_name: &str,
        managed_policy_arns: &[String],
    ) -> Result<(), Error> {
        RoleOrchestrator::delete_role(self, role_name, policy_name, managed_policy_arns).await
    }

    async fn is_in_sync(&self, req: &RoleRequest) -> Result<bool, Error> {
        RoleOrchestrator::is_in_sync(self, req).await
    }
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn roles(&self, namespace: &str) -> Api<IamRole> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IamRoleStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        self.roles(namespace)
            .patch_status(
                name,
                &PatchParams::apply("rolekeeper"),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn ensure_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api = self.roles(namespace);
        let role = api.get(name).await?;
        if role.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(());
        }

        let mut finalizers = role.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(%namespace, %name, "finalizer added");
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api = self.roles(namespace);
        let role = api.get(name).await?;
        let finalizers: Vec<_> = role
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect();

        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(%namespace, %name, "finalizer removed");
        Ok(())
    }
}

/// Shared controller context
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// IAM orchestration verbs
    pub iam: Arc<dyn RoleOps>,
    /// Current operator configuration
    pub config: Arc<ConfigStore>,
}

impl Context {
    /// Create a production context over the given clients
    pub fn new(client: Client, iam: Arc<dyn RoleOps>, config: Arc<ConfigStore>) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
            iam,
            config,
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        iam: Arc<dyn RoleOps>,
        config: ValidationConfig,
    ) -> Self {
        Self {
            kube,
            iam,
            config: Arc::new(ConfigStore::new(config)),
        }
    }
}

/// Linear backoff delay for the given attempt number
///
/// attempt 1 -> 30s, attempt 2 -> 60s, and so on. Attempt 0 is clamped to 1
/// so a missing retry count never produces an immediate requeue.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(BACKOFF_BASE_SECS * u64::from(attempt.max(1)))
}

/// Build the orchestrator's request from a declaration and a config snapshot
///
/// The computed role name is a pure function of the namespace, so every
/// record in a namespace maps to the same IAM role. Reserved tags are
/// stamped last; tenant tags cannot override them.
pub fn build_role_request(role: &IamRole, cfg: &ValidationConfig) -> Result<RoleRequest, Error> {
    let namespace = role.namespace().unwrap_or_else(|| "default".to_string());
    let role_name = cfg.role_name_for(&namespace);

    let trust = build_trust_policy(role.spec.trust_policy.as_ref(), cfg)?;
    let description = role
        .spec
        .role_description
        .clone()
        .unwrap_or_else(|| format!("role created by rolekeeper for namespace {namespace}"));

    let mut tags: BTreeMap<String, String> = role.spec.tags.clone().unwrap_or_default();
    tags.insert(MANAGED_BY_TAG_KEY.to_string(), MANAGED_BY_TAG_VALUE.to_string());
    tags.insert(NAMESPACE_TAG_KEY.to_string(), namespace);

    Ok(RoleRequest {
        policy_name: role_name.clone(),
        role_name,
        description,
        session_duration_secs: role.spec.session_duration(),
        trust_policy_json: trust.to_json()?,
        permission_policy_json: role.spec.policy_document.to_json()?,
        permission_boundary_arn: cfg.permission_boundary_arn.clone(),
        managed_policy_arns: cfg.managed_policy_arns.clone(),
        tags,
    })
}

/// Reconcile an IamRole resource
///
/// Re-validates the declaration against the current config snapshot,
/// then drives the lifecycle state machine: create flows for records that
/// have never been Ready, update flows afterwards, and the finalizer-backed
/// delete flow once the deletion marker appears.
#[instrument(skip(role, ctx), fields(namespace = %role.namespace().unwrap_or_default(), role = %role.name_any()))]
pub async fn reconcile(role: Arc<IamRole>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = role.name_any();
    let namespace = role.namespace().unwrap_or_else(|| "default".to_string());
    let cfg = ctx.config.snapshot();

    let current = role
        .status
        .as_ref()
        .map(|s| s.state.clone())
        .unwrap_or_default();
    let retries = role.status.as_ref().map(|s| s.retry_count).unwrap_or(0);

    if role.metadata.deletion_timestamp.is_some() {
        return finalize(&role, &ctx, &cfg, retries).await;
    }

    ctx.kube.ensure_finalizer(&namespace, &name).await?;

    // Validation re-runs on every pass: the config snapshot may have
    // tightened since admission let this record in.
    let violations = check_policy(&name, &role.spec.policy_document, &cfg);
    if !violations.is_empty() {
        let message = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!(%message, "declaration failed validation");

        let attempt = retries + 1;
        let status = IamRoleStatus::with_state(current.error_state())
            .role_name(cfg.role_name_for(&namespace))
            .retries(attempt)
            .message(message);
        ctx.kube.patch_status(&namespace, &name, &status).await?;
        return Ok(Action::requeue(backoff(attempt)));
    }

    let request = build_role_request(&role, &cfg)?;
    debug!(state = %current, "reconciling declaration");

    match current {
        LifecycleState::New | LifecycleState::CreateInProgress | LifecycleState::CreateError => {
            converge(
                &ctx,
                &namespace,
                &name,
                &request,
                LifecycleState::CreateInProgress,
                retries,
            )
            .await
        }
        LifecycleState::Ready => {
            if ctx.iam.is_in_sync(&request).await? {
                debug!("role in sync");
                return Ok(Action::await_change());
            }
            info!("drift detected, re-converging");
            converge(
                &ctx,
                &namespace,
                &name,
                &request,
                LifecycleState::UpdateInProgress,
                retries,
            )
            .await
        }
        _ => {
            // UpdateInProgress, UpdateError, or a stale DeleteInProgress
            // after an aborted delete: all converge through the update flow.
            converge(
                &ctx,
                &namespace,
                &name,
                &request,
                LifecycleState::UpdateInProgress,
                retries,
            )
            .await
        }
    }
}

/// Drive one convergence attempt and record its outcome in status
///
/// The in-progress state is persisted before any IAM call so a crash
/// mid-convergence resumes in the right phase.
async fn converge(
    ctx: &Context,
    namespace: &str,
    name: &str,
    request: &RoleRequest,
    phase: LifecycleState,
    retries: u32,
) -> Result<Action, Error> {
    let status = IamRoleStatus::with_state(phase.clone())
        .role_name(&request.role_name)
        .retries(retries);
    ctx.kube.patch_status(namespace, name, &status).await?;

    match ctx.iam.ensure_role(request).await {
        Ok(identity) => {
            info!(role = %request.role_name, arn = %identity.arn, "declaration ready");
            let status = IamRoleStatus::with_state(LifecycleState::Ready)
                .role_name(&request.role_name)
                .identity(identity.arn, identity.role_id)
                .retries(0)
                .message("role converged");
            ctx.kube.patch_status(namespace, name, &status).await?;
            // Drift between spec changes is the periodic reconciler's job.
            Ok(Action::await_change())
        }
        Err(err) if !err.is_retryable() => {
            warn!(error = %err, "convergence blocked, awaiting intervention");
            let status = IamRoleStatus::with_state(phase.error_state())
                .role_name(&request.role_name)
                .retries(retries)
                .message(err.to_string());
            ctx.kube.patch_status(namespace, name, &status).await?;
            Ok(Action::await_change())
        }
        Err(err) => {
            let attempt = retries + 1;
            warn!(error = %err, attempt, "convergence failed, backing off");
            let status = IamRoleStatus::with_state(phase.error_state())
                .role_name(&request.role_name)
                .retries(attempt)
                .message(err.to_string());
            ctx.kube.patch_status(namespace, name, &status).await?;
            Ok(Action::requeue(backoff(attempt)))
        }
    }
}

/// Delete flow: tear down IAM state, then release the finalizer
///
/// The finalizer comes off only after IAM cleanup succeeds, so a record can
/// never disappear while its role lingers.
async fn finalize(
    role: &IamRole,
    ctx: &Context,
    cfg: &ValidationConfig,
    retries: u32,
) -> Result<Action, Error> {
    let name = role.name_any();
    let namespace = role.namespace().unwrap_or_else(|| "default".to_string());

    if !role.finalizers().iter().any(|f| f == FINALIZER) {
        // Nothing left to clean up; deletion proceeds without us.
        return Ok(Action::await_change());
    }

    let role_name = cfg.role_name_for(&namespace);
    let status = IamRoleStatus::with_state(LifecycleState::DeleteInProgress)
        .role_name(&role_name)
        .retries(retries);
    ctx.kube.patch_status(&namespace, &name, &status).await?;

    match ctx
        .iam
        .delete_role(&role_name, &role_name, &cfg.managed_policy_arns)
        .await
    {
        Ok(()) => {
            info!(role = %role_name, "cleanup complete, releasing finalizer");
            ctx.kube.remove_finalizer(&namespace, &name).await?;
            Ok(Action::await_change())
        }
        Err(err) => {
            let attempt = retries + 1;
            warn!(error = %err, attempt, "cleanup failed, backing off");
            let status = IamRoleStatus::with_state(LifecycleState::DeleteInProgress)
                .role_name(&role_name)
                .retries(attempt)
                .message(err.to_string());
            ctx.kube.patch_status(&namespace, &name, &status).await?;
            Ok(Action::requeue(backoff(attempt)))
        }
    }
}

/// Error policy for the controller
///
/// Called when reconciliation itself fails (status writes, unexpected
/// provider failures). Requeues on the same linear schedule the state
/// machine uses, seeded from the recorded retry count.
pub fn error_policy(role: Arc<IamRole>, error: &Error, _ctx: Arc<Context>) -> Action {
    let retries = role.status.as_ref().map(|s| s.retry_count).unwrap_or(0);
    error!(
        ?error,
        role = %role.name_any(),
        "reconciliation failed"
    );
    Action::requeue(backoff(retries + 1))
}
