//! Reconciliation controller for IamRole resources
//!
//! Implements the observe-diff-act loop: observe the declaration and its
//! status, re-validate, converge IAM through the orchestrator, and record
//! the outcome in the status subresource.

mod role;

pub use role::{
    backoff, build_role_request, error_policy, reconcile, Context, KubeClient, KubeClientImpl,
    RoleOps,
};

#[cfg(test)]
pub use role::{MockKubeClient, MockRoleOps};
