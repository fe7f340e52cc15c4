//! Custom Resource Definitions for Rolekeeper
//!
//! This module contains the IamRole CRD and its supporting types.

mod role;
mod types;

pub use role::{IamRole, IamRoleSpec, IamRoleStatus};
pub use types::{LifecycleState, TrustPolicyOverride};
