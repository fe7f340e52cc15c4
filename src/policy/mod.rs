//! IAM policy modeling and validation
//!
//! This module owns the value types for permission and trust policy
//! documents, the trust policy builder, and the stateless validation engine
//! used by both the admission webhook and the reconciler.

mod document;
mod trust;
pub mod validation;

pub use document::{Effect, PolicyDocument, Statement, StringOrList, DEFAULT_POLICY_VERSION};
pub use trust::{
    build_trust_policy, Principal, TrustPolicyDocument, TrustStatement, SERVICE_PRINCIPAL_SUFFIX,
};
pub use validation::{FieldError, QuotaOp, ValidationReason};
