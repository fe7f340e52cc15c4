//! Rolekeeper - Kubernetes operator for tenant-scoped AWS IAM roles
//!
//! Rolekeeper lets cluster tenants declare a desired AWS IAM role as a
//! namespaced `IamRole` resource and continuously reconciles that declaration
//! against live IAM state, enforcing tenant-isolation policy at admission time.
//!
//! # Architecture
//!
//! Three subsystems form the control loop:
//! - An admission webhook validates a declaration's permission policy against
//!   configured allow/deny rules before it is ever persisted
//! - A controller drives each declaration through its lifecycle
//!   (create -> ready -> update/error -> delete) with linear-backoff retries
//! - An IAM orchestrator translates validated declarations into idempotent
//!   calls against AWS IAM and detects drift between declared and live state
//!
//! # Modules
//!
//! - [`crd`] - The IamRole Custom Resource Definition and lifecycle states
//! - [`policy`] - Policy document model, trust policy builder, validation engine
//! - [`config`] - Hot-reloadable ValidationConfig snapshots
//! - [`iam`] - Narrow IAM provider interface and the role orchestrator
//! - [`controller`] - Reconciliation state machine
//! - [`drift`] - Periodic drift reconciler for Ready declarations
//! - [`webhook`] - Admission webhook handlers (validate + default)
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod drift;
pub mod error;
pub mod iam;
pub mod policy;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralizing these here keeps CRD defaults, server configs, and test
// fixtures consistent.

/// Finalizer attached to every IamRole so IAM cleanup cannot be skipped
/// by a concurrent deletion
pub const FINALIZER: &str = "iamrole.rolekeeper.dev/finalizer";

/// Base delay for the controller's linear retry backoff
pub const BACKOFF_BASE_SECS: u64 = 30;

/// Floor for the periodic drift reconciler interval
///
/// Configured intervals below this are clamped up to bound IAM API call rate.
pub const MIN_DRIFT_INTERVAL_SECS: u64 = 300;

/// Pause between records during a drift pass
pub const DRIFT_PACING_SECS: u64 = 1;

/// Default port for the admission webhook HTTP server
///
/// TLS is terminated in front of the operator; the webhook itself serves
/// plain HTTP.
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;
