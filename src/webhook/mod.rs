//! Admission webhooks for IamRole
//!
//! Two endpoints guard the write path:
//! - POST /validate/iamroles — rejects declarations that fail policy, trust,
//!   quota, or name-length checks before they are ever persisted
//! - POST /mutate/iamroles — defaults the policy document version when a
//!   tenant omits it
//!
//! Admission is the cheap first line; the controller re-validates on every
//! pass, so a webhook outage degrades to slower feedback, not to unguarded
//! writes.

pub mod role;

use std::sync::Arc;

use axum::{routing::post, Router};
use kube::Client;

use crate::config::ConfigStore;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Kubernetes client for counting declarations in a namespace
    pub kube: Client,
    /// Current operator configuration
    pub config: Arc<ConfigStore>,
}

impl WebhookState {
    /// Create a new webhook state with the given client and config store
    pub fn new(kube: Client, config: Arc<ConfigStore>) -> Self {
        Self { kube, config }
    }
}

/// Create the webhook router with all admission endpoints
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate/iamroles", post(role::validate_handler))
        .route("/mutate/iamroles", post(role::mutate_handler))
        .with_state(state)
}
