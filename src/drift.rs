//! Periodic drift reconciler
//!
//! The event-driven controller only wakes up when the Kubernetes record
//! changes; out-of-band edits in the IAM console change nothing on the
//! Kubernetes side. This loop sweeps every Ready declaration on a fixed
//! cadence and pushes each one back through the reconciler, which repairs
//! any drift it finds.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::controller::{reconcile, Context};
use crate::crd::IamRole;
use crate::DRIFT_PACING_SECS;

/// Run the drift sweep until the shutdown signal fires
///
/// The interval is re-read from the config snapshot before every sleep, so
/// a ConfigMap change takes effect on the next cycle without a restart.
/// Shutdown is observed both between cycles and between records inside a
/// sweep; in-flight work past the current record is abandoned.
pub async fn run_drift_loop(
    client: Client,
    ctx: Arc<Context>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("drift reconciler started");
    loop {
        let interval = ctx.config.snapshot().drift_interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("drift reconciler stopping");
                return;
            }
        }
        sweep(&client, &ctx, &mut shutdown).await;
    }
}

/// One sweep over all declarations in the cluster
///
/// Failures are logged per record and never abort the sweep; one broken
/// declaration must not shadow drift on the others.
async fn sweep(client: &Client, ctx: &Arc<Context>, shutdown: &mut watch::Receiver<bool>) {
    let api: Api<IamRole> = Api::all(client.clone());
    let roles = match api.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(err) => {
            warn!(error = %err, "drift sweep could not list declarations");
            return;
        }
    };

    let checked = sweep_records(roles.items, ctx, shutdown).await;
    debug!(checked, "drift sweep complete");
}

/// Push each Ready record through the reconciler, pausing between records
///
/// A short pause between records keeps the sweep from bursting against the
/// provider API. The shutdown signal is checked before every record and
/// interrupts the pacing pause, so a large sweep never holds up process
/// exit for more than the in-flight reconcile.
async fn sweep_records(
    roles: Vec<IamRole>,
    ctx: &Arc<Context>,
    shutdown: &mut watch::Receiver<bool>,
) -> usize {
    let mut checked = 0usize;
    for role in roles {
        if *shutdown.borrow() {
            info!(checked, "shutdown signalled, abandoning drift sweep");
            return checked;
        }
        if !needs_drift_check(&role) {
            continue;
        }
        checked += 1;

        let name = role.name_any();
        let namespace = role.namespace().unwrap_or_default();
        if let Err(err) = reconcile(Arc::new(role), ctx.clone()).await {
            warn!(%namespace, role = %name, error = %err, "drift pass failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(DRIFT_PACING_SECS)) => {}
            _ = shutdown.changed() => {
                info!(checked, "shutdown signalled, abandoning drift sweep");
                return checked;
            }
        }
    }
    checked
}

/// Only Ready records are swept; in-progress and errored records already
/// have the controller's backoff schedule driving them
fn needs_drift_check(role: &IamRole) -> bool {
    role.metadata.deletion_timestamp.is_none()
        && role
            .status
            .as_ref()
            .map(|s| s.state.is_ready())
            .unwrap_or(false)
}
