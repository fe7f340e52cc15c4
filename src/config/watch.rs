//! ConfigMap watch task for hot configuration reload

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher::{self, watcher, Event};
use kube::{Api, Client};
use tracing::{info, warn};

use super::ConfigStore;

/// Watch the operator's ConfigMap and reload the [`ConfigStore`] on change
///
/// Runs until the watch stream ends (effectively forever; the watcher
/// restarts itself on transient failures). A deleted ConfigMap keeps the
/// last-known snapshot rather than reverting to defaults, so a brief
/// delete/recreate cannot momentarily relax policy enforcement.
pub async fn watch_config(client: Client, namespace: &str, name: &str, store: Arc<ConfigStore>) {
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    let watch = watcher::Config::default().fields(&format!("metadata.name={name}"));

    let mut stream = watcher(api, watch).boxed();
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(cm)) | Ok(Event::InitApply(cm)) => {
                store.reload(&cm.data.unwrap_or_default());
                info!(namespace, name, "validation config reloaded");
            }
            Ok(Event::Delete(_)) => {
                warn!(
                    namespace,
                    name, "config map deleted, keeping last-known configuration"
                );
            }
            Ok(Event::Init) | Ok(Event::InitDone) => {}
            Err(e) => {
                warn!(error = %e, "config watch error, watcher will restart");
            }
        }
    }
}
