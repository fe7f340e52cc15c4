//! Rolekeeper - Kubernetes operator reconciling namespaced IAM role declarations

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rolekeeper::config::{watch_config, ConfigStore, ValidationConfig};
use rolekeeper::controller::{error_policy, reconcile, Context};
use rolekeeper::crd::IamRole;
use rolekeeper::drift::run_drift_loop;
use rolekeeper::iam::{AwsIamClient, RoleOrchestrator};
use rolekeeper::webhook::{webhook_router, WebhookState};
use rolekeeper::DEFAULT_WEBHOOK_PORT;

/// Rolekeeper - CRD-driven operator for tenant-scoped AWS IAM roles
#[derive(Parser, Debug)]
#[command(name = "rolekeeper", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Namespace holding the operator's ConfigMap
    #[arg(long, env = "ROLEKEEPER_CONFIG_NAMESPACE", default_value = "rolekeeper-system")]
    config_namespace: String,

    /// Name of the operator's ConfigMap
    #[arg(long, env = "ROLEKEEPER_CONFIG_NAME", default_value = "rolekeeper-config")]
    config_name: String,

    /// Port for the admission webhook server
    #[arg(long, env = "ROLEKEEPER_WEBHOOK_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    webhook_port: u16,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    ///
    /// Watches IamRole records, serves the admission webhooks, and runs the
    /// periodic drift sweep, all in one process.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The kube client's TLS stack needs a process-wide crypto provider.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&IamRole::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli).await,
    }
}

/// Ensure the IamRole CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply, so
/// the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("rolekeeper").force();

    tracing::info!("Installing IamRole CRD...");
    crds.patch(
        "iamroles.rolekeeper.dev",
        &params,
        &Patch::Apply(&IamRole::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install IamRole CRD: {}", e))?;

    tracing::info!("IamRole CRD installed/updated");
    Ok(())
}

/// Load the initial config snapshot from the operator's ConfigMap
///
/// A missing ConfigMap is not fatal: the operator starts on defaults and the
/// watcher picks the ConfigMap up as soon as it appears.
async fn load_initial_config(client: &Client, namespace: &str, name: &str) -> ValidationConfig {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    match api.get(name).await {
        Ok(cm) => {
            tracing::info!(namespace, name, "loaded validation config");
            ValidationConfig::from_map(&cm.data.unwrap_or_default())
        }
        Err(e) => {
            tracing::warn!(namespace, name, error = %e, "config map unavailable, starting with defaults");
            ValidationConfig::default()
        }
    }
}

/// Run in controller mode
async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Rolekeeper controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    // Configuration: initial snapshot plus a watch task for hot reload.
    let initial = load_initial_config(&client, &cli.config_namespace, &cli.config_name).await;
    let config = Arc::new(ConfigStore::new(initial));
    {
        let client = client.clone();
        let config = config.clone();
        let namespace = cli.config_namespace.clone();
        let name = cli.config_name.clone();
        tokio::spawn(async move {
            watch_config(client, &namespace, &name, config).await;
        });
    }

    let iam = AwsIamClient::new().await;
    let orchestrator = Arc::new(RoleOrchestrator::new(Arc::new(iam)));
    let ctx = Arc::new(Context::new(client.clone(), orchestrator, config.clone()));

    // Admission webhook server. TLS terminates in front of the pod; the
    // handlers themselves speak plain HTTP.
    let webhook_state = Arc::new(WebhookState::new(client.clone(), config.clone()));
    let router = webhook_router(webhook_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.webhook_port))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind webhook port {}: {}", cli.webhook_port, e))?;
    tracing::info!(port = cli.webhook_port, "admission webhook listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "webhook server exited");
        }
    });

    // Periodic drift sweep, stopped through the shutdown channel once the
    // controller loop finishes.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let drift_handle = tokio::spawn(run_drift_loop(client.clone(), ctx.clone(), shutdown_rx));

    let roles: Api<IamRole> = Api::all(client.clone());

    tracing::info!("Starting IamRole controller...");
    Controller::new(roles, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "reconciliation error");
                }
            }
        })
        .await;

    let _ = shutdown_tx.send(true);
    let _ = drift_handle.await;

    tracing::info!("Rolekeeper controller shutting down");
    Ok(())
}
