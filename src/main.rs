//! Memcached Operator - keeps a Deployment in line with each Memcached resource

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use memcached_operator::client::{ClientPort, FaultInjectingClient, FaultQueue, LiveClient};
use memcached_operator::controller::{
    error_policy, reconcile, Context, Reconciler, ReconcilerConfig, DEFAULT_IMAGE,
};
use memcached_operator::crd::Memcached;
use memcached_operator::telemetry::{init_tracing, LogFormat, TelemetryConfig};

/// Memcached operator - reconciles Memcached resources into Deployments
#[derive(Parser, Debug)]
#[command(name = "memcached-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Memcached CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Plain, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Container image for new memcached Deployments
    #[arg(long, env = "MEMCACHED_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// YAML file of client faults to inject in front of the API server
    ///
    /// Maps operation names (Fetch, Create, Update, UpdateStatus) to ordered
    /// lists of outcomes. Intended for chaos runs, never for production.
    #[arg(long)]
    fault_plan: Option<PathBuf>,

    /// Server-side apply the Memcached CRD before starting
    #[arg(long)]
    install_crd: bool,

    /// Seconds before a failed reconcile is retried
    #[arg(long, default_value = "5")]
    error_requeue_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Memcached::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(TelemetryConfig::with_format(cli.log_format))?;

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        // No subcommand: controller mode with flags taken from env and defaults
        None => run_controller(ControllerArgs::parse_from(["controller"])).await,
    }
}

/// Server-side apply the Memcached CRD
async fn ensure_crd_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    tracing::info!("Installing Memcached CRD...");
    crds.patch(
        "memcacheds.cache.example.com",
        &params,
        &Patch::Apply(&Memcached::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Memcached CRD: {}", e))?;
    Ok(())
}

/// Build the client the reconciler talks to
async fn build_client(
    client: Client,
    config: &ReconcilerConfig,
    fault_plan: Option<&PathBuf>,
) -> anyhow::Result<Arc<dyn ClientPort>> {
    let live: Arc<dyn ClientPort> = Arc::new(LiveClient::with_field_manager(
        client,
        config.field_manager.clone(),
    ));

    let Some(path) = fault_plan else {
        return Ok(live);
    };

    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read fault plan {}: {}", path.display(), e))?;
    let queue = FaultQueue::from_yaml(&yaml)?;
    tracing::warn!(path = %path.display(), "Injecting client faults from plan");
    Ok(Arc::new(FaultInjectingClient::with_delegate(queue, live)))
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Memcached controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let config = ReconcilerConfig {
        image: args.image,
        error_requeue: Duration::from_secs(args.error_requeue_secs),
        ..Default::default()
    };

    if args.install_crd {
        ensure_crd_installed(&client, &config.field_manager).await?;
    }

    let port = build_client(client.clone(), &config, args.fault_plan.as_ref()).await?;
    let reconciler = Reconciler::builder(port).config(config).build();

    // Aborts in-flight client calls; the controller itself drains on the same signal
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, cancelling in-flight calls");
            trigger.cancel();
        }
    });

    let ctx = Arc::new(Context::new(reconciler, shutdown));

    let (memcacheds, deployments): (Api<Memcached>, Api<Deployment>) = match &args.namespace {
        Some(ns) => {
            tracing::info!(namespace = %ns, "Watching a single namespace");
            (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client, ns),
            )
        }
        None => (Api::all(client.clone()), Api::all(client)),
    };

    tracing::info!("Starting Memcached controller...");
    Controller::new(memcacheds, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Memcached reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Memcached reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Memcached controller stopped");
    Ok(())
}
