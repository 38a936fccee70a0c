//! Hive operator - cluster fleet installation and configuration sync

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hive_operator::controller::{cluster_deployment, syncset};
use hive_operator::crd::{ClusterDeployment, SelectorSyncSet, SyncSet};

/// Hive - Kubernetes control plane for cluster fleet lifecycle management
#[derive(Parser, Debug)]
#[command(name = "hive-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Concurrent reconciles per controller
    #[arg(long, default_value = "1", env = "HIVE_CONCURRENT_RECONCILES")]
    workers: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML for all resource types
        for crd in [
            ClusterDeployment::crd(),
            SyncSet::crd(),
            SelectorSyncSet::crd(),
        ] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    run_controllers(cli).await
}

/// Run the cluster deployment and sync set controllers until shutdown
async fn run_controllers(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Hive operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let cluster_deployments: Api<ClusterDeployment> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client.clone());
    let syncsets: Api<SyncSet> = Api::all(client.clone());
    let selector_syncsets: Api<SelectorSyncSet> = Api::all(client.clone());

    let controller_config = ControllerConfig::default().concurrency(cli.workers);

    tracing::info!("Starting Hive controllers...");
    tracing::info!("  - ClusterDeployment controller");
    tracing::info!("  - SyncSet controller");

    // Lifecycle controller: watches ClusterDeployments and the install and
    // uninstall jobs they own.
    let lifecycle_ctx = Arc::new(cluster_deployment::Context::new(client.clone()));
    let lifecycle_controller = Controller::new(cluster_deployments.clone(), WatcherConfig::default())
        .owns(jobs, WatcherConfig::default())
        .with_config(controller_config.clone())
        .shutdown_on_signal()
        .run(
            cluster_deployment::reconcile,
            cluster_deployment::error_policy,
            lifecycle_ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok(_) => {
                    tracing::debug!("ClusterDeployment reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "ClusterDeployment reconciliation error");
                }
            }
        });

    // The selector fan-out needs the full ClusterDeployment population to
    // evaluate label selectors, so a reflector store mirrors it for the
    // watch mapper.
    let (cd_reader, cd_writer) = reflector::store::<ClusterDeployment>();
    let cd_mirror = reflector(cd_writer, watcher(cluster_deployments.clone(), WatcherConfig::default()))
        .touched_objects()
        .for_each(|result| async move {
            if let Err(e) = result {
                tracing::warn!(error = ?e, "ClusterDeployment mirror watch error");
            }
        });

    // Sync controller: watches ClusterDeployments directly, SyncSets via
    // their explicit refs, and SelectorSyncSets via label-selector fan-out.
    let sync_ctx = Arc::new(syncset::Context::new(client.clone()));
    let sync_controller = Controller::new(cluster_deployments, WatcherConfig::default())
        .watches(syncsets, WatcherConfig::default(), |bundle| {
            syncset::syncset_cluster_deployments(&bundle)
        })
        .watches(
            selector_syncsets,
            WatcherConfig::default(),
            move |bundle| -> Vec<ObjectRef<ClusterDeployment>> {
                let known = cd_reader.state();
                syncset::selector_syncset_cluster_deployments(&bundle, &known)
            },
        )
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(syncset::reconcile, syncset::error_policy, sync_ctx)
        .for_each(|result| async move {
            match result {
                Ok(_) => {
                    tracing::debug!("SyncSet reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "SyncSet reconciliation error");
                }
            }
        });

    // Run everything concurrently until shutdown
    tokio::select! {
        _ = lifecycle_controller => {
            tracing::info!("ClusterDeployment controller completed");
        }
        _ = sync_controller => {
            tracing::info!("SyncSet controller completed");
        }
        _ = cd_mirror => {
            tracing::info!("ClusterDeployment mirror completed");
        }
    }

    tracing::info!("Hive operator shutting down");
    Ok(())
}
