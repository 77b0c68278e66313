//! greensched
//!
//! Labels cluster nodes with carbon-derived affinity tiers, submits
//! workloads that prefer cleaner nodes on a fixed period, and logs where
//! each workload was recommended to run next to where it actually ran.
//!
//! ## Tasks
//!
//! - **Scheduler worker**: runs the configured number of scheduling cycles
//! - **Event router**: watches marked workloads and feeds the placement
//!   reconciler
//!
//! The router keeps running after the last cycle so late-starting workloads
//! are still observed. Ctrl-C stops both.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use greensched::cluster::KubeCluster;
use greensched::feed::HttpCarbonFeed;
use greensched::labeler::NodeLabeler;
use greensched::submit::KubectlApply;
use greensched::{
    Config, CycleRunner, CycleSettings, EventRouter, PlacementReconciler, SchedulerWorker,
    Subscription,
};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; variables may come from the environment.
    let dotenv = dotenvy::dotenv().ok();

    // Configuration errors are fatal before anything touches the cluster
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Some(path) = &dotenv {
        info!(path = %path.display(), "Loaded .env file");
    }
    info!(
        period_secs = config.scheduling_period.as_secs(),
        total_runs = config.total_runs,
        carbon_aware = config.carbon_aware,
        feed_url = %config.feed_url,
        template = %config.template_path.display(),
        overlap = ?config.overlap,
        node_order = %config.node_order,
        "Configuration loaded"
    );

    let kube_config = kube::Config::infer()
        .await
        .context("failed to infer kubernetes client configuration")?;
    info!(cluster_url = %kube_config.cluster_url, "Kubernetes client configured");
    let client = kube::Client::try_from(kube_config)?;
    let cluster = Arc::new(KubeCluster::new(client));

    let feed = Arc::new(HttpCarbonFeed::new(
        config.feed_url.clone(),
        config.feed_timeout,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start observing placements before the first workload is submitted
    let mut router = EventRouter::new(cluster.clone());
    router.register(
        Subscription::pods(config.workload_selector.clone()),
        Arc::new(PlacementReconciler::new(cluster.clone())),
    );
    let router_handle = router.spawn(shutdown_rx.clone());

    let runner = CycleRunner::new(
        NodeLabeler::new(feed, cluster, config.node_order),
        Arc::new(KubectlApply::new(config.kubectl.clone())),
        CycleSettings {
            template_path: config.template_path.clone(),
            manifest_dir: config.manifest_dir.clone(),
            carbon_aware: config.carbon_aware,
        },
    );
    let worker = SchedulerWorker::new(
        Arc::new(runner),
        config.scheduling_period,
        config.total_runs,
        config.overlap,
    );
    let mut worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { worker.run(shutdown_rx).await }
    });

    let mut worker_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            worker_done = true;
            match result {
                Ok(summary) => info!(
                    started = summary.started,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Scheduler worker finished, still observing placements"
                ),
                Err(e) => error!(error = %e, "Scheduler worker panicked"),
            }
            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);

    if !worker_done {
        info!("Waiting for running cycles to finish...");
        match worker_handle.await {
            Ok(summary) => info!(
                started = summary.started,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Scheduler worker stopped"
            ),
            Err(e) => error!(error = %e, "Scheduler worker panicked"),
        }
    }

    if let Err(e) = router_handle.await {
        error!(error = %e, "Event router panicked");
    }

    info!("greensched shutdown complete");
    Ok(())
}
