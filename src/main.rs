use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use faasmesh::backend::KubernetesBackend;
use faasmesh::cli::Args;
use faasmesh::config::{load_config_file, Config};
use faasmesh::delegation::{DelegationEngine, TokenCache};
use faasmesh::scheduler::{
    spawn_rescue_loop, spawn_resource_tracker, RescueLoop, ResourceTracker,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    // Load configuration, falling back to defaults without a file
    let mut config = match args.config {
        Some(ref path) => match load_config_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config file {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(cluster_id) = args.cluster_id {
        config.cluster_id = cluster_id;
    }
    if let Some(namespace) = args.namespace {
        config.services_namespace = namespace;
    }

    info!(
        "Starting faasmesh for cluster '{}', services namespace '{}'",
        config.cluster_id, config.services_namespace
    );

    let backend = match KubernetesBackend::connect(
        config.services_namespace.clone(),
        config.event_variable.clone(),
    )
    .await
    {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("Failed to connect to the cluster: {}", e);
            process::exit(1);
        }
    };

    let tokens = Arc::new(TokenCache::new());
    let engine = Arc::new(DelegationEngine::new(tokens));

    let tracker = Arc::new(ResourceTracker::new(backend.clone()));
    if let Err(e) = tracker.refresh().await {
        error!("Initial capacity refresh failed: {}", e);
    }
    info!("Tracking {} schedulable node(s)", tracker.tracked_nodes().await);

    let tracker_shutdown = spawn_resource_tracker(
        tracker,
        Duration::from_secs(config.tracker_interval_secs),
    );

    let rescue = Arc::new(RescueLoop::new(
        backend,
        engine,
        config.services_namespace.clone(),
    ));
    let rescue_shutdown = spawn_rescue_loop(
        rescue,
        Duration::from_secs(config.rescue_interval_secs),
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        process::exit(1);
    }

    info!("Shutdown signal received, stopping background loops");
    let _ = tracker_shutdown.send(true);
    let _ = rescue_shutdown.send(true);
}
