//! ruo - Rolling Upgrade Orchestrator for managed service clusters.
//!
//! Compiles upgrade packs into ordered execution plans (groups of stages,
//! each bound to concrete hosts and commands), migrates cluster
//! configuration between stack versions, and exposes the plans over an HTTP
//! API for start, status, abort and retry.

mod api;
mod checks;
mod cluster;
mod config;
mod controller;
mod error;
mod execution;
mod inventory;
mod logging;
mod model;
mod persistence;
mod reconcile;
mod stack;
mod telemetry;
mod upgrade;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use config::{Args, BUILD_DATE, COMMIT, Config, VERSION};
use controller::PlanController;
use inventory::Inventory;

#[tokio::main]
async fn main() {
    let config = match Config::from_args(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e:#}");
            std::process::exit(1);
        }
    };

    logging::init(&config.log_format, &config.log_level);

    info!(
        "Starting ruo v{} (commit: {}, build: {})",
        VERSION, COMMIT, BUILD_DATE
    );

    if let Err(e) = run(config).await {
        error!("Orchestrator failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let environment = Inventory::from_path(&config.inventory)?.build()?;
    info!("Loaded inventory from {}", config.inventory.display());

    // Initialize Prometheus metrics
    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = Arc::new(telemetry::metrics::Metrics::new(&mut registry));
    let registry = Arc::new(registry);

    let controller = Arc::new(
        PlanController::new(environment.collaborators(), config.compiler)?.with_metrics(metrics),
    );

    let health_state = telemetry::health::HealthState::new();
    let health_state_clone = health_state.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = telemetry::health::serve(health_port, health_state_clone).await {
            error!("Health server failed: {}", e);
        }
    });

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = telemetry::metrics::serve(metrics_port, registry).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let api = tokio::spawn(api::serve(config.api_port, controller));

    // Mark as ready once all servers are spawned
    health_state.set_ready(true);

    api.await??;
    Ok(())
}
