//! Spot rebalancer daemon
//!
//! Moves workload from durable nodes onto spot capacity, autoscales the
//! spot node pool and applies time-of-day HPA bounds.

use anyhow::{Context, Result};
use rebalancer_lib::{
    config::RunMode,
    health::{components, HealthRegistry},
    observability::{EventLogger, RebalancerMetrics},
    rebalance::{RebalanceLoopBuilder, RebalanceOrchestrator},
    scaling::{AutoscalerLoop, NodePoolAutoscaler, ScheduleWindowController, ScheduleWindowLoop},
    status::StatusBoard,
};
use spot_rebalancer::{api, backends::backends, config};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::load()?;
    let mode = match config.mode {
        RunMode::Simulation => "simulation",
        RunMode::Production => "production",
    };
    info!(cluster = %config.cluster_name, mode, "Rebalancer configured");

    // Window defects must stop startup before anything is patched
    let policy = config
        .schedule
        .policy()
        .context("Invalid schedule windows")?;

    let health_registry = HealthRegistry::new();
    for component in [
        components::REBALANCER,
        components::AUTOSCALER,
        components::SCHEDULE_WINDOW,
        components::CLUSTER_API,
    ] {
        health_registry.register(component).await;
    }

    let metrics = RebalancerMetrics::new().context("Failed to register metrics")?;
    let events = EventLogger::new(&config.cluster_name);
    let status = StatusBoard::new(&config.cluster_name, mode);
    events.log_startup(VERSION, mode);

    let backends = match backends(&config).await {
        Ok(backends) => backends,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Refusing to start");
            return Err(e);
        }
    };
    health_registry.set_healthy(components::CLUSTER_API).await;

    let (shutdown_tx, _) = broadcast::channel(1);
    let (interrupt_tx, interrupt_rx) = mpsc::channel(16);

    let orchestrator = RebalanceOrchestrator::new(
        backends.cluster,
        &config.rebalance,
        metrics.clone(),
        events.clone(),
    )
    .with_status(status.clone());
    let rebalance_loop = RebalanceLoopBuilder::new()
        .orchestrator(orchestrator)
        .interval(config.rebalance.interval())
        .health(health_registry.clone())
        .interruptions(interrupt_rx)
        .build()?;

    let autoscaler = NodePoolAutoscaler::new(
        &config.scaling,
        backends.metrics_source,
        backends.resizer,
        metrics.clone(),
        events.clone(),
    )
    .with_schedule(policy.clone())
    .with_status(status.clone());
    let autoscaler_loop = AutoscalerLoop::new(autoscaler, config.scaling.interval())
        .with_health(health_registry.clone());

    let controller = ScheduleWindowController::new(
        policy,
        backends.patcher,
        &config.schedule,
        metrics.clone(),
        events.clone(),
    )
    .with_status(status.clone());
    let window_loop = ScheduleWindowLoop::new(
        controller,
        backends.rollback_source,
        config.scaling.cpu_query(),
        config.schedule.interval(),
    )
    .with_health(health_registry.clone());

    let handles = vec![
        tokio::spawn(rebalance_loop.run(shutdown_tx.subscribe())),
        tokio::spawn(autoscaler_loop.run(shutdown_tx.subscribe())),
        tokio::spawn(window_loop.run(shutdown_tx.subscribe())),
    ];

    let app_state = Arc::new(
        api::AppState::new(health_registry.clone(), metrics.clone(), status)
            .with_interruptions(interrupt_tx),
    );
    health_registry.set_ready(true).await;
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    events.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Loop task panicked");
        }
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
