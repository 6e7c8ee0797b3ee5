//! Periodic rebalance loop
//!
//! Runs the orchestrator at a fixed interval until shutdown. The shutdown
//! signal is only observed between cycles, so a started cycle always runs
//! to completion. Spot interruption notices arrive on an optional channel
//! and are handled between cycles as well.

use super::orchestrator::{CycleOutcome, RebalanceOrchestrator};
use crate::health::{components, HealthRegistry};
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Rebalance loop driving one orchestrator
pub struct RebalanceLoop {
    orchestrator: RebalanceOrchestrator,
    interval: Duration,
    health: Option<HealthRegistry>,
    interruptions: Option<mpsc::Receiver<String>>,
}

async fn next_interruption(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl RebalanceLoop {
    pub fn new(orchestrator: RebalanceOrchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            health: None,
            interruptions: None,
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            provider = self.orchestrator.provider().name(),
            "Starting rebalance loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut interruptions = self.interruptions.take();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                Some(node) = next_interruption(&mut interruptions) => {
                    self.interrupt(&node).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down rebalance loop");
                    break;
                }
            }
        }
    }

    async fn tick(&mut self) -> CycleOutcome {
        let outcome = self.orchestrator.run_cycle(Utc::now()).await;

        match &outcome {
            CycleOutcome::Completed(_) => {
                if let Some(health) = &self.health {
                    health.record_success(components::REBALANCER).await;
                    health.record_success(components::CLUSTER_API).await;
                }
            }
            // a cycle only fails on observe or commit against the cluster
            CycleOutcome::Failed(message) => {
                if let Some(health) = &self.health {
                    health
                        .record_failure(components::REBALANCER, message.clone())
                        .await;
                    health
                        .record_failure(components::CLUSTER_API, message.clone())
                        .await;
                }
            }
            CycleOutcome::Skipped { remaining } => {
                debug!(
                    remaining_secs = remaining.num_seconds(),
                    "Minimum cycle interval not elapsed"
                );
            }
        }

        outcome
    }

    async fn interrupt(&mut self, node: &str) {
        match self.orchestrator.handle_interruption(node).await {
            Ok(Some(report)) => {
                info!(
                    node,
                    orphaned = report.orphaned,
                    on_spot = report.placed_on_spot(),
                    on_fallback = report.placed_on_fallback(),
                    unplaceable = report.unplaceable().len(),
                    "Handled spot interruption"
                );
            }
            Ok(None) => {
                warn!(node, "Ignoring interruption for unknown or durable node");
            }
            Err(e) => {
                error!(node, error = %format!("{e:#}"), "Failed to handle interruption");
                if let Some(health) = &self.health {
                    health
                        .record_failure(components::REBALANCER, e.to_string())
                        .await;
                }
            }
        }
    }
}

/// Builder for the rebalance loop
pub struct RebalanceLoopBuilder {
    orchestrator: Option<RebalanceOrchestrator>,
    interval: Duration,
    health: Option<HealthRegistry>,
    interruptions: Option<mpsc::Receiver<String>>,
}

impl RebalanceLoopBuilder {
    pub fn new() -> Self {
        Self {
            orchestrator: None,
            interval: Duration::from_secs(30),
            health: None,
            interruptions: None,
        }
    }

    pub fn orchestrator(mut self, orchestrator: RebalanceOrchestrator) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Report tick outcomes to a health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Names of spot nodes being reclaimed
    pub fn interruptions(mut self, rx: mpsc::Receiver<String>) -> Self {
        self.interruptions = Some(rx);
        self
    }

    pub fn build(self) -> Result<RebalanceLoop> {
        let orchestrator = self
            .orchestrator
            .ok_or_else(|| anyhow::anyhow!("Orchestrator is required"))?;

        let mut rebalance_loop = RebalanceLoop::new(orchestrator, self.interval);
        rebalance_loop.health = self.health;
        rebalance_loop.interruptions = self.interruptions;
        Ok(rebalance_loop)
    }
}

impl Default for RebalanceLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
