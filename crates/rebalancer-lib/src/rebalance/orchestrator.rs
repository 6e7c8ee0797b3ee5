//! One rebalance cycle: collect, filter, score, migrate

use super::executor::{MigrationExecutor, MigrationReport};
use super::fallback::{FallbackReport, PreemptionFallbackHandler};
use super::filter::PodFilter;
use super::scoring::NodeScorer;
use crate::cluster::{BackoffPolicy, ClusterStateProvider};
use crate::config::RebalanceConfig;
use crate::models::{NodeDestinationScore, NodeSummary};
use crate::observability::{EventLogger, RebalancerMetrics};
use crate::status::StatusBoard;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Phase of the cycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Idle,
    Collecting,
    Filtering,
    Scoring,
    Migrating,
}

/// Summary of a completed cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub before: Vec<NodeSummary>,
    pub after: Vec<NodeSummary>,
    /// Pods found on durable nodes
    pub candidates: usize,
    /// Pods kept by the filter, highest priority first
    pub selected: Vec<String>,
    pub destinations: Vec<NodeDestinationScore>,
    pub migration: MigrationReport,
}

/// Result of asking the orchestrator to run
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Minimum interval since the last cycle has not elapsed
    Skipped { remaining: chrono::Duration },
    Completed(CycleReport),
    /// The cycle aborted; the orchestrator is back to idle
    Failed(String),
}

/// Drives rebalance cycles against a cluster provider
pub struct RebalanceOrchestrator {
    provider: Arc<dyn ClusterStateProvider>,
    filter: PodFilter,
    executor: MigrationExecutor,
    fallback: PreemptionFallbackHandler,
    min_interval: chrono::Duration,
    last_cycle: Option<DateTime<Utc>>,
    phase: CyclePhase,
    rng: StdRng,
    metrics: RebalancerMetrics,
    events: EventLogger,
    status: Option<StatusBoard>,
}

impl RebalanceOrchestrator {
    pub fn new(
        provider: Arc<dyn ClusterStateProvider>,
        config: &RebalanceConfig,
        metrics: RebalancerMetrics,
        events: EventLogger,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let min_interval = chrono::Duration::from_std(config.min_interval())
            .unwrap_or_else(|_| chrono::Duration::seconds(30));

        Self {
            executor: MigrationExecutor::new(
                provider.clone(),
                BackoffPolicy::new(config.eviction_max_retries),
                metrics.clone(),
                events.clone(),
            ),
            provider,
            filter: PodFilter::new(config.max_pods_per_cycle),
            fallback: PreemptionFallbackHandler::new(config.fallback_node.clone()),
            min_interval,
            last_cycle: None,
            phase: CyclePhase::Idle,
            rng,
            metrics,
            events,
            status: None,
        }
    }

    /// Publish cycle results to a status board
    pub fn with_status(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    /// Replace the backoff used for rate-limited evictions
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.executor = MigrationExecutor::new(
            self.provider.clone(),
            backoff,
            self.metrics.clone(),
            self.events.clone(),
        );
        self
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn last_cycle(&self) -> Option<DateTime<Utc>> {
        self.last_cycle
    }

    pub fn provider(&self) -> &Arc<dyn ClusterStateProvider> {
        &self.provider
    }

    fn transition(&mut self, next: CyclePhase) {
        debug!(from = ?self.phase, to = ?next, "Rebalance phase");
        self.phase = next;
    }

    /// Run one cycle unless the minimum interval has not elapsed
    ///
    /// Errors never escape: a failed cycle is logged, counted and reported
    /// as [`CycleOutcome::Failed`].
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        if let Some(last) = self.last_cycle {
            let elapsed = now - last;
            if elapsed < self.min_interval {
                return CycleOutcome::Skipped {
                    remaining: self.min_interval - elapsed,
                };
            }
        }

        let start = Instant::now();
        let result = self.cycle(now).await;
        let elapsed = start.elapsed();

        self.transition(CyclePhase::Idle);
        self.last_cycle = Some(now);

        match result {
            Ok(mut report) => {
                report.duration_ms = elapsed.as_millis() as u64;
                self.metrics.observe_cycle(elapsed.as_secs_f64());
                info!(
                    candidates = report.candidates,
                    selected = report.selected.len(),
                    destinations = report.destinations.len(),
                    moved = report.migration.moved,
                    denied = report.migration.denied,
                    skipped = report.migration.skipped,
                    elapsed_ms = report.duration_ms,
                    "Rebalance cycle complete"
                );
                if let Some(status) = &self.status {
                    status.record_cycle(report.clone()).await;
                }
                CycleOutcome::Completed(report)
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, provider = self.provider.name(), "Rebalance cycle failed");
                self.metrics.inc_cycle_failures();
                if let Some(status) = &self.status {
                    status.record_cycle_failure(message.clone()).await;
                }
                CycleOutcome::Failed(message)
            }
        }
    }

    async fn cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.transition(CyclePhase::Collecting);
        let mut state = self
            .provider
            .observe()
            .await
            .context("observing cluster state")?;
        let before = state.summaries();
        let candidates = state.pods_on_durable_nodes();

        self.transition(CyclePhase::Filtering);
        let candidate_count = candidates.len();
        let selected = self.filter.filter(candidates, now);

        self.transition(CyclePhase::Scoring);
        let destinations = NodeScorer::rank_destinations(&state);

        self.transition(CyclePhase::Migrating);
        let migration = self
            .executor
            .execute(&mut state, &selected, &destinations)
            .await;

        if migration.moved > 0 {
            self.provider
                .commit(&state)
                .await
                .context("committing cluster state")?;
        }

        Ok(CycleReport {
            started_at: now,
            duration_ms: 0,
            before,
            after: state.summaries(),
            candidates: candidate_count,
            selected: selected.iter().map(|c| c.pod.key()).collect(),
            destinations,
            migration,
        })
    }

    /// Simulate the provider reclaiming a spot node
    ///
    /// Returns `Ok(None)` when the node is unknown or durable.
    pub async fn handle_interruption(&mut self, node_name: &str) -> Result<Option<FallbackReport>> {
        let mut state = self
            .provider
            .observe()
            .await
            .context("observing cluster state")?;

        let Some(report) = self
            .fallback
            .handle_node_loss(&mut state, node_name, &mut self.rng)
        else {
            return Ok(None);
        };

        self.events.log_node_interrupted(node_name, report.orphaned);
        for placement in &report.placements {
            match &placement.node {
                Some(target) => {
                    self.metrics.inc_fallback_placements();
                    self.events.log_fallback_placement(
                        &placement.pod,
                        node_name,
                        target,
                        placement.durable,
                    );
                }
                None => {
                    self.metrics.inc_pods_unplaceable();
                    self.events.log_unplaceable(&placement.pod, node_name);
                }
            }
        }

        self.provider
            .commit(&state)
            .await
            .context("committing cluster state")?;
        if let Some(status) = &self.status {
            status
                .record_interruption(report.clone(), state.summaries())
                .await;
        }

        Ok(Some(report))
    }
}
