//! Node-pool autoscaler driven by the scale decision engine

use super::decision::{ScaleDecision, ScaleDecisionEngine};
use super::metrics_source::{query_or_zero, MetricsSource};
use super::schedule::ScheduleWindowPolicy;
use super::smoother::MetricSmoother;
use crate::cluster::NodePoolResizer;
use crate::config::ScalingConfig;
use crate::health::{components, HealthRegistry};
use crate::observability::{EventLogger, RebalancerMetrics};
use crate::status::{ScalingStatus, StatusBoard};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Samples the service, decides and resizes the node pool
pub struct NodePoolAutoscaler {
    smoother: MetricSmoother,
    engine: ScaleDecisionEngine,
    source: Arc<dyn MetricsSource>,
    resizer: Arc<dyn NodePoolResizer>,
    schedule: Option<ScheduleWindowPolicy>,
    pool: String,
    cpu_query: String,
    memory_query: String,
    pod_count_query: String,
    /// Resize that failed and is retried on the next tick
    pending: Option<u32>,
    metrics: RebalancerMetrics,
    events: EventLogger,
    status: Option<StatusBoard>,
}

impl NodePoolAutoscaler {
    pub fn new(
        config: &ScalingConfig,
        source: Arc<dyn MetricsSource>,
        resizer: Arc<dyn NodePoolResizer>,
        metrics: RebalancerMetrics,
        events: EventLogger,
    ) -> Self {
        Self {
            smoother: MetricSmoother::new(config.stabilization_window()).with_metrics(metrics.clone()),
            engine: ScaleDecisionEngine::new(config, config.min_replicas),
            source,
            resizer,
            schedule: None,
            pool: config.node_pool.clone(),
            cpu_query: config.cpu_query(),
            memory_query: config.memory_query(),
            pod_count_query: config.pod_count_query(),
            pending: None,
            metrics,
            events,
            status: None,
        }
    }

    /// Take replica bounds from the active schedule window on every tick
    pub fn with_schedule(mut self, policy: ScheduleWindowPolicy) -> Self {
        self.schedule = Some(policy);
        self
    }

    pub fn with_status(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    pub fn engine(&self) -> &ScaleDecisionEngine {
        &self.engine
    }

    pub fn smoother(&self) -> &MetricSmoother {
        &self.smoother
    }

    async fn resize(&mut self, target: u32) -> Result<()> {
        match self.resizer.resize(&self.pool, target).await {
            Ok(()) => {
                self.pending = None;
                Ok(())
            }
            Err(e) => {
                self.pending = Some(target);
                Err(e).with_context(|| format!("resizing node pool '{}' to {}", self.pool, target))
            }
        }
    }

    /// One sample-decide-act step
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<ScaleDecision> {
        if let Some(target) = self.pending {
            debug!(pool = %self.pool, target, "Retrying pending resize");
            self.resize(target).await?;
        }

        if let Some(policy) = &self.schedule {
            let window = policy.active_window(now.time())?;
            let (name, min, max) = (window.name.clone(), window.min_replicas, window.max_replicas);
            let before = self.engine.replicas();
            self.engine.set_bounds(min, max);

            // pool must follow the count whenever a new window clamps it
            let clamped = self.engine.replicas();
            if clamped != before {
                info!(
                    pool = %self.pool,
                    window = %name,
                    from = before,
                    to = clamped,
                    "Replica count clamped into schedule window"
                );
                self.resize(clamped).await?;
            }
        }

        let cpu = query_or_zero(self.source.as_ref(), &self.cpu_query).await;
        let memory = query_or_zero(self.source.as_ref(), &self.memory_query).await;
        let pod_count = match self.source.query(&self.pod_count_query).await {
            Ok(Some(count)) if count >= 0.0 => count.round() as u32,
            _ => self.engine.replicas(),
        };

        let sample = self.smoother.ingest(now, cpu, memory, pod_count, None);
        let replicas_before = self.engine.replicas();
        let decision = self.engine.decide(&self.smoother, now);

        debug!(
            cpu = sample.cpu,
            memory = sample.memory,
            response_time = sample.response_time,
            decision = %decision,
            "Autoscaler tick"
        );

        self.metrics
            .record_scale_decision(decision.direction(), self.engine.replicas());
        if let Some(target) = decision.target() {
            self.events.log_scale_decision(
                decision.direction(),
                replicas_before,
                target,
                &decision.to_string(),
            );
        }
        self.publish(&decision, now).await;

        if let Some(target) = decision.target() {
            self.resize(target).await?;
        }
        Ok(decision)
    }

    async fn publish(&self, decision: &ScaleDecision, now: DateTime<Utc>) {
        let Some(status) = &self.status else {
            return;
        };
        let (min_replicas, max_replicas) = self.engine.bounds();
        let reason = match decision {
            ScaleDecision::ScaleUp { reason, .. } => format!("{reason:?}"),
            ScaleDecision::ScaleDown { .. } => "LowUtilization".to_string(),
            ScaleDecision::NoOp { reason } => format!("{reason:?}"),
        };

        status
            .set_scaling(ScalingStatus {
                replicas: self.engine.replicas(),
                min_replicas,
                max_replicas,
                last_decision: decision.direction().to_string(),
                reason,
                mean_cpu: self.smoother.mean_cpu(),
                mean_memory: self.smoother.mean_memory(),
                mean_response_time: self.smoother.mean_response_time(),
                stable: self.smoother.is_stable(),
                updated_at: now,
            })
            .await;
    }
}

/// Periodic autoscaler loop
pub struct AutoscalerLoop {
    autoscaler: NodePoolAutoscaler,
    interval: Duration,
    health: Option<HealthRegistry>,
}

impl AutoscalerLoop {
    pub fn new(autoscaler: NodePoolAutoscaler, interval: Duration) -> Self {
        Self {
            autoscaler,
            interval,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            pool = %self.autoscaler.pool,
            "Starting autoscaler loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.autoscaler.tick(Utc::now()).await;
                    match (&result, &self.health) {
                        (Ok(_), Some(health)) => health.record_success(components::AUTOSCALER).await,
                        (Err(e), Some(health)) => {
                            health.record_failure(components::AUTOSCALER, e.to_string()).await
                        }
                        _ => {}
                    }
                    if let Err(e) = result {
                        error!(error = %format!("{e:#}"), "Autoscaler tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down autoscaler loop");
                    break;
                }
            }
        }
    }
}
