//! Observability infrastructure for the rebalancer
//!
//! Provides:
//! - Prometheus metrics held in an owned registry (cycles, migrations, scale decisions)
//! - Structured JSON event logging with tracing

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

struct MetricsInner {
    registry: Registry,
    cycles_total: IntCounter,
    cycle_failures_total: IntCounter,
    cycle_duration_seconds: Histogram,
    pods_migrated_total: IntCounter,
    migrations_denied_total: IntCounter,
    fallback_placements_total: IntCounter,
    pods_unplaceable_total: IntCounter,
    scale_decisions_total: IntCounterVec,
    replicas: IntGauge,
    window_changes_total: IntCounter,
    rollbacks_total: IntCounter,
    service_cpu_usage: Gauge,
    service_memory_usage: Gauge,
    service_pod_count: IntGauge,
    service_response_time: Gauge,
}

/// Metrics sink handed to components at construction
///
/// Clones share the same registry and collectors. Every instance owns its
/// own registry, so independent instances never collide.
#[derive(Clone)]
pub struct RebalancerMetrics {
    inner: Arc<MetricsInner>,
}

impl std::fmt::Debug for RebalancerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebalancerMetrics").finish_non_exhaustive()
    }
}

impl RebalancerMetrics {
    /// Create a metrics sink with a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("spot_rebalancer".to_string()), None)?;

        let cycles_total = IntCounter::new("cycles_total", "Completed rebalance cycles")?;
        let cycle_failures_total =
            IntCounter::new("cycle_failures_total", "Rebalance cycles aborted by an error")?;
        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("cycle_duration_seconds", "Time spent in one rebalance cycle")
                .buckets(CYCLE_BUCKETS.to_vec()),
        )?;
        let pods_migrated_total =
            IntCounter::new("pods_migrated_total", "Pods moved to spot capacity")?;
        let migrations_denied_total = IntCounter::new(
            "migrations_denied_total",
            "Migrations refused by disruption or capacity checks",
        )?;
        let fallback_placements_total = IntCounter::new(
            "fallback_placements_total",
            "Pods re-placed after a spot interruption",
        )?;
        let pods_unplaceable_total = IntCounter::new(
            "pods_unplaceable_total",
            "Pods left without a node after a spot interruption",
        )?;
        let scale_decisions_total = IntCounterVec::new(
            Opts::new("scale_decisions_total", "Scale decisions by direction"),
            &["direction"],
        )?;
        let replicas = IntGauge::new("replicas", "Replica count tracked by the decision engine")?;
        let window_changes_total = IntCounter::new(
            "window_changes_total",
            "Schedule window bounds applied to the HPA",
        )?;
        let rollbacks_total =
            IntCounter::new("rollbacks_total", "Emergency max-replica overrides applied")?;
        let service_cpu_usage = Gauge::new("service_cpu_usage", "Service CPU usage in percent")?;
        let service_memory_usage =
            Gauge::new("service_memory_usage", "Service memory usage in percent")?;
        let service_pod_count = IntGauge::new("service_pod_count", "Running service pods")?;
        let service_response_time = Gauge::new(
            "service_response_time",
            "Service mean response time in seconds",
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_failures_total.clone()))?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;
        registry.register(Box::new(pods_migrated_total.clone()))?;
        registry.register(Box::new(migrations_denied_total.clone()))?;
        registry.register(Box::new(fallback_placements_total.clone()))?;
        registry.register(Box::new(pods_unplaceable_total.clone()))?;
        registry.register(Box::new(scale_decisions_total.clone()))?;
        registry.register(Box::new(replicas.clone()))?;
        registry.register(Box::new(window_changes_total.clone()))?;
        registry.register(Box::new(rollbacks_total.clone()))?;
        registry.register(Box::new(service_cpu_usage.clone()))?;
        registry.register(Box::new(service_memory_usage.clone()))?;
        registry.register(Box::new(service_pod_count.clone()))?;
        registry.register(Box::new(service_response_time.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                cycles_total,
                cycle_failures_total,
                cycle_duration_seconds,
                pods_migrated_total,
                migrations_denied_total,
                fallback_placements_total,
                pods_unplaceable_total,
                scale_decisions_total,
                replicas,
                window_changes_total,
                rollbacks_total,
                service_cpu_usage,
                service_memory_usage,
                service_pod_count,
                service_response_time,
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Encode all metrics in the Prometheus text format
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn observe_cycle(&self, duration_secs: f64) {
        self.inner.cycles_total.inc();
        self.inner.cycle_duration_seconds.observe(duration_secs);
    }

    pub fn inc_cycle_failures(&self) {
        self.inner.cycle_failures_total.inc();
    }

    pub fn inc_pods_migrated(&self) {
        self.inner.pods_migrated_total.inc();
    }

    pub fn inc_migrations_denied(&self) {
        self.inner.migrations_denied_total.inc();
    }

    pub fn inc_fallback_placements(&self) {
        self.inner.fallback_placements_total.inc();
    }

    pub fn inc_pods_unplaceable(&self) {
        self.inner.pods_unplaceable_total.inc();
    }

    pub fn record_scale_decision(&self, direction: &str, replicas: u32) {
        self.inner
            .scale_decisions_total
            .with_label_values(&[direction])
            .inc();
        self.inner.replicas.set(replicas as i64);
    }

    pub fn inc_window_changes(&self) {
        self.inner.window_changes_total.inc();
    }

    pub fn inc_rollbacks(&self) {
        self.inner.rollbacks_total.inc();
    }

    /// Update the service gauges from the latest sample
    pub fn set_service_sample(&self, cpu: f64, memory: f64, pods: u32, response_time: f64) {
        self.inner.service_cpu_usage.set(cpu);
        self.inner.service_memory_usage.set(memory);
        self.inner.service_pod_count.set(pods as i64);
        self.inner.service_response_time.set(response_time);
    }

    pub fn cycles(&self) -> u64 {
        self.inner.cycles_total.get()
    }

    pub fn pods_migrated(&self) -> u64 {
        self.inner.pods_migrated_total.get()
    }

    pub fn scale_decisions(&self, direction: &str) -> u64 {
        self.inner
            .scale_decisions_total
            .with_label_values(&[direction])
            .get()
    }

    pub fn rollbacks(&self) -> u64 {
        self.inner.rollbacks_total.get()
    }

    pub fn service_cpu_usage(&self) -> f64 {
        self.inner.service_cpu_usage.get()
    }
}

/// Structured logger for rebalancer events
///
/// Provides consistent JSON-formatted logging for migrations, spot
/// interruptions, scale decisions and window changes.
#[derive(Debug, Clone)]
pub struct EventLogger {
    cluster: String,
}

impl EventLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Log a successful pod move
    pub fn log_migration(&self, pod: &str, namespace: &str, from: &str, to: &str, priority: f64) {
        info!(
            event = "pod_migrated",
            cluster = %self.cluster,
            pod = %pod,
            namespace = %namespace,
            from = %from,
            to = %to,
            priority = priority,
            "Pod moved to spot node"
        );
    }

    /// Log a migration refused by policy
    pub fn log_migration_denied(&self, pod: &str, namespace: &str, reason: &str) {
        warn!(
            event = "migration_denied",
            cluster = %self.cluster,
            pod = %pod,
            namespace = %namespace,
            reason = %reason,
            "Pod left in place"
        );
    }

    /// Log a spot node disappearing
    pub fn log_node_interrupted(&self, node: &str, orphaned_pods: usize) {
        warn!(
            event = "node_interrupted",
            cluster = %self.cluster,
            node = %node,
            orphaned_pods = orphaned_pods,
            "Spot node interrupted"
        );
    }

    /// Log a re-placement after an interruption
    pub fn log_fallback_placement(&self, pod: &str, from: &str, to: &str, durable: bool) {
        info!(
            event = "fallback_placement",
            cluster = %self.cluster,
            pod = %pod,
            from = %from,
            to = %to,
            durable_fallback = durable,
            "Pod rescheduled after interruption"
        );
    }

    /// Log a pod that could not be re-placed anywhere
    pub fn log_unplaceable(&self, pod: &str, from: &str) {
        error!(
            event = "pod_unplaceable",
            cluster = %self.cluster,
            pod = %pod,
            from = %from,
            "No node with capacity for interrupted pod"
        );
    }

    /// Log a scale decision
    pub fn log_scale_decision(&self, direction: &str, from: u32, to: u32, reason: &str) {
        info!(
            event = "scale_decision",
            cluster = %self.cluster,
            direction = %direction,
            from_replicas = from,
            to_replicas = to,
            reason = %reason,
            "Scale decision issued"
        );
    }

    /// Log window bounds being applied
    pub fn log_window_applied(&self, window: &str, min_replicas: u32, max_replicas: u32) {
        info!(
            event = "window_applied",
            cluster = %self.cluster,
            window = %window,
            min_replicas = min_replicas,
            max_replicas = max_replicas,
            "Schedule window bounds applied"
        );
    }

    /// Log an emergency override or its release
    pub fn log_rollback(&self, mean_cpu: f64, max_replicas: u32, applied: bool) {
        if applied {
            warn!(
                event = "rollback_applied",
                cluster = %self.cluster,
                mean_cpu = mean_cpu,
                max_replicas = max_replicas,
                "CPU above rollback threshold, restoring global max replicas"
            );
        } else {
            info!(
                event = "rollback_released",
                cluster = %self.cluster,
                mean_cpu = mean_cpu,
                max_replicas = max_replicas,
                "Load subsided, window bounds restored"
            );
        }
    }

    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "rebalancer_started",
            cluster = %self.cluster,
            version = %version,
            mode = %mode,
            "Spot rebalancer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "rebalancer_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Spot rebalancer shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_instances_are_independent() {
        let first = RebalancerMetrics::new().unwrap();
        let second = RebalancerMetrics::new().unwrap();

        first.inc_pods_migrated();
        first.inc_pods_migrated();

        assert_eq!(first.pods_migrated(), 2);
        assert_eq!(second.pods_migrated(), 0);
    }

    #[test]
    fn test_encode_contains_prefixed_names() {
        let metrics = RebalancerMetrics::new().unwrap();
        metrics.observe_cycle(0.02);
        metrics.record_scale_decision("up", 3);

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("spot_rebalancer_cycles_total 1"));
        assert!(text.contains("spot_rebalancer_scale_decisions_total{direction=\"up\"} 1"));
        assert!(text.contains("spot_rebalancer_replicas 3"));
    }

    #[test]
    fn test_event_logger_creation() {
        let logger = EventLogger::new("test-cluster");
        assert_eq!(logger.cluster(), "test-cluster");
    }
}
