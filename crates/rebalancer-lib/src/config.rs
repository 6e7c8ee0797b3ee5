//! Rebalancer configuration
//!
//! All settings have defaults so an empty environment yields a working
//! simulation setup. The daemon layers an optional config file and
//! `REBALANCER_<SECTION>__<KEY>` environment variables (for example
//! `REBALANCER_SCALING__MIN_REPLICAS`) on top of these defaults.

use crate::error::PolicyError;
use crate::scaling::{ScheduleWindow, ScheduleWindowPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the daemon talks to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// In-memory cluster, logging-only patches and resizes
    Simulation,
    /// Live Kubernetes API and Prometheus backend
    Production,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancerConfig {
    #[serde(default = "default_mode")]
    pub mode: RunMode,

    /// Cluster name used in structured events
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub rebalance: RebalanceConfig,

    #[serde(default)]
    pub scaling: ScalingConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            cluster_name: default_cluster_name(),
            api_port: default_api_port(),
            rebalance: RebalanceConfig::default(),
            scaling: ScalingConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

fn default_mode() -> RunMode {
    RunMode::Simulation
}

fn default_cluster_name() -> String {
    std::env::var("AKS_CLUSTER_NAME").unwrap_or_else(|_| "local".to_string())
}

fn default_api_port() -> u16 {
    8080
}

/// Rebalance loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Sleep between loop ticks
    #[serde(default = "default_rebalance_interval")]
    pub interval_secs: u64,

    /// Minimum time between two cycles (rate limit)
    #[serde(default = "default_rebalance_interval")]
    pub min_interval_secs: u64,

    /// Upper bound of pods moved per cycle
    #[serde(default = "default_max_pods_per_cycle")]
    pub max_pods_per_cycle: usize,

    /// Durable node receiving pods when no spot node has room
    #[serde(default)]
    pub fallback_node: Option<String>,

    /// Node label identifying spot capacity
    #[serde(default = "default_spot_label")]
    pub spot_label: String,

    /// Value of `spot_label` on spot nodes
    #[serde(default = "default_spot_label_value")]
    pub spot_label_value: String,

    /// Node label carrying the node pool name
    #[serde(default = "default_pool_label")]
    pub pool_label: String,

    /// Pod label marking pods that must not be disrupted
    #[serde(default = "default_critical_label")]
    pub critical_label: String,

    /// Retries for rate-limited evictions
    #[serde(default = "default_eviction_max_retries")]
    pub eviction_max_retries: u32,

    /// Seed for fallback placement; random when unset
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_rebalance_interval(),
            min_interval_secs: default_rebalance_interval(),
            max_pods_per_cycle: default_max_pods_per_cycle(),
            fallback_node: None,
            spot_label: default_spot_label(),
            spot_label_value: default_spot_label_value(),
            pool_label: default_pool_label(),
            critical_label: default_critical_label(),
            eviction_max_retries: default_eviction_max_retries(),
            rng_seed: None,
        }
    }
}

impl RebalanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

fn default_rebalance_interval() -> u64 {
    30
}

fn default_max_pods_per_cycle() -> usize {
    10
}

fn default_spot_label() -> String {
    "kubernetes.azure.com/scalesetpriority".to_string()
}

fn default_spot_label_value() -> String {
    "spot".to_string()
}

fn default_pool_label() -> String {
    "agentpool".to_string()
}

fn default_critical_label() -> String {
    "critical".to_string()
}

fn default_eviction_max_retries() -> u32 {
    3
}

/// Scale decision engine and node-pool autoscaler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Mean CPU percent above which to scale up
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    /// Mean memory percent above which to scale up
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    /// Soft response time target in seconds
    #[serde(default = "default_response_time_threshold")]
    pub response_time_threshold: f64,

    /// Hard response time ceiling in seconds
    #[serde(default = "default_max_response_time")]
    pub max_response_time: f64,

    /// Cooldown between two scaling actions
    #[serde(default = "default_min_change_period")]
    pub min_change_period_secs: u64,

    /// Sample window used for smoothing
    #[serde(default = "default_stabilization_window")]
    pub stabilization_window_secs: u64,

    /// Fraction of the thresholds below which scale-down is considered
    #[serde(default = "default_scale_down_factor")]
    pub scale_down_factor: f64,

    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,

    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,

    /// Node pool resized by the autoscaler
    #[serde(default = "default_node_pool")]
    pub node_pool: String,

    /// Autoscaler tick interval
    #[serde(default = "default_scaling_interval")]
    pub interval_secs: u64,

    /// Namespace whose workload metrics drive scaling
    #[serde(default = "default_metrics_namespace")]
    pub namespace: String,

    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    #[serde(default)]
    pub prometheus_token: Option<String>,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            response_time_threshold: default_response_time_threshold(),
            max_response_time: default_max_response_time(),
            min_change_period_secs: default_min_change_period(),
            stabilization_window_secs: default_stabilization_window(),
            scale_down_factor: default_scale_down_factor(),
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            node_pool: default_node_pool(),
            interval_secs: default_scaling_interval(),
            namespace: default_metrics_namespace(),
            prometheus_url: default_prometheus_url(),
            prometheus_token: None,
        }
    }
}

impl ScalingConfig {
    pub fn min_change_period(&self) -> Duration {
        Duration::from_secs(self.min_change_period_secs)
    }

    pub fn stabilization_window(&self) -> Duration {
        Duration::from_secs(self.stabilization_window_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// PromQL for average CPU percent of the namespace
    pub fn cpu_query(&self) -> String {
        format!(
            "avg(rate(container_cpu_usage_seconds_total{{namespace=\"{}\"}}[1m])) * 100",
            self.namespace
        )
    }

    /// PromQL for working set as percent of the memory limit
    pub fn memory_query(&self) -> String {
        format!(
            "avg(container_memory_working_set_bytes{{namespace=\"{ns}\"}}) / avg(container_spec_memory_limit_bytes{{namespace=\"{ns}\"}}) * 100",
            ns = self.namespace
        )
    }

    /// PromQL for the number of pods in the namespace
    pub fn pod_count_query(&self) -> String {
        format!("count(kube_pod_info{{namespace=\"{}\"}})", self.namespace)
    }
}

fn default_cpu_threshold() -> f64 {
    70.0
}

fn default_memory_threshold() -> f64 {
    80.0
}

fn default_response_time_threshold() -> f64 {
    1.0
}

fn default_max_response_time() -> f64 {
    2.0
}

fn default_min_change_period() -> u64 {
    120
}

fn default_stabilization_window() -> u64 {
    60
}

fn default_scale_down_factor() -> f64 {
    0.7
}

fn default_min_replicas() -> u32 {
    1
}

fn default_max_replicas() -> u32 {
    10
}

fn default_node_pool() -> String {
    "spot".to_string()
}

fn default_scaling_interval() -> u64 {
    60
}

fn default_metrics_namespace() -> String {
    "keda".to_string()
}

fn default_prometheus_url() -> String {
    "http://prometheus-kube-prometheus-prometheus.monitoring:9090".to_string()
}

/// One configured time window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub name: String,
    /// Inclusive start, `HH:MM`
    pub start: String,
    /// Exclusive end, `HH:MM`; earlier than `start` means the window wraps midnight
    pub end: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
}

/// Schedule-window HPA bounds settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_namespace")]
    pub namespace: String,

    /// HorizontalPodAutoscaler patched with the window bounds
    #[serde(default = "default_hpa_name")]
    pub hpa_name: String,

    #[serde(default = "default_schedule_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_rollback_enabled")]
    pub rollback_enabled: bool,

    /// Mean CPU percent that forces the global max bound
    #[serde(default = "default_rollback_threshold_cpu")]
    pub rollback_threshold_cpu: f64,

    #[serde(default = "default_rollback_check_interval")]
    pub rollback_check_interval_secs: u64,

    #[serde(default = "default_windows")]
    pub windows: Vec<WindowConfig>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            namespace: default_schedule_namespace(),
            hpa_name: default_hpa_name(),
            interval_secs: default_schedule_interval(),
            rollback_enabled: default_rollback_enabled(),
            rollback_threshold_cpu: default_rollback_threshold_cpu(),
            rollback_check_interval_secs: default_rollback_check_interval(),
            windows: default_windows(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn rollback_check_interval(&self) -> Duration {
        Duration::from_secs(self.rollback_check_interval_secs)
    }

    /// Parse and validate the windows into a policy
    pub fn policy(&self) -> Result<ScheduleWindowPolicy, PolicyError> {
        let windows = self
            .windows
            .iter()
            .map(|w| ScheduleWindow::parse(&w.name, &w.start, &w.end, w.min_replicas, w.max_replicas))
            .collect::<Result<Vec<_>, _>>()?;
        ScheduleWindowPolicy::new(windows)
    }
}

fn default_schedule_namespace() -> String {
    "default".to_string()
}

fn default_hpa_name() -> String {
    "my-app-hpa".to_string()
}

fn default_schedule_interval() -> u64 {
    60
}

fn default_rollback_enabled() -> bool {
    true
}

fn default_rollback_threshold_cpu() -> f64 {
    85.0
}

fn default_rollback_check_interval() -> u64 {
    300
}

fn default_windows() -> Vec<WindowConfig> {
    let window = |name: &str, start: &str, end: &str, min: u32, max: u32| WindowConfig {
        name: name.to_string(),
        start: start.to_string(),
        end: end.to_string(),
        min_replicas: min,
        max_replicas: max,
    };

    vec![
        window("night", "00:00", "06:00", 1, 3),
        window("morning", "06:00", "12:00", 2, 5),
        window("afternoon", "12:00", "18:00", 3, 8),
        window("evening", "18:00", "00:00", 2, 6),
    ]
}
