//! Cluster, metrics and node-pool backends for each run mode

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rebalancer_lib::{
    cluster::{
        BoundsPatcher, ClusterStateProvider, KubeClusterProvider, LoggingBoundsPatcher,
        NodePoolResizer, SimulatedCluster, SimulatedNodePool, REQUIRED_PERMISSIONS,
    },
    config::RunMode,
    scaling::{MetricsSource, PrometheusSource, SyntheticMetricsSource},
    RebalancerConfig,
};
use std::sync::Arc;
use tracing::warn;

/// External collaborators for one run mode
pub struct Backends {
    pub cluster: Arc<dyn ClusterStateProvider>,
    pub patcher: Arc<dyn BoundsPatcher>,
    pub resizer: Arc<dyn NodePoolResizer>,
    /// Metrics read by the autoscaler
    pub metrics_source: Arc<dyn MetricsSource>,
    /// Metrics read by the schedule-window rollback check
    pub rollback_source: Arc<dyn MetricsSource>,
}

pub async fn backends(config: &RebalancerConfig) -> Result<Backends> {
    match config.mode {
        RunMode::Simulation => {
            // synthetic load advances per query, so each loop gets its own
            let seed = config.rebalance.rng_seed;
            Ok(Backends {
                cluster: Arc::new(SimulatedCluster::demo(Utc::now())),
                patcher: Arc::new(LoggingBoundsPatcher::new()),
                resizer: Arc::new(SimulatedNodePool::new()),
                metrics_source: Arc::new(SyntheticMetricsSource::new(seed)),
                rollback_source: Arc::new(SyntheticMetricsSource::new(
                    seed.map(|s| s.wrapping_add(1)),
                )),
            })
        }
        RunMode::Production => {
            let kube = Arc::new(
                KubeClusterProvider::try_default(&config.rebalance)
                    .await
                    .context("Failed to connect to the Kubernetes API")?,
            );

            let allowed = kube
                .has_permissions(REQUIRED_PERMISSIONS)
                .await
                .context("Failed to check RBAC permissions")?;
            if !allowed {
                let required: Vec<String> =
                    REQUIRED_PERMISSIONS.iter().map(|p| p.to_string()).collect();
                bail!("Missing RBAC permissions, need: {}", required.join(", "));
            }

            let prometheus: Arc<dyn MetricsSource> = Arc::new(PrometheusSource::new(
                &config.scaling.prometheus_url,
                config.scaling.prometheus_token.clone(),
            )?);

            warn!(
                pool = %config.scaling.node_pool,
                "Node-pool resizes are recorded only; no cloud provider API is called"
            );

            Ok(Backends {
                cluster: kube.clone(),
                patcher: kube,
                resizer: Arc::new(SimulatedNodePool::new()),
                metrics_source: prometheus.clone(),
                rollback_source: prometheus,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebalancer_lib::config::RebalanceConfig;

    #[tokio::test]
    async fn test_simulation_loops_read_independent_load() {
        let config = RebalancerConfig {
            rebalance: RebalanceConfig {
                rng_seed: Some(5),
                ..Default::default()
            },
            ..Default::default()
        };
        let backends = backends(&config).await.unwrap();
        let cpu_query = config.scaling.cpu_query();

        // enough rollback checks to reach the medium phase on a shared source
        for _ in 0..15 {
            backends.rollback_source.query(&cpu_query).await.unwrap();
        }

        let cpu = backends
            .metrics_source
            .query(&cpu_query)
            .await
            .unwrap()
            .unwrap();
        assert!((25.0..45.0).contains(&cpu), "autoscaler left the low phase: {cpu}");
    }
}
