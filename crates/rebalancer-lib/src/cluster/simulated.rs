//! In-memory cluster used in simulation mode and tests

use super::{BoundsPatcher, ClusterState, ClusterStateProvider, EvictionOutcome, Permission};
use crate::error::ClusterError;
use crate::models::{Node, NodeClass, Pod};
use crate::quantity::ResourceAmount;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Demo cluster: two spot nodes and one regular node holding ten pods
///
/// Every third pod is critical; pod `app-i` was created `i` hours before `now`.
pub fn demo_cluster(now: DateTime<Utc>) -> ClusterState {
    let spot_1 = Node::new(
        "aks-spot-1",
        NodeClass::Preemptible,
        ResourceAmount::from_gib(4.0, 16.0),
    )
    .with_pool("spot");
    let spot_2 = Node::new(
        "aks-spot-2",
        NodeClass::Preemptible,
        ResourceAmount::from_gib(2.0, 8.0),
    )
    .with_pool("spot");
    let mut regular = Node::new(
        "aks-regular-1",
        NodeClass::Durable,
        ResourceAmount::from_gib(8.0, 32.0),
    )
    .with_pool("system");

    regular.pods = (1..=10)
        .map(|i: i64| {
            let cpu = 0.2 + (i % 5) as f64 * 0.1;
            let mem_gib = 0.5 + (i % 3) as f64 * 0.5;
            Pod::new(
                format!("app-{i}"),
                "default",
                ResourceAmount::from_gib(cpu, mem_gib),
                i % 3 == 0,
                now - Duration::hours(i),
            )
        })
        .collect();
    regular.recompute_usage();

    ClusterState::new(vec![spot_1, spot_2, regular])
}

/// Cluster state held entirely in process
///
/// Evictions only answer the disruption check; moving the pod is done by
/// the caller on its working copy and persisted with `commit`.
#[derive(Debug, Default)]
pub struct SimulatedCluster {
    state: RwLock<ClusterState>,
}

impl SimulatedCluster {
    pub fn new(state: ClusterState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn demo(now: DateTime<Utc>) -> Self {
        Self::new(demo_cluster(now))
    }

    pub async fn snapshot(&self) -> ClusterState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl ClusterStateProvider for SimulatedCluster {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn observe(&self) -> Result<ClusterState, ClusterError> {
        Ok(self.state.read().await.clone())
    }

    async fn evict(&self, pod: &Pod) -> Result<EvictionOutcome, ClusterError> {
        let state = self.state.read().await;
        let resident = state
            .nodes
            .iter()
            .flat_map(|n| n.pods.iter())
            .find(|p| p.same_as(pod));

        let outcome = match resident {
            None => EvictionOutcome::Denied("pod not found".to_string()),
            Some(p) if p.critical => {
                EvictionOutcome::Denied("disruption budget forbids evicting a critical pod".to_string())
            }
            Some(_) => EvictionOutcome::Evicted,
        };
        debug!(pod = %pod.key(), outcome = ?outcome, "Simulated eviction");
        Ok(outcome)
    }

    async fn commit(&self, state: &ClusterState) -> Result<(), ClusterError> {
        *self.state.write().await = state.clone();
        Ok(())
    }

    async fn has_permissions(&self, _required: &[Permission]) -> Result<bool, ClusterError> {
        Ok(true)
    }
}

/// One recorded bounds patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundsPatch {
    pub namespace: String,
    pub name: String,
    pub min_replicas: Option<u32>,
    pub max_replicas: u32,
}

/// Bounds patcher that logs and records instead of calling the API
#[derive(Debug, Default)]
pub struct LoggingBoundsPatcher {
    patches: Mutex<Vec<BoundsPatch>>,
}

impl LoggingBoundsPatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn patches(&self) -> Vec<BoundsPatch> {
        self.patches.lock().await.clone()
    }
}

#[async_trait]
impl BoundsPatcher for LoggingBoundsPatcher {
    async fn patch_bounds(
        &self,
        namespace: &str,
        name: &str,
        min_replicas: Option<u32>,
        max_replicas: u32,
    ) -> Result<(), ClusterError> {
        info!(
            namespace,
            hpa = name,
            min_replicas = ?min_replicas,
            max_replicas,
            "Simulated HPA bounds patch"
        );
        self.patches.lock().await.push(BoundsPatch {
            namespace: namespace.to_string(),
            name: name.to_string(),
            min_replicas,
            max_replicas,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_cluster_layout() {
        let state = demo_cluster(Utc::now());

        assert_eq!(state.nodes.len(), 3);
        let regular = state.node("aks-regular-1").unwrap();
        assert_eq!(regular.pods.len(), 10);
        assert_eq!(regular.pods.iter().filter(|p| p.critical).count(), 3);
        assert!(regular.usage.fits_within(&regular.allocatable));
        assert!(state.node("aks-spot-1").unwrap().pods.is_empty());
    }

    #[tokio::test]
    async fn test_critical_pod_eviction_denied() {
        let cluster = SimulatedCluster::demo(Utc::now());
        let state = cluster.observe().await.unwrap();
        let pods = &state.node("aks-regular-1").unwrap().pods;

        let critical = pods.iter().find(|p| p.critical).unwrap();
        let regular = pods.iter().find(|p| !p.critical).unwrap();

        assert!(matches!(
            cluster.evict(critical).await.unwrap(),
            EvictionOutcome::Denied(_)
        ));
        assert_eq!(cluster.evict(regular).await.unwrap(), EvictionOutcome::Evicted);
    }

    #[tokio::test]
    async fn test_commit_replaces_state() {
        let cluster = SimulatedCluster::demo(Utc::now());
        let mut state = cluster.observe().await.unwrap();
        state.remove_node("aks-spot-2");

        cluster.commit(&state).await.unwrap();
        assert!(cluster.snapshot().await.node("aks-spot-2").is_none());
    }

    #[tokio::test]
    async fn test_logging_patcher_records() {
        let patcher = LoggingBoundsPatcher::new();
        patcher
            .patch_bounds("default", "my-app-hpa", Some(2), 5)
            .await
            .unwrap();

        let patches = patcher.patches().await;
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].max_replicas, 5);
    }
}
