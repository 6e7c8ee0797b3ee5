//! Cluster state and the interfaces to the orchestration layer
//!
//! The rebalancer is written once against [`ClusterStateProvider`]. Two
//! providers exist: [`SimulatedCluster`] keeps the whole cluster in memory,
//! [`KubeClusterProvider`] reads and evicts through the Kubernetes API.

mod eviction;
mod live;
mod node_pool;
mod simulated;

pub use eviction::{evict_with_backoff, BackoffPolicy, EvictionResult};
pub use live::KubeClusterProvider;
pub use node_pool::{NodePoolResizer, SimulatedNodePool};
pub use simulated::{demo_cluster, BoundsPatch, LoggingBoundsPatcher, SimulatedCluster};

use crate::error::ClusterError;
use crate::models::{Node, NodeClass, NodeSummary, Pod};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// In-process model of nodes and their resident pods
///
/// Node order is observation order; it is the tie-breaker for destination
/// ranking and fallback selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub nodes: Vec<Node>,
}

impl ClusterState {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    /// Name of the node a pod currently lives on
    pub fn locate_pod(&self, pod: &Pod) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.pods.iter().any(|p| p.same_as(pod)))
            .map(|n| n.name.as_str())
    }

    /// Remove a pod from whichever node holds it
    pub fn remove_pod(&mut self, pod: &Pod) -> Option<(String, Pod)> {
        self.nodes.iter_mut().find_map(|node| {
            node.take_pod(pod)
                .map(|removed| (node.name.clone(), removed))
        })
    }

    /// Drop a node entirely, returning it with its pods
    pub fn remove_node(&mut self, name: &str) -> Option<Node> {
        let idx = self.nodes.iter().position(|n| n.name == name)?;
        Some(self.nodes.remove(idx))
    }

    /// Pods currently resident on durable nodes, in node then residency order
    pub fn pods_on_durable_nodes(&self) -> Vec<Pod> {
        self.nodes
            .iter()
            .filter(|n| n.class == NodeClass::Durable)
            .flat_map(|n| n.pods.iter().cloned())
            .collect()
    }

    pub fn total_pods(&self) -> usize {
        self.nodes.iter().map(|n| n.pods.len()).sum()
    }

    pub fn recompute_usage(&mut self) {
        for node in &mut self.nodes {
            node.recompute_usage();
        }
    }

    pub fn summaries(&self) -> Vec<NodeSummary> {
        self.nodes.iter().map(Node::summary).collect()
    }
}

/// Result of a single eviction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionOutcome {
    Evicted,
    /// Refused by a disruption budget or policy; not retried
    Denied(String),
    /// API throttling; retried with backoff
    RateLimited,
}

/// An RBAC permission the rebalancer needs in production
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub group: &'static str,
    pub resource: &'static str,
    pub subresource: Option<&'static str>,
    pub verb: &'static str,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.subresource {
            Some(sub) => write!(f, "{} {}/{}", self.verb, self.resource, sub),
            None => write!(f, "{} {}", self.verb, self.resource),
        }
    }
}

/// Permissions checked before the production loop starts
pub const REQUIRED_PERMISSIONS: &[Permission] = &[
    Permission {
        group: "",
        resource: "nodes",
        subresource: None,
        verb: "list",
    },
    Permission {
        group: "",
        resource: "pods",
        subresource: None,
        verb: "list",
    },
    Permission {
        group: "",
        resource: "pods",
        subresource: Some("eviction"),
        verb: "create",
    },
    Permission {
        group: "autoscaling",
        resource: "horizontalpodautoscalers",
        subresource: None,
        verb: "patch",
    },
];

/// Source of node/pod state and executor of evictions
#[async_trait]
pub trait ClusterStateProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    /// Observe the current nodes and their resident pods
    async fn observe(&self) -> Result<ClusterState, ClusterError>;

    /// Ask the orchestration layer to evict a pod
    async fn evict(&self, pod: &Pod) -> Result<EvictionOutcome, ClusterError>;

    /// Persist the state produced by a cycle
    ///
    /// The live provider ignores this: evicted pods are re-placed by the
    /// cluster scheduler, not by the rebalancer.
    async fn commit(&self, state: &ClusterState) -> Result<(), ClusterError>;

    /// Check that every permission in `required` is granted
    async fn has_permissions(&self, required: &[Permission]) -> Result<bool, ClusterError>;
}

/// Patches min/max replica bounds on a scaling resource
#[async_trait]
pub trait BoundsPatcher: Send + Sync {
    /// Patch `max_replicas` and, when given, `min_replicas`
    async fn patch_bounds(
        &self,
        namespace: &str,
        name: &str,
        min_replicas: Option<u32>,
        max_replicas: u32,
    ) -> Result<(), ClusterError>;
}
