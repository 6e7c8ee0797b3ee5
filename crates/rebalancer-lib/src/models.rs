//! Core data models for the rebalancer

use crate::quantity::ResourceAmount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capacity class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeClass {
    /// Spot capacity, reclaimable by the provider at any time
    Preemptible,
    /// Regular on-demand capacity
    Durable,
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeClass::Preemptible => write!(f, "spot"),
            NodeClass::Durable => write!(f, "regular"),
        }
    }
}

/// A pod as seen by the rebalancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub requests: ResourceAmount,
    pub critical: bool,
    pub created_at: DateTime<Utc>,
}

impl Pod {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        requests: ResourceAmount,
        critical: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            requests,
            critical,
            created_at,
        }
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Same identity (namespace + name)
    pub fn same_as(&self, other: &Pod) -> bool {
        self.name == other.name && self.namespace == other.namespace
    }
}

/// A node with its capacity, committed usage and resident pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub class: NodeClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    pub allocatable: ResourceAmount,
    pub usage: ResourceAmount,
    pub pods: Vec<Pod>,
}

impl Node {
    pub fn new(name: impl Into<String>, class: NodeClass, allocatable: ResourceAmount) -> Self {
        Self {
            name: name.into(),
            class,
            pool: None,
            allocatable,
            usage: ResourceAmount::zero(),
            pods: Vec::new(),
        }
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn is_preemptible(&self) -> bool {
        self.class == NodeClass::Preemptible
    }

    /// Recompute committed usage from resident pod requests
    pub fn recompute_usage(&mut self) {
        self.usage = self.pods.iter().map(|p| p.requests).sum();
    }

    /// True if `requests` fits into the node's spare capacity
    pub fn has_capacity_for(&self, requests: &ResourceAmount) -> bool {
        (self.usage + *requests).fits_within(&self.allocatable)
    }

    /// CPU and memory utilization ratios; zero capacity counts as fully used
    pub fn utilization(&self) -> (f64, f64) {
        let cpu = if self.allocatable.cpu_cores > 0.0 {
            self.usage.cpu_cores / self.allocatable.cpu_cores
        } else {
            1.0
        };
        let mem = if self.allocatable.memory_bytes > 0.0 {
            self.usage.memory_bytes / self.allocatable.memory_bytes
        } else {
            1.0
        };
        (cpu, mem)
    }

    /// Append a pod if it fits, handing it back otherwise
    pub fn try_place(&mut self, pod: Pod) -> Result<(), Pod> {
        if !self.has_capacity_for(&pod.requests) {
            return Err(pod);
        }
        self.pods.push(pod);
        self.recompute_usage();
        Ok(())
    }

    /// Remove a resident pod by identity
    pub fn take_pod(&mut self, pod: &Pod) -> Option<Pod> {
        let idx = self.pods.iter().position(|p| p.same_as(pod))?;
        let removed = self.pods.remove(idx);
        self.recompute_usage();
        Some(removed)
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            name: self.name.clone(),
            class: self.class,
            pod_count: self.pods.len(),
            cpu_used: self.usage.cpu_cores,
            cpu_allocatable: self.allocatable.cpu_cores,
            memory_used_gib: self.usage.memory_gib(),
            memory_allocatable_gib: self.allocatable.memory_gib(),
        }
    }
}

/// Serializable per-node view used in reports, the status API and the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub class: NodeClass,
    pub pod_count: usize,
    pub cpu_used: f64,
    pub cpu_allocatable: f64,
    pub memory_used_gib: f64,
    pub memory_allocatable_gib: f64,
}

/// Pod paired with its migration priority (higher moves first)
#[derive(Debug, Clone)]
pub struct MigrationCandidateScore {
    pub pod: Pod,
    pub priority: f64,
}

/// Destination node name paired with its desirability (higher preferred)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDestinationScore {
    pub node: String,
    pub score: f64,
}
