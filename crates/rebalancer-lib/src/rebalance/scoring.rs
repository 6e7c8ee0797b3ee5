//! Destination scoring and pod migration priority

use crate::cluster::ClusterState;
use crate::models::{Node, NodeDestinationScore, Pod};
use chrono::{DateTime, Utc};

/// Pods older than this get the age bonus
const AGE_BONUS_AFTER_SECS: i64 = 3600;

/// Scores nodes as migration destinations
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeScorer;

impl NodeScorer {
    /// Desirability of `node` as a destination; larger and emptier is better
    pub fn score(node: &Node) -> f64 {
        let base = 0.7 * node.allocatable.cpu_cores + 0.3 * node.allocatable.memory_gib();
        let (cpu_util, mem_util) = node.utilization();
        let free_factor = ((1.0 - cpu_util) + (1.0 - mem_util)) / 2.0;
        base * (1.0 + free_factor * 2.0)
    }

    /// Spot nodes ranked by descending score
    ///
    /// Durable nodes never appear. The sort is stable, so equal scores keep
    /// observation order.
    pub fn rank_destinations(state: &ClusterState) -> Vec<NodeDestinationScore> {
        let mut ranked: Vec<NodeDestinationScore> = state
            .nodes
            .iter()
            .filter(|n| n.is_preemptible())
            .map(|n| NodeDestinationScore {
                node: n.name.clone(),
                score: Self::score(n),
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }
}

/// Migration priority of a pod; higher moves first
///
/// Scores are only comparable within one pass.
pub fn pod_priority(pod: &Pod, now: DateTime<Utc>) -> f64 {
    let mut priority = 0.0;

    if !pod.critical {
        priority += 5.0;
    }

    if (now - pod.created_at).num_seconds() > AGE_BONUS_AFTER_SECS {
        priority += 1.0;
    }

    // Smaller pods are cheaper to move
    let cpu_factor = 1.0 - (pod.requests.cpu_cores / 2.0).min(1.0);
    let mem_factor = 1.0 - (pod.requests.memory_gib() / 4.0).min(1.0);
    priority + (cpu_factor + mem_factor) * 0.5
}
