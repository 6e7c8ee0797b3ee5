//! Redistribution of pods after a spot node is reclaimed

use crate::cluster::ClusterState;
use crate::models::NodeClass;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Where an orphaned pod ended up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub pod: String,
    /// `None` when no node had room
    pub node: Option<String>,
    pub durable: bool,
}

/// Result of handling one node loss
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackReport {
    pub node: String,
    pub orphaned: usize,
    pub placements: Vec<Placement>,
}

impl FallbackReport {
    pub fn placed_on_spot(&self) -> usize {
        self.placements
            .iter()
            .filter(|p| p.node.is_some() && !p.durable)
            .count()
    }

    pub fn placed_on_fallback(&self) -> usize {
        self.placements.iter().filter(|p| p.durable).count()
    }

    pub fn unplaceable(&self) -> Vec<&str> {
        self.placements
            .iter()
            .filter(|p| p.node.is_none())
            .map(|p| p.pod.as_str())
            .collect()
    }
}

/// Reacts to the forced removal of a spot node
#[derive(Debug, Clone, Default)]
pub struct PreemptionFallbackHandler {
    fallback_node: Option<String>,
}

impl PreemptionFallbackHandler {
    /// `fallback_node` names the durable node used when no spot node has
    /// room; when unset the first durable node is used.
    pub fn new(fallback_node: Option<String>) -> Self {
        Self { fallback_node }
    }

    fn resolve_fallback(&self, state: &ClusterState) -> Option<String> {
        if let Some(name) = &self.fallback_node {
            match state.node(name) {
                Some(node) if node.class == NodeClass::Durable => return Some(name.clone()),
                _ => warn!(node = %name, "Configured fallback node missing or not durable"),
            }
        }
        state
            .nodes
            .iter()
            .find(|n| n.class == NodeClass::Durable)
            .map(|n| n.name.clone())
    }

    /// Remove `node_name` and re-place its pods
    ///
    /// Returns `None` without touching the state when the node does not exist
    /// or is durable. Spot targets are chosen uniformly at random among those
    /// with room, mirroring an external scheduler.
    pub fn handle_node_loss<R: Rng + ?Sized>(
        &self,
        state: &mut ClusterState,
        node_name: &str,
        rng: &mut R,
    ) -> Option<FallbackReport> {
        match state.node(node_name) {
            None => {
                warn!(node = %node_name, "Cannot interrupt unknown node");
                return None;
            }
            Some(node) if node.class != NodeClass::Preemptible => {
                warn!(node = %node_name, "Cannot interrupt a durable node");
                return None;
            }
            Some(_) => {}
        }

        let lost = state.remove_node(node_name)?;
        let fallback = self.resolve_fallback(state);
        let mut report = FallbackReport {
            node: node_name.to_string(),
            orphaned: lost.pods.len(),
            placements: Vec::with_capacity(lost.pods.len()),
        };

        info!(node = %node_name, orphaned = lost.pods.len(), "Spot node interrupted");

        for pod in lost.pods {
            let key = pod.key();
            let eligible: Vec<usize> = state
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.is_preemptible() && n.has_capacity_for(&pod.requests))
                .map(|(idx, _)| idx)
                .collect();

            if let Some(&idx) = eligible.choose(rng) {
                let target = state.nodes[idx].name.clone();
                let placed = state.nodes[idx].try_place(pod).is_ok();
                report.placements.push(Placement {
                    pod: key,
                    node: placed.then_some(target),
                    durable: false,
                });
                continue;
            }

            let target = fallback
                .as_deref()
                .and_then(|name| state.nodes.iter_mut().find(|n| n.name == name));
            match target.map(|node| (node.name.clone(), node.try_place(pod))) {
                Some((name, Ok(()))) => report.placements.push(Placement {
                    pod: key,
                    node: Some(name),
                    durable: true,
                }),
                _ => {
                    warn!(pod = %key, from = %node_name, "No capacity left for orphaned pod");
                    report.placements.push(Placement {
                        pod: key,
                        node: None,
                        durable: false,
                    });
                }
            }
        }

        Some(report)
    }
}
