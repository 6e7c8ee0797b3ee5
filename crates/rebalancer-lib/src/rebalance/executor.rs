//! Migration of selected pods onto ranked spot destinations

use crate::cluster::{evict_with_backoff, BackoffPolicy, ClusterState, ClusterStateProvider, EvictionResult};
use crate::models::{MigrationCandidateScore, NodeDestinationScore, Pod};
use crate::observability::{EventLogger, RebalancerMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to one candidate pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    Moved { from: String, to: String },
    /// Disruption check refused the eviction
    Denied { reason: String },
    /// No destination has room; nothing was evicted
    InsufficientCapacity,
    /// Pod no longer resident on any known node
    NotFound,
    /// Eviction stayed rate limited through every retry
    RateLimited,
    /// Eviction call failed outright
    Failed { error: String },
}

/// Per-pod entry of a migration report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodMigration {
    pub pod: String,
    pub priority: f64,
    #[serde(flatten)]
    pub outcome: MigrationOutcome,
}

/// Result of one migration batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub moved: usize,
    pub denied: usize,
    pub skipped: usize,
    pub migrations: Vec<PodMigration>,
}

impl MigrationReport {
    fn push(&mut self, candidate: &MigrationCandidateScore, outcome: MigrationOutcome) {
        match outcome {
            MigrationOutcome::Moved { .. } => self.moved += 1,
            MigrationOutcome::Denied { .. } | MigrationOutcome::InsufficientCapacity => {
                self.denied += 1
            }
            _ => self.skipped += 1,
        }
        self.migrations.push(PodMigration {
            pod: candidate.pod.key(),
            priority: candidate.priority,
            outcome,
        });
    }
}

/// Moves pods round-robin across ranked destinations
///
/// Every pod is independent: a denial or failure never rolls back or blocks
/// the rest of the batch.
pub struct MigrationExecutor {
    provider: Arc<dyn ClusterStateProvider>,
    backoff: BackoffPolicy,
    metrics: RebalancerMetrics,
    events: EventLogger,
}

impl MigrationExecutor {
    pub fn new(
        provider: Arc<dyn ClusterStateProvider>,
        backoff: BackoffPolicy,
        metrics: RebalancerMetrics,
        events: EventLogger,
    ) -> Self {
        Self {
            provider,
            backoff,
            metrics,
            events,
        }
    }

    /// Execute the batch against `state`, which is updated in place
    pub async fn execute(
        &self,
        state: &mut ClusterState,
        candidates: &[MigrationCandidateScore],
        destinations: &[NodeDestinationScore],
    ) -> MigrationReport {
        let mut report = MigrationReport::default();

        if destinations.is_empty() {
            info!(
                candidates = candidates.len(),
                "No spot destinations available, nothing to migrate"
            );
            return report;
        }

        let mut cursor = 0;
        for candidate in candidates {
            let pod = &candidate.pod;

            let Some(from) = state.locate_pod(pod).map(str::to_string) else {
                warn!(pod = %pod.key(), "Pod not found on any known node, skipping");
                report.push(candidate, MigrationOutcome::NotFound);
                continue;
            };

            if pod.critical {
                self.deny(&mut report, candidate, "critical pod");
                continue;
            }

            let Some((idx, to)) = pick_destination(state, destinations, cursor, pod, &from) else {
                self.metrics.inc_migrations_denied();
                self.events.log_migration_denied(
                    &pod.name,
                    &pod.namespace,
                    "insufficient capacity on spot destinations",
                );
                report.push(candidate, MigrationOutcome::InsufficientCapacity);
                continue;
            };

            let outcome = match evict_with_backoff(self.provider.as_ref(), pod, &self.backoff).await {
                Ok(EvictionResult::Evicted { .. }) => {
                    if move_pod(state, pod, &from, &to) {
                        cursor = (idx + 1) % destinations.len();
                        self.metrics.inc_pods_migrated();
                        self.events.log_migration(
                            &pod.name,
                            &pod.namespace,
                            &from,
                            &to,
                            candidate.priority,
                        );
                        MigrationOutcome::Moved { from, to }
                    } else {
                        warn!(
                            pod = %pod.key(),
                            from = %from,
                            to = %to,
                            "Pod evicted but could not be placed on destination"
                        );
                        MigrationOutcome::Failed {
                            error: format!("evicted but could not be placed on {to}"),
                        }
                    }
                }
                Ok(EvictionResult::Denied(reason)) => {
                    self.deny(&mut report, candidate, &reason);
                    continue;
                }
                Ok(EvictionResult::GaveUp { attempts }) => {
                    warn!(pod = %pod.key(), attempts, "Eviction rate limited, skipping pod");
                    MigrationOutcome::RateLimited
                }
                Err(e) => {
                    warn!(pod = %pod.key(), error = %e, "Eviction failed, skipping pod");
                    MigrationOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.push(candidate, outcome);
        }

        report
    }

    fn deny(&self, report: &mut MigrationReport, candidate: &MigrationCandidateScore, reason: &str) {
        self.metrics.inc_migrations_denied();
        self.events
            .log_migration_denied(&candidate.pod.name, &candidate.pod.namespace, reason);
        report.push(
            candidate,
            MigrationOutcome::Denied {
                reason: reason.to_string(),
            },
        );
    }
}

/// First destination from `cursor` onwards, each tried once, with room for `pod`
fn pick_destination(
    state: &ClusterState,
    destinations: &[NodeDestinationScore],
    cursor: usize,
    pod: &Pod,
    from: &str,
) -> Option<(usize, String)> {
    (0..destinations.len())
        .map(|offset| (cursor + offset) % destinations.len())
        .find(|&idx| {
            let name = &destinations[idx].node;
            name != from
                && state
                    .node(name)
                    .is_some_and(|n| n.has_capacity_for(&pod.requests))
        })
        .map(|idx| (idx, destinations[idx].node.clone()))
}

/// Move a pod between nodes as one step; on failure the pod stays on `from`
fn move_pod(state: &mut ClusterState, pod: &Pod, from: &str, to: &str) -> bool {
    let Some(to_idx) = state.nodes.iter().position(|n| n.name == to) else {
        return false;
    };
    if !state.nodes[to_idx].has_capacity_for(&pod.requests) {
        return false;
    }

    let Some(removed) = state.node_mut(from).and_then(|n| n.take_pod(pod)) else {
        return false;
    };

    if let Err(removed) = state.nodes[to_idx].try_place(removed) {
        if let Some(source) = state.node_mut(from) {
            source.pods.push(removed);
            source.recompute_usage();
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SimulatedCluster;
    use crate::models::{Node, NodeClass};
    use crate::quantity::ResourceAmount;
    use chrono::{Duration, Utc};

    fn pod(name: &str, cpu: f64) -> Pod {
        Pod::new(
            name,
            "default",
            ResourceAmount::from_gib(cpu, 1.0),
            false,
            Utc::now() - Duration::hours(1),
        )
    }

    fn node(name: &str, class: NodeClass, cpu: f64, pods: Vec<Pod>) -> Node {
        let mut node = Node::new(name, class, ResourceAmount::from_gib(cpu, 64.0));
        node.pods = pods;
        node.recompute_usage();
        node
    }

    fn candidates(pods: &[Pod]) -> Vec<MigrationCandidateScore> {
        pods.iter()
            .map(|p| MigrationCandidateScore {
                pod: p.clone(),
                priority: 1.0,
            })
            .collect()
    }

    fn destinations(names: &[&str]) -> Vec<NodeDestinationScore> {
        names
            .iter()
            .map(|n| NodeDestinationScore {
                node: n.to_string(),
                score: 1.0,
            })
            .collect()
    }

    fn executor(state: &ClusterState) -> MigrationExecutor {
        MigrationExecutor::new(
            Arc::new(SimulatedCluster::new(state.clone())),
            BackoffPolicy::new(0),
            RebalancerMetrics::new().unwrap(),
            EventLogger::new("test"),
        )
    }

    fn destination_of(report: &MigrationReport, pod: &str) -> Option<String> {
        report
            .migrations
            .iter()
            .find(|m| m.pod == format!("default/{pod}"))
            .and_then(|m| match &m.outcome {
                MigrationOutcome::Moved { to, .. } => Some(to.clone()),
                _ => None,
            })
    }

    #[tokio::test]
    async fn test_moves_rotate_across_destinations() {
        let pods: Vec<Pod> = (1..=5).map(|i| pod(&format!("p{i}"), 1.0)).collect();
        let mut state = ClusterState::new(vec![
            node("regular", NodeClass::Durable, 16.0, pods.clone()),
            node("spot-a", NodeClass::Preemptible, 2.0, vec![]),
            node("spot-b", NodeClass::Preemptible, 8.0, vec![]),
        ]);

        let report = executor(&state)
            .execute(&mut state, &candidates(&pods), &destinations(&["spot-a", "spot-b"]))
            .await;

        assert_eq!(report.moved, 5);
        let order: Vec<String> = (1..=5)
            .filter_map(|i| destination_of(&report, &format!("p{i}")))
            .collect();
        // spot-a is full after two pods, so the fifth skips to spot-b
        assert_eq!(order, ["spot-a", "spot-b", "spot-a", "spot-b", "spot-b"]);
        assert_eq!(state.node("spot-a").unwrap().pods.len(), 2);
        assert_eq!(state.node("spot-b").unwrap().pods.len(), 3);
        assert!(state.node("regular").unwrap().pods.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_pod_is_skipped() {
        let pods = vec![pod("gone", 1.0), pod("kept", 1.0)];
        let mut state = ClusterState::new(vec![
            node("regular", NodeClass::Durable, 8.0, pods.clone()),
            node("spot-a", NodeClass::Preemptible, 8.0, vec![]),
        ]);
        let executor = executor(&state);
        state.remove_pod(&pods[0]).unwrap();

        let report = executor
            .execute(&mut state, &candidates(&pods), &destinations(&["spot-a"]))
            .await;

        assert_eq!(report.migrations[0].outcome, MigrationOutcome::NotFound);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.moved, 1);
        assert_eq!(destination_of(&report, "kept").as_deref(), Some("spot-a"));
        assert_eq!(state.total_pods(), 1);
    }

    #[tokio::test]
    async fn test_no_room_leaves_pod_in_place() {
        let pods = vec![pod("big", 4.0)];
        let mut state = ClusterState::new(vec![
            node("regular", NodeClass::Durable, 8.0, pods.clone()),
            node("spot-a", NodeClass::Preemptible, 2.0, vec![]),
        ]);

        let report = executor(&state)
            .execute(&mut state, &candidates(&pods), &destinations(&["spot-a"]))
            .await;

        assert_eq!(report.migrations[0].outcome, MigrationOutcome::InsufficientCapacity);
        assert_eq!(state.locate_pod(&pods[0]), Some("regular"));
    }

    #[test]
    fn test_failed_move_keeps_pod_on_source() {
        let big = pod("big", 4.0);
        let mut state = ClusterState::new(vec![
            node("regular", NodeClass::Durable, 8.0, vec![big.clone()]),
            node("spot-a", NodeClass::Preemptible, 2.0, vec![]),
        ]);

        assert!(!move_pod(&mut state, &big, "regular", "spot-a"));
        assert!(!move_pod(&mut state, &big, "regular", "missing"));
        assert_eq!(state.locate_pod(&big), Some("regular"));
        assert!(state.node("spot-a").unwrap().pods.is_empty());
    }
}
