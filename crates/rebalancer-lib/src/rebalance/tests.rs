//! Scenario tests for rebalance cycles and node-loss handling
//!
//! These run the orchestrator end to end against the in-memory cluster.

#[cfg(test)]
mod cycle_tests {
    use crate::cluster::{
        BackoffPolicy, ClusterState, ClusterStateProvider, EvictionOutcome, Permission,
        SimulatedCluster,
    };
    use crate::config::RebalanceConfig;
    use crate::error::ClusterError;
    use crate::models::{Node, NodeClass, Pod};
    use crate::observability::{EventLogger, RebalancerMetrics};
    use crate::quantity::ResourceAmount;
    use crate::rebalance::{CycleOutcome, CyclePhase, MigrationOutcome, RebalanceOrchestrator};
    use crate::status::StatusBoard;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> RebalanceConfig {
        RebalanceConfig {
            rng_seed: Some(42),
            ..Default::default()
        }
    }

    fn orchestrator(provider: Arc<dyn ClusterStateProvider>) -> RebalanceOrchestrator {
        RebalanceOrchestrator::new(
            provider,
            &config(),
            RebalancerMetrics::new().unwrap(),
            EventLogger::new("test"),
        )
    }

    fn pod(name: &str, cpu: f64, mem_gib: f64, critical: bool) -> Pod {
        Pod::new(
            name,
            "default",
            ResourceAmount::from_gib(cpu, mem_gib),
            critical,
            Utc::now() - Duration::hours(2),
        )
    }

    fn node_with(name: &str, class: NodeClass, cpu: f64, mem: f64, pods: Vec<Pod>) -> Node {
        let mut node = Node::new(name, class, ResourceAmount::from_gib(cpu, mem));
        node.pods = pods;
        node.recompute_usage();
        node
    }

    fn assert_capacity_respected(state: &ClusterState) {
        for node in &state.nodes {
            let used: ResourceAmount = node.pods.iter().map(|p| p.requests).sum();
            assert!(
                used.fits_within(&node.allocatable),
                "node {} over capacity: {} > {}",
                node.name,
                used,
                node.allocatable
            );
        }
    }

    #[tokio::test]
    async fn test_ten_pod_scenario_spreads_onto_spot() {
        let cluster = Arc::new(SimulatedCluster::demo(Utc::now()));
        let before = cluster.snapshot().await;
        let regular_before = before.node("aks-regular-1").unwrap().usage;

        let mut orchestrator = orchestrator(cluster.clone());
        let outcome = orchestrator.run_cycle(Utc::now()).await;

        let CycleOutcome::Completed(report) = outcome else {
            panic!("expected a completed cycle, got {outcome:?}");
        };
        assert_eq!(report.candidates, 10);
        assert_eq!(report.selected.len(), 7);
        assert_eq!(report.migration.moved, 7);

        let after = cluster.snapshot().await;
        assert!(!after.node("aks-spot-1").unwrap().pods.is_empty());
        assert!(!after.node("aks-spot-2").unwrap().pods.is_empty());

        let regular_after = after.node("aks-regular-1").unwrap().usage;
        assert!(regular_after.cpu_cores < regular_before.cpu_cores);
        assert!(regular_after.memory_bytes < regular_before.memory_bytes);

        assert_eq!(after.total_pods(), 10);
        assert_capacity_respected(&after);
        assert_eq!(orchestrator.phase(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_critical_pods_never_move() {
        let cluster = Arc::new(SimulatedCluster::demo(Utc::now()));
        let mut orchestrator = orchestrator(cluster.clone());

        let start = Utc::now();
        for i in 0..3 {
            orchestrator
                .run_cycle(start + Duration::seconds(60 * i))
                .await;
        }

        let state = cluster.snapshot().await;
        for node in &state.nodes {
            if node.is_preemptible() {
                assert!(node.pods.iter().all(|p| !p.critical));
            }
        }
        assert_eq!(
            state
                .node("aks-regular-1")
                .unwrap()
                .pods
                .iter()
                .filter(|p| p.critical)
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_no_spare_capacity_means_no_mutation() {
        let state = ClusterState::new(vec![
            node_with("spot-full", NodeClass::Preemptible, 1.0, 1.0, vec![pod("resident", 1.0, 1.0, false)]),
            node_with("spot-tiny", NodeClass::Preemptible, 0.1, 0.1, vec![]),
            node_with(
                "regular-1",
                NodeClass::Durable,
                8.0,
                32.0,
                vec![pod("a", 0.5, 1.0, false), pod("b", 0.3, 0.5, false)],
            ),
        ]);
        let cluster = Arc::new(SimulatedCluster::new(state.clone()));

        let mut orchestrator = orchestrator(cluster.clone());
        let CycleOutcome::Completed(report) = orchestrator.run_cycle(Utc::now()).await else {
            panic!("cycle should complete");
        };

        assert_eq!(report.migration.moved, 0);
        assert!(report
            .migration
            .migrations
            .iter()
            .all(|m| m.outcome == MigrationOutcome::InsufficientCapacity));
        assert_eq!(cluster.snapshot().await, state);
    }

    #[tokio::test]
    async fn test_no_destinations_is_a_noop() {
        let state = ClusterState::new(vec![node_with(
            "regular-1",
            NodeClass::Durable,
            8.0,
            32.0,
            vec![pod("a", 0.5, 1.0, false)],
        )]);
        let cluster = Arc::new(SimulatedCluster::new(state.clone()));

        let mut orchestrator = orchestrator(cluster.clone());
        let CycleOutcome::Completed(report) = orchestrator.run_cycle(Utc::now()).await else {
            panic!("cycle should complete");
        };

        assert!(report.destinations.is_empty());
        assert!(report.migration.migrations.is_empty());
        assert_eq!(cluster.snapshot().await, state);
    }

    #[tokio::test]
    async fn test_min_interval_guard() {
        let cluster = Arc::new(SimulatedCluster::demo(Utc::now()));
        let mut orchestrator = orchestrator(cluster);
        let now = Utc::now();

        assert!(matches!(
            orchestrator.run_cycle(now).await,
            CycleOutcome::Completed(_)
        ));
        assert!(matches!(
            orchestrator.run_cycle(now + Duration::seconds(10)).await,
            CycleOutcome::Skipped { .. }
        ));
        assert!(matches!(
            orchestrator.run_cycle(now + Duration::seconds(30)).await,
            CycleOutcome::Completed(_)
        ));
    }

    /// Provider whose observation always fails
    struct UnreachableCluster;

    #[async_trait]
    impl ClusterStateProvider for UnreachableCluster {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn observe(&self) -> Result<ClusterState, ClusterError> {
            Err(ClusterError::Backend("connection refused".to_string()))
        }

        async fn evict(&self, _pod: &Pod) -> Result<EvictionOutcome, ClusterError> {
            Err(ClusterError::Backend("connection refused".to_string()))
        }

        async fn commit(&self, _state: &ClusterState) -> Result<(), ClusterError> {
            Ok(())
        }

        async fn has_permissions(&self, _required: &[Permission]) -> Result<bool, ClusterError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_failed_cycle_returns_to_idle_and_is_rate_limited() {
        let status = StatusBoard::new("test", "simulation");
        let mut orchestrator =
            orchestrator(Arc::new(UnreachableCluster)).with_status(status.clone());
        let now = Utc::now();

        let outcome = orchestrator.run_cycle(now).await;
        let CycleOutcome::Failed(message) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(message.contains("observing cluster state"));
        assert_eq!(orchestrator.phase(), CyclePhase::Idle);
        assert_eq!(orchestrator.last_cycle(), Some(now));

        assert!(matches!(
            orchestrator.run_cycle(now + Duration::seconds(1)).await,
            CycleOutcome::Skipped { .. }
        ));
        assert_eq!(status.snapshot().await.cycles_failed, 1);
    }

    /// Simulated cluster that rate limits every eviction
    struct ThrottlingCluster {
        inner: SimulatedCluster,
        evictions: AtomicUsize,
    }

    #[async_trait]
    impl ClusterStateProvider for ThrottlingCluster {
        fn name(&self) -> &'static str {
            "throttling"
        }

        async fn observe(&self) -> Result<ClusterState, ClusterError> {
            self.inner.observe().await
        }

        async fn evict(&self, _pod: &Pod) -> Result<EvictionOutcome, ClusterError> {
            self.evictions.fetch_add(1, Ordering::SeqCst);
            Ok(EvictionOutcome::RateLimited)
        }

        async fn commit(&self, state: &ClusterState) -> Result<(), ClusterError> {
            self.inner.commit(state).await
        }

        async fn has_permissions(&self, _required: &[Permission]) -> Result<bool, ClusterError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_rate_limited_pods_are_skipped_individually() {
        let cluster = Arc::new(ThrottlingCluster {
            inner: SimulatedCluster::demo(Utc::now()),
            evictions: AtomicUsize::new(0),
        });
        let before = cluster.inner.snapshot().await;

        let mut orchestrator = orchestrator(cluster.clone()).with_backoff(BackoffPolicy {
            max_retries: 2,
            base: std::time::Duration::from_millis(1),
            max_jitter: std::time::Duration::ZERO,
        });
        let CycleOutcome::Completed(report) = orchestrator.run_cycle(Utc::now()).await else {
            panic!("cycle should complete");
        };

        assert_eq!(report.migration.moved, 0);
        assert_eq!(report.migration.skipped, 7);
        assert_eq!(cluster.evictions.load(Ordering::SeqCst), 7 * 3);
        assert_eq!(cluster.inner.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_status_board_receives_cycle() {
        let status = StatusBoard::new("test", "simulation");
        let mut orchestrator = orchestrator(Arc::new(SimulatedCluster::demo(Utc::now())))
            .with_status(status.clone());

        orchestrator.run_cycle(Utc::now()).await;

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.cycles_completed, 1);
        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(snapshot.last_cycle.unwrap().migration.moved, 7);
    }
}

#[cfg(test)]
mod interruption_tests {
    use crate::cluster::{ClusterState, ClusterStateProvider, SimulatedCluster};
    use crate::config::RebalanceConfig;
    use crate::models::{Node, NodeClass, Pod};
    use crate::observability::{EventLogger, RebalancerMetrics};
    use crate::quantity::ResourceAmount;
    use crate::rebalance::{PreemptionFallbackHandler, RebalanceOrchestrator};
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn pod(name: &str, cpu: f64, mem_gib: f64) -> Pod {
        Pod::new(
            name,
            "default",
            ResourceAmount::from_gib(cpu, mem_gib),
            false,
            Utc::now(),
        )
    }

    fn node(name: &str, class: NodeClass, cpu: f64, mem: f64, pods: Vec<Pod>) -> Node {
        let mut node = Node::new(name, class, ResourceAmount::from_gib(cpu, mem));
        node.pods = pods;
        node.recompute_usage();
        node
    }

    fn three_node_state() -> ClusterState {
        ClusterState::new(vec![
            node(
                "spot-a",
                NodeClass::Preemptible,
                2.0,
                8.0,
                vec![pod("p1", 0.5, 1.0), pod("p2", 0.5, 1.0)],
            ),
            node("spot-b", NodeClass::Preemptible, 4.0, 16.0, vec![]),
            node("regular-c", NodeClass::Durable, 8.0, 32.0, vec![]),
        ])
    }

    fn occurrences(state: &ClusterState, name: &str) -> Vec<String> {
        state
            .nodes
            .iter()
            .filter(|n| n.pods.iter().any(|p| p.name == name))
            .map(|n| n.name.clone())
            .collect()
    }

    #[test]
    fn test_node_loss_redistributes_without_loss_or_duplication() {
        let mut state = three_node_state();
        let mut rng = StdRng::seed_from_u64(1);

        let report = PreemptionFallbackHandler::default()
            .handle_node_loss(&mut state, "spot-a", &mut rng)
            .unwrap();

        assert!(state.node("spot-a").is_none());
        assert_eq!(report.orphaned, 2);
        assert_eq!(state.total_pods(), 2);
        for name in ["p1", "p2"] {
            let holders = occurrences(&state, name);
            assert_eq!(holders.len(), 1, "{name} held by {holders:?}");
            assert!(holders[0] == "spot-b" || holders[0] == "regular-c");
        }
        assert_eq!(report.placed_on_spot(), 2);
    }

    #[test]
    fn test_falls_back_to_durable_then_reports_unplaceable() {
        let mut state = ClusterState::new(vec![
            node(
                "spot-a",
                NodeClass::Preemptible,
                4.0,
                8.0,
                vec![pod("big", 3.0, 4.0), pod("huge", 3.0, 4.0)],
            ),
            node("spot-b", NodeClass::Preemptible, 1.0, 2.0, vec![]),
            node("regular-c", NodeClass::Durable, 4.0, 8.0, vec![]),
        ]);
        let mut rng = StdRng::seed_from_u64(1);

        let report = PreemptionFallbackHandler::new(Some("regular-c".to_string()))
            .handle_node_loss(&mut state, "spot-a", &mut rng)
            .unwrap();

        assert_eq!(report.placed_on_fallback(), 1);
        assert_eq!(report.unplaceable(), vec!["default/huge"]);
        assert_eq!(state.node("regular-c").unwrap().pods.len(), 1);
        assert!(state.node("spot-b").unwrap().pods.is_empty());
    }

    #[test]
    fn test_durable_or_unknown_node_is_a_noop() {
        let mut state = three_node_state();
        let original = state.clone();
        let mut rng = StdRng::seed_from_u64(1);
        let handler = PreemptionFallbackHandler::default();

        assert!(handler
            .handle_node_loss(&mut state, "regular-c", &mut rng)
            .is_none());
        assert!(handler
            .handle_node_loss(&mut state, "missing", &mut rng)
            .is_none());
        assert_eq!(state, original);
    }

    #[test]
    fn test_seeded_placement_is_deterministic() {
        let run = || {
            let mut state = ClusterState::new(vec![
                node(
                    "spot-a",
                    NodeClass::Preemptible,
                    4.0,
                    16.0,
                    (0..6).map(|i| pod(&format!("p{i}"), 0.2, 0.5)).collect(),
                ),
                node("spot-b", NodeClass::Preemptible, 4.0, 16.0, vec![]),
                node("spot-c", NodeClass::Preemptible, 4.0, 16.0, vec![]),
            ]);
            let mut rng = StdRng::seed_from_u64(99);
            PreemptionFallbackHandler::default()
                .handle_node_loss(&mut state, "spot-a", &mut rng)
                .unwrap()
        };

        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn test_orchestrator_interruption_commits_state() {
        let cluster = Arc::new(SimulatedCluster::new(three_node_state()));
        let config = RebalanceConfig {
            rng_seed: Some(3),
            ..Default::default()
        };
        let metrics = RebalancerMetrics::new().unwrap();
        let mut orchestrator =
            RebalanceOrchestrator::new(cluster.clone(), &config, metrics, EventLogger::new("test"));

        let report = orchestrator
            .handle_interruption("spot-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.placements.len(), 2);

        let state = cluster.observe().await.unwrap();
        assert!(state.node("spot-a").is_none());
        assert_eq!(state.total_pods(), 2);

        assert!(orchestrator
            .handle_interruption("regular-c")
            .await
            .unwrap()
            .is_none());
    }
}
