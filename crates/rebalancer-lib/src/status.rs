//! Latest state of each loop, served by the status API

use crate::models::NodeSummary;
use crate::rebalance::{CycleReport, FallbackReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Last scale decision and the smoothed inputs behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingStatus {
    pub replicas: u32,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub last_decision: String,
    pub reason: String,
    pub mean_cpu: f64,
    pub mean_memory: f64,
    pub mean_response_time: f64,
    pub stable: bool,
    pub updated_at: DateTime<Utc>,
}

/// Currently applied schedule window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStatus {
    pub name: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub rollback_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Serializable view of everything the daemon knows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub cluster: String,
    pub mode: String,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub nodes: Vec<NodeSummary>,
    pub last_cycle: Option<CycleReport>,
    pub last_error: Option<String>,
    pub last_interruption: Option<FallbackReport>,
    pub scaling: Option<ScalingStatus>,
    pub window: Option<WindowStatus>,
}

/// Shared, read-mostly status written by the loops
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusBoard {
    pub fn new(cluster: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusSnapshot {
                cluster: cluster.into(),
                mode: mode.into(),
                ..Default::default()
            })),
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn record_cycle(&self, report: CycleReport) {
        let mut status = self.inner.write().await;
        status.cycles_completed += 1;
        status.nodes = report.after.clone();
        status.last_error = None;
        status.last_cycle = Some(report);
    }

    pub async fn record_cycle_failure(&self, error: impl Into<String>) {
        let mut status = self.inner.write().await;
        status.cycles_failed += 1;
        status.last_error = Some(error.into());
    }

    pub async fn record_interruption(&self, report: FallbackReport, nodes: Vec<NodeSummary>) {
        let mut status = self.inner.write().await;
        status.nodes = nodes;
        status.last_interruption = Some(report);
    }

    pub async fn set_scaling(&self, scaling: ScalingStatus) {
        self.inner.write().await.scaling = Some(scaling);
    }

    pub async fn set_window(&self, window: WindowStatus) {
        self.inner.write().await.window = Some(window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_then_success_clears_error() {
        let board = StatusBoard::new("test", "simulation");

        board.record_cycle_failure("cluster unreachable").await;
        let snapshot = board.snapshot().await;
        assert_eq!(snapshot.cycles_failed, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some("cluster unreachable"));

        board.record_cycle(CycleReport::default()).await;
        let snapshot = board.snapshot().await;
        assert_eq!(snapshot.cycles_completed, 1);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.last_cycle.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let board = StatusBoard::new("test", "simulation");
        board
            .set_window(WindowStatus {
                name: "night".to_string(),
                min_replicas: 1,
                max_replicas: 3,
                rollback_active: false,
                updated_at: Utc::now(),
            })
            .await;

        let json = serde_json::to_value(board.snapshot().await).unwrap();
        assert_eq!(json["window"]["name"], "night");
        assert_eq!(json["mode"], "simulation");
    }
}
