//! Core library for the spot rebalancer
//!
//! This crate provides the core functionality for:
//! - Cluster state observation (simulated and live Kubernetes)
//! - Node scoring, pod prioritization and bounded-rate migration to spot capacity
//! - Spot interruption fallback handling
//! - Metric smoothing and cooldown-gated scale decisions
//! - Schedule-window HPA bounds with rollback
//! - Health checks, metrics and structured event logging

pub mod cluster;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod quantity;
pub mod rebalance;
pub mod scaling;
pub mod status;

pub use config::RebalancerConfig;
pub use error::{ClusterError, PolicyError, QuantityError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EventLogger, RebalancerMetrics};
pub use quantity::ResourceAmount;
pub use status::{StatusBoard, StatusSnapshot};
