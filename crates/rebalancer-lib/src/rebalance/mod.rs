//! Migration of workload from durable onto spot capacity
//!
//! A cycle observes the cluster, keeps the non-critical pods found on
//! durable nodes, ranks spot nodes as destinations and moves a bounded
//! batch of pods round-robin across them. Spot node loss is handled by
//! re-placing the orphaned pods on the remaining capacity.

mod executor;
mod fallback;
mod filter;
mod r#loop;
mod orchestrator;
mod scoring;

#[cfg(test)]
mod tests;

pub use executor::{MigrationExecutor, MigrationOutcome, MigrationReport, PodMigration};
pub use fallback::{FallbackReport, Placement, PreemptionFallbackHandler};
pub use filter::PodFilter;
pub use r#loop::{RebalanceLoop, RebalanceLoopBuilder};
pub use orchestrator::{CycleOutcome, CyclePhase, CycleReport, RebalanceOrchestrator};
pub use scoring::{pod_priority, NodeScorer};
