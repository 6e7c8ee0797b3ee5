//! Candidate selection

use super::scoring::pod_priority;
use crate::models::{MigrationCandidateScore, Pod};
use chrono::{DateTime, Utc};

/// Drops critical pods, ranks the rest by priority and caps the batch
#[derive(Debug, Clone, Copy)]
pub struct PodFilter {
    max_per_cycle: usize,
}

impl Default for PodFilter {
    fn default() -> Self {
        Self::new(10)
    }
}

impl PodFilter {
    pub fn new(max_per_cycle: usize) -> Self {
        Self { max_per_cycle }
    }

    pub fn max_per_cycle(&self) -> usize {
        self.max_per_cycle
    }

    /// Eligible pods in descending priority, at most `max_per_cycle`
    pub fn filter(&self, pods: Vec<Pod>, now: DateTime<Utc>) -> Vec<MigrationCandidateScore> {
        let mut ranked: Vec<MigrationCandidateScore> = pods
            .into_iter()
            .filter(|p| !p.critical)
            .map(|pod| MigrationCandidateScore {
                priority: pod_priority(&pod, now),
                pod,
            })
            .collect();

        ranked.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        ranked.truncate(self.max_per_cycle);
        ranked
    }
}
