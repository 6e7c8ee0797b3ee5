//! Sliding window of utilization and latency samples

use crate::observability::RebalancerMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Samples needed before the window can be called stable
const MIN_STABLE_SAMPLES: usize = 3;

/// Max deviation from the window mean, in percentage points
const STABILITY_TOLERANCE: f64 = 15.0;

/// One observation of the service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub memory: f64,
    pub pod_count: u32,
    pub response_time: f64,
}

/// Response time modelled from load when none was measured
///
/// CPU contributes quadratically (saturation cascades), memory linearly,
/// and more pods spread the load.
pub fn derive_response_time(cpu: f64, memory: f64, pod_count: u32) -> f64 {
    let cpu_factor = (cpu / 100.0).powi(2);
    let mem_factor = memory / 100.0;
    let scaling_factor = 1.0 / f64::from(pod_count).powf(0.7).max(1.0);
    0.2 + cpu_factor * mem_factor * scaling_factor * 3.0
}

/// Time-bounded window of samples
///
/// Only samples with `timestamp > now - window` are kept; the window is
/// pruned on every ingestion.
#[derive(Debug, Clone)]
pub struct MetricSmoother {
    window: chrono::Duration,
    samples: VecDeque<MetricSample>,
    metrics: Option<RebalancerMetrics>,
}

impl MetricSmoother {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            samples: VecDeque::new(),
            metrics: None,
        }
    }

    /// Publish every ingested sample to the `service_*` gauges
    pub fn with_metrics(mut self, metrics: RebalancerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Record a sample taken at `now`, deriving the response time if absent
    pub fn ingest(
        &mut self,
        now: DateTime<Utc>,
        cpu: f64,
        memory: f64,
        pod_count: u32,
        response_time: Option<f64>,
    ) -> MetricSample {
        let sample = MetricSample {
            timestamp: now,
            cpu,
            memory,
            pod_count,
            response_time: response_time
                .unwrap_or_else(|| derive_response_time(cpu, memory, pod_count)),
        };

        self.samples.push_back(sample);
        self.prune(now);

        if let Some(metrics) = &self.metrics {
            metrics.set_service_sample(cpu, memory, pod_count, sample.response_time);
        }
        sample
    }

    /// Drop samples at or before `now - window`
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.samples.retain(|s| s.timestamp > cutoff);
    }

    fn mean(&self, field: impl Fn(&MetricSample) -> f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(field).sum::<f64>() / self.samples.len() as f64
    }

    pub fn mean_cpu(&self) -> f64 {
        self.mean(|s| s.cpu)
    }

    pub fn mean_memory(&self) -> f64 {
        self.mean(|s| s.memory)
    }

    pub fn mean_response_time(&self) -> f64 {
        self.mean(|s| s.response_time)
    }

    /// At least three samples, none further than 15 points from the mean
    pub fn is_stable(&self) -> bool {
        if self.samples.len() < MIN_STABLE_SAMPLES {
            return false;
        }
        let cpu = self.mean_cpu();
        let memory = self.mean_memory();
        self.samples.iter().all(|s| {
            (s.cpu - cpu).abs() <= STABILITY_TOLERANCE
                && (s.memory - memory).abs() <= STABILITY_TOLERANCE
        })
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
