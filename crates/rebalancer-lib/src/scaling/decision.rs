//! Cooldown-gated scale decisions

use super::smoother::MetricSmoother;
use crate::config::ScalingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a scale-up was chosen, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleUpReason {
    /// Mean response time above the hard ceiling
    ResponseTimeCritical,
    /// Mean response time above the soft target
    ResponseTimeHigh,
    /// Mean CPU or memory above its threshold
    ResourcePressure,
}

/// Why nothing was done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    Cooldown,
    NoSamples,
    WithinThresholds,
    /// Scale-up wanted but replicas already at the maximum
    AtMaxReplicas,
    /// Load low enough to scale down but the window is not stable
    Unstable,
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum ScaleDecision {
    ScaleUp { from: u32, to: u32, reason: ScaleUpReason },
    ScaleDown { from: u32, to: u32 },
    NoOp { reason: NoOpReason },
}

impl ScaleDecision {
    fn noop(reason: NoOpReason) -> Self {
        ScaleDecision::NoOp { reason }
    }

    /// Label used for metrics and events
    pub fn direction(&self) -> &'static str {
        match self {
            ScaleDecision::ScaleUp { .. } => "up",
            ScaleDecision::ScaleDown { .. } => "down",
            ScaleDecision::NoOp { .. } => "none",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, ScaleDecision::NoOp { .. })
    }

    /// Replica count after the decision, if it changes anything
    pub fn target(&self) -> Option<u32> {
        match self {
            ScaleDecision::ScaleUp { to, .. } | ScaleDecision::ScaleDown { to, .. } => Some(*to),
            ScaleDecision::NoOp { .. } => None,
        }
    }
}

impl fmt::Display for ScaleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDecision::ScaleUp { from, to, reason } => {
                write!(f, "scale up {from} -> {to} ({reason:?})")
            }
            ScaleDecision::ScaleDown { from, to } => write!(f, "scale down {from} -> {to}"),
            ScaleDecision::NoOp { reason } => write!(f, "no-op ({reason:?})"),
        }
    }
}

/// Replica count and the time of the last scaling action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingState {
    pub replicas: u32,
    pub last_scale: Option<DateTime<Utc>>,
}

/// Turns smoothed samples into scale decisions
///
/// Response time takes precedence over raw utilization. Any scale action
/// starts a cooldown during which every evaluation is a no-op.
#[derive(Debug, Clone)]
pub struct ScaleDecisionEngine {
    cpu_threshold: f64,
    memory_threshold: f64,
    response_time_threshold: f64,
    max_response_time: f64,
    scale_down_factor: f64,
    min_change_period: chrono::Duration,
    min_replicas: u32,
    max_replicas: u32,
    state: ScalingState,
}

impl ScaleDecisionEngine {
    pub fn new(config: &ScalingConfig, replicas: u32) -> Self {
        let min_replicas = config.min_replicas;
        let max_replicas = config.max_replicas.max(min_replicas);

        Self {
            cpu_threshold: config.cpu_threshold,
            memory_threshold: config.memory_threshold,
            response_time_threshold: config.response_time_threshold,
            max_response_time: config.max_response_time,
            scale_down_factor: config.scale_down_factor,
            min_change_period: chrono::Duration::from_std(config.min_change_period())
                .unwrap_or_else(|_| chrono::Duration::seconds(120)),
            min_replicas,
            max_replicas,
            state: ScalingState {
                replicas: replicas.clamp(min_replicas, max_replicas),
                last_scale: None,
            },
        }
    }

    pub fn state(&self) -> ScalingState {
        self.state
    }

    pub fn replicas(&self) -> u32 {
        self.state.replicas
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min_replicas, self.max_replicas)
    }

    /// Replace the replica bounds, clamping the current count into them
    pub fn set_bounds(&mut self, min_replicas: u32, max_replicas: u32) {
        self.min_replicas = min_replicas;
        self.max_replicas = max_replicas.max(min_replicas);
        self.state.replicas = self
            .state
            .replicas
            .clamp(self.min_replicas, self.max_replicas);
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.state
            .last_scale
            .is_some_and(|last| now - last < self.min_change_period)
    }

    /// Scale-up path: cooldown, then response time, then utilization
    ///
    /// Never scales down; anything that is not a scale-up is a no-op.
    pub fn evaluate(&mut self, smoother: &MetricSmoother, now: DateTime<Utc>) -> ScaleDecision {
        if self.in_cooldown(now) {
            return ScaleDecision::noop(NoOpReason::Cooldown);
        }
        if smoother.is_empty() {
            return ScaleDecision::noop(NoOpReason::NoSamples);
        }

        let response_time = smoother.mean_response_time();
        let reason = if response_time > self.max_response_time {
            Some(ScaleUpReason::ResponseTimeCritical)
        } else if response_time > self.response_time_threshold {
            Some(ScaleUpReason::ResponseTimeHigh)
        } else if smoother.mean_cpu() > self.cpu_threshold
            || smoother.mean_memory() > self.memory_threshold
        {
            Some(ScaleUpReason::ResourcePressure)
        } else {
            None
        };

        let Some(reason) = reason else {
            return ScaleDecision::noop(NoOpReason::WithinThresholds);
        };

        if self.state.replicas >= self.max_replicas {
            return ScaleDecision::noop(NoOpReason::AtMaxReplicas);
        }

        let from = self.state.replicas;
        self.state.replicas = from + 1;
        self.state.last_scale = Some(now);
        ScaleDecision::ScaleUp {
            from,
            to: self.state.replicas,
            reason,
        }
    }

    /// Full decision: [`evaluate`](Self::evaluate), then scale-down
    ///
    /// Scale-down requires a stable window with mean CPU and memory both
    /// below `scale_down_factor` times their thresholds, and replicas above
    /// the minimum.
    pub fn decide(&mut self, smoother: &MetricSmoother, now: DateTime<Utc>) -> ScaleDecision {
        let decision = self.evaluate(smoother, now);
        if decision != ScaleDecision::noop(NoOpReason::WithinThresholds) {
            return decision;
        }

        let comfortably_low = smoother.mean_cpu() < self.cpu_threshold * self.scale_down_factor
            && smoother.mean_memory() < self.memory_threshold * self.scale_down_factor;
        if !comfortably_low || self.state.replicas <= self.min_replicas {
            return decision;
        }
        if !smoother.is_stable() {
            return ScaleDecision::noop(NoOpReason::Unstable);
        }

        let from = self.state.replicas;
        self.state.replicas = from - 1;
        self.state.last_scale = Some(now);
        ScaleDecision::ScaleDown {
            from,
            to: self.state.replicas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn engine(replicas: u32) -> ScaleDecisionEngine {
        ScaleDecisionEngine::new(&ScalingConfig::default(), replicas)
    }

    fn smoother_with(now: DateTime<Utc>, samples: &[(f64, f64, Option<f64>)]) -> MetricSmoother {
        let mut smoother = MetricSmoother::new(std::time::Duration::from_secs(60));
        for &(cpu, mem, rt) in samples {
            smoother.ingest(now, cpu, mem, 2, rt);
        }
        smoother
    }

    #[test]
    fn test_critical_response_time_scales_up() {
        let now = Utc::now();
        let smoother = smoother_with(now, &[(20.0, 20.0, Some(2.5))]);
        let mut engine = engine(2);

        let decision = engine.decide(&smoother, now);
        assert_eq!(
            decision,
            ScaleDecision::ScaleUp {
                from: 2,
                to: 3,
                reason: ScaleUpReason::ResponseTimeCritical
            }
        );
        assert_eq!(engine.state().last_scale, Some(now));
    }

    #[test]
    fn test_soft_response_time_and_resource_pressure() {
        let now = Utc::now();

        let slow = smoother_with(now, &[(20.0, 20.0, Some(1.5))]);
        assert!(matches!(
            engine(2).decide(&slow, now),
            ScaleDecision::ScaleUp {
                reason: ScaleUpReason::ResponseTimeHigh,
                ..
            }
        ));

        let busy = smoother_with(now, &[(20.0, 85.0, Some(0.3))]);
        assert!(matches!(
            engine(2).decide(&busy, now),
            ScaleDecision::ScaleUp {
                reason: ScaleUpReason::ResourcePressure,
                ..
            }
        ));
    }

    #[test]
    fn test_cooldown_blocks_second_decision() {
        let start = Utc::now();
        let mut engine = engine(2);
        let smoother = smoother_with(start, &[(95.0, 50.0, Some(0.3))]);

        assert!(!engine.decide(&smoother, start - Duration::seconds(10)).is_noop());
        assert_eq!(
            engine.decide(&smoother, start),
            ScaleDecision::NoOp {
                reason: NoOpReason::Cooldown
            }
        );
        assert_eq!(engine.replicas(), 3);

        let later = start + Duration::seconds(111);
        assert!(!engine.decide(&smoother, later).is_noop());
    }

    #[test]
    fn test_at_max_does_not_reset_cooldown() {
        let now = Utc::now();
        let smoother = smoother_with(now, &[(95.0, 95.0, Some(3.0))]);
        let mut engine = engine(10);

        assert_eq!(
            engine.decide(&smoother, now),
            ScaleDecision::NoOp {
                reason: NoOpReason::AtMaxReplicas
            }
        );
        assert!(engine.state().last_scale.is_none());
    }

    #[test]
    fn test_scale_down_requires_stable_low_load() {
        let now = Utc::now();
        let mut engine = engine(4);

        let jumpy = smoother_with(
            now,
            &[(5.0, 10.0, Some(0.2)), (45.0, 10.0, Some(0.2)), (10.0, 10.0, Some(0.2))],
        );
        assert_eq!(
            engine.decide(&jumpy, now),
            ScaleDecision::NoOp {
                reason: NoOpReason::Unstable
            }
        );

        let calm = smoother_with(
            now,
            &[(20.0, 30.0, Some(0.2)), (22.0, 31.0, Some(0.2)), (21.0, 29.0, Some(0.2))],
        );
        assert_eq!(
            engine.decide(&calm, now),
            ScaleDecision::ScaleDown { from: 4, to: 3 }
        );
        assert!(engine.in_cooldown(now + Duration::seconds(60)));
    }

    #[test]
    fn test_no_scale_down_at_minimum() {
        let now = Utc::now();
        let calm = smoother_with(now, &[(10.0, 10.0, None); 3]);
        let mut engine = engine(1);

        assert_eq!(
            engine.decide(&calm, now),
            ScaleDecision::NoOp {
                reason: NoOpReason::WithinThresholds
            }
        );
    }

    #[test]
    fn test_empty_window_is_noop() {
        let now = Utc::now();
        let empty = MetricSmoother::new(std::time::Duration::from_secs(60));
        assert_eq!(
            engine(2).decide(&empty, now),
            ScaleDecision::NoOp {
                reason: NoOpReason::NoSamples
            }
        );
    }

    #[test]
    fn test_set_bounds_clamps_replicas() {
        let mut engine = engine(8);
        engine.set_bounds(1, 3);
        assert_eq!(engine.replicas(), 3);
        assert_eq!(engine.bounds(), (1, 3));

        engine.set_bounds(5, 6);
        assert_eq!(engine.replicas(), 5);
    }
}
