//! Scaling decisions and schedule-window bounds
//!
//! Samples are smoothed over a short window before the decision engine
//! looks at them, so single spikes do not trigger replica changes. The
//! schedule controller independently pins HPA bounds to the time of day.

mod autoscaler;
mod decision;
mod metrics_source;
mod schedule;
mod smoother;

pub use autoscaler::{AutoscalerLoop, NodePoolAutoscaler};
pub use decision::{NoOpReason, ScaleDecision, ScaleDecisionEngine, ScaleUpReason, ScalingState};
pub use metrics_source::{
    query_or_zero, LoadPhase, MetricsSource, PrometheusSource, StaticMetricsSource,
    SyntheticMetricsSource,
};
pub use schedule::{
    ScheduleWindow, ScheduleWindowController, ScheduleWindowLoop, ScheduleWindowPolicy,
};
pub use smoother::{derive_response_time, MetricSample, MetricSmoother};
