//! Time-of-day replica bounds with a high-load rollback
//!
//! Windows are half-open `[start, end)` intervals of wall-clock time (UTC).
//! A window whose start is after its end wraps across midnight. Together
//! the windows must cover every minute of the day exactly once.

use super::metrics_source::{query_or_zero, MetricsSource};
use crate::cluster::BoundsPatcher;
use crate::config::ScheduleConfig;
use crate::error::PolicyError;
use crate::health::{components, HealthRegistry};
use crate::observability::{EventLogger, RebalancerMetrics};
use crate::status::{StatusBoard, WindowStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A named interval with replica bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub min_replicas: u32,
    pub max_replicas: u32,
}

fn parse_time(raw: &str) -> Result<NaiveTime, PolicyError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| PolicyError::InvalidTime(raw.to_string()))
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

fn time_of_minute(minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap_or_default()
}

impl ScheduleWindow {
    /// Build a window from `HH:MM` strings
    pub fn parse(
        name: &str,
        start: &str,
        end: &str,
        min_replicas: u32,
        max_replicas: u32,
    ) -> Result<Self, PolicyError> {
        if min_replicas > max_replicas {
            return Err(PolicyError::InvalidBounds {
                name: name.to_string(),
                min: min_replicas,
                max: max_replicas,
            });
        }

        Ok(Self {
            name: name.to_string(),
            start: parse_time(start)?,
            end: parse_time(end)?,
            min_replicas,
            max_replicas,
        })
    }

    /// Whether `t` falls inside the window; equal start and end covers the whole day
    pub fn contains(&self, t: NaiveTime) -> bool {
        let (start, end) = (self.start, self.end);
        if start < end {
            start <= t && t < end
        } else if start > end {
            t >= start || t < end
        } else {
            true
        }
    }

    fn contains_minute(&self, minute: u32) -> bool {
        let (start, end) = (minute_of_day(self.start), minute_of_day(self.end));
        if start < end {
            start <= minute && minute < end
        } else if start > end {
            minute >= start || minute < end
        } else {
            true
        }
    }
}

/// Validated set of windows partitioning the day
#[derive(Debug, Clone)]
pub struct ScheduleWindowPolicy {
    windows: Vec<ScheduleWindow>,
}

impl ScheduleWindowPolicy {
    /// Reject gaps and overlaps at minute resolution
    pub fn new(windows: Vec<ScheduleWindow>) -> Result<Self, PolicyError> {
        if windows.is_empty() {
            return Err(PolicyError::NoWindows);
        }

        for minute in 0..MINUTES_PER_DAY {
            let mut covering = windows.iter().filter(|w| w.contains_minute(minute));
            match (covering.next(), covering.next()) {
                (None, _) => return Err(PolicyError::WindowGap(time_of_minute(minute))),
                (Some(first), Some(second)) => {
                    return Err(PolicyError::WindowOverlap {
                        first: first.name.clone(),
                        second: second.name.clone(),
                        at: time_of_minute(minute),
                    })
                }
                (Some(_), None) => {}
            }
        }

        Ok(Self { windows })
    }

    pub fn windows(&self) -> &[ScheduleWindow] {
        &self.windows
    }

    /// The unique window containing `now`
    pub fn active_window(&self, now: NaiveTime) -> Result<&ScheduleWindow, PolicyError> {
        self.windows
            .iter()
            .find(|w| w.contains(now))
            .ok_or(PolicyError::NoActiveWindow(now))
    }

    /// Largest `max_replicas` of any window
    pub fn global_max_replicas(&self) -> u32 {
        self.windows
            .iter()
            .map(|w| w.max_replicas)
            .max()
            .unwrap_or_default()
    }
}

/// Applies window bounds to an HPA and overrides them under high load
pub struct ScheduleWindowController {
    policy: ScheduleWindowPolicy,
    patcher: Arc<dyn BoundsPatcher>,
    namespace: String,
    hpa_name: String,
    rollback_enabled: bool,
    rollback_threshold_cpu: f64,
    rollback_check_interval: chrono::Duration,
    applied: Option<String>,
    last_rollback_check: Option<DateTime<Utc>>,
    rollback_active: bool,
    metrics: RebalancerMetrics,
    events: EventLogger,
    status: Option<StatusBoard>,
}

impl ScheduleWindowController {
    pub fn new(
        policy: ScheduleWindowPolicy,
        patcher: Arc<dyn BoundsPatcher>,
        config: &ScheduleConfig,
        metrics: RebalancerMetrics,
        events: EventLogger,
    ) -> Self {
        Self {
            policy,
            patcher,
            namespace: config.namespace.clone(),
            hpa_name: config.hpa_name.clone(),
            rollback_enabled: config.rollback_enabled,
            rollback_threshold_cpu: config.rollback_threshold_cpu,
            rollback_check_interval: chrono::Duration::from_std(config.rollback_check_interval())
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            applied: None,
            last_rollback_check: None,
            rollback_active: false,
            metrics,
            events,
            status: None,
        }
    }

    pub fn with_status(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    pub fn policy(&self) -> &ScheduleWindowPolicy {
        &self.policy
    }

    /// Name of the last successfully applied window
    pub fn applied_window(&self) -> Option<&str> {
        self.applied.as_deref()
    }

    pub fn rollback_active(&self) -> bool {
        self.rollback_active
    }

    async fn publish(&self, window: &ScheduleWindow, max_replicas: u32, now: DateTime<Utc>) {
        if let Some(status) = &self.status {
            status
                .set_window(WindowStatus {
                    name: window.name.clone(),
                    min_replicas: window.min_replicas,
                    max_replicas,
                    rollback_active: self.rollback_active,
                    updated_at: now,
                })
                .await;
        }
    }

    /// Patch the HPA if the active window differs from the applied one
    ///
    /// Returns the newly applied window. A failed patch leaves the applied
    /// window unchanged so the next poll retries.
    pub async fn apply_current(&mut self, now: DateTime<Utc>) -> Result<Option<ScheduleWindow>> {
        let window = self.policy.active_window(now.time())?.clone();
        if self.applied.as_deref() == Some(window.name.as_str()) {
            return Ok(None);
        }

        self.patcher
            .patch_bounds(
                &self.namespace,
                &self.hpa_name,
                Some(window.min_replicas),
                window.max_replicas,
            )
            .await
            .with_context(|| format!("applying schedule window '{}'", window.name))?;

        self.applied = Some(window.name.clone());
        self.rollback_active = false;
        self.metrics.inc_window_changes();
        self.events
            .log_window_applied(&window.name, window.min_replicas, window.max_replicas);
        self.publish(&window, window.max_replicas, now).await;

        Ok(Some(window))
    }

    /// Force the global max bound while mean CPU is above the threshold
    ///
    /// Checks at most once per rollback interval. Returns true while the
    /// override is in force after this check. Once load is back at or below
    /// the threshold the current window's bounds are restored.
    pub async fn check_rollback(&mut self, mean_cpu: f64, now: DateTime<Utc>) -> Result<bool> {
        if !self.rollback_enabled {
            return Ok(false);
        }
        if let Some(last) = self.last_rollback_check {
            if now - last < self.rollback_check_interval {
                return Ok(self.rollback_active);
            }
        }
        self.last_rollback_check = Some(now);

        let window = self.policy.active_window(now.time())?.clone();

        if mean_cpu > self.rollback_threshold_cpu {
            if !self.rollback_active {
                let global_max = self.policy.global_max_replicas();
                warn!(
                    mean_cpu,
                    threshold = self.rollback_threshold_cpu,
                    max_replicas = global_max,
                    "CPU above rollback threshold, restoring maximum bound"
                );
                self.patcher
                    .patch_bounds(&self.namespace, &self.hpa_name, None, global_max)
                    .await
                    .context("applying rollback bound")?;

                self.rollback_active = true;
                self.metrics.inc_rollbacks();
                self.events.log_rollback(mean_cpu, global_max, true);
                self.publish(&window, global_max, now).await;
            }
            return Ok(true);
        }

        if self.rollback_active {
            self.patcher
                .patch_bounds(
                    &self.namespace,
                    &self.hpa_name,
                    Some(window.min_replicas),
                    window.max_replicas,
                )
                .await
                .context("releasing rollback bound")?;

            self.rollback_active = false;
            self.applied = Some(window.name.clone());
            self.events.log_rollback(mean_cpu, window.max_replicas, false);
            self.publish(&window, window.max_replicas, now).await;
        }

        Ok(false)
    }
}

/// Periodic schedule-window loop
pub struct ScheduleWindowLoop {
    controller: ScheduleWindowController,
    source: Arc<dyn MetricsSource>,
    cpu_query: String,
    interval: Duration,
    health: Option<HealthRegistry>,
}

impl ScheduleWindowLoop {
    pub fn new(
        controller: ScheduleWindowController,
        source: Arc<dyn MetricsSource>,
        cpu_query: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            controller,
            source,
            cpu_query: cpu_query.into(),
            interval,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.controller.apply_current(now).await?;
        let mean_cpu = query_or_zero(self.source.as_ref(), &self.cpu_query).await;
        self.controller.check_rollback(mean_cpu, now).await?;
        Ok(())
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            windows = self.controller.policy().windows().len(),
            "Starting schedule window loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.tick(Utc::now()).await;
                    if let Err(e) = &result {
                        error!(error = %format!("{e:#}"), "Schedule window tick failed");
                    }
                    if let Some(health) = &self.health {
                        match result {
                            Ok(()) => health.record_success(components::SCHEDULE_WINDOW).await,
                            Err(e) => health.record_failure(components::SCHEDULE_WINDOW, e.to_string()).await,
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down schedule window loop");
                    break;
                }
            }
        }
    }
}
