//! Time-series backends for service metrics

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Scalar query against a metrics backend
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// `Ok(None)` when the backend has no value for the expression
    async fn query(&self, expression: &str) -> Result<Option<f64>>;
}

/// Query a source, treating unavailable data as `0.0`
///
/// Missing telemetry must not stop a loop.
pub async fn query_or_zero(source: &dyn MetricsSource, expression: &str) -> f64 {
    match source.query(expression).await {
        Ok(Some(value)) => value,
        Ok(None) => {
            debug!(query = expression, "No data for metrics query, using 0");
            0.0
        }
        Err(e) => {
            warn!(query = expression, error = %e, "Metrics query failed, using 0");
            0.0
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    /// `[unix_time, "value"]`
    value: (f64, String),
}

/// Prometheus HTTP API instant queries
#[derive(Debug, Clone)]
pub struct PrometheusSource {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl PrometheusSource {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join("api/v1/query"))
            .with_context(|| format!("Invalid Prometheus URL: {base_url}"))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query(&self, expression: &str) -> Result<Option<f64>> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .query(&[("query", expression)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response: QueryResponse = request
            .send()
            .await
            .context("Failed to reach Prometheus")?
            .error_for_status()
            .context("Prometheus returned an error status")?
            .json()
            .await
            .context("Failed to parse Prometheus response")?;

        if response.status != "success" {
            return Ok(None);
        }

        let value = response
            .data
            .and_then(|d| d.result.into_iter().next())
            .and_then(|r| r.value.1.parse::<f64>().ok());
        Ok(value)
    }
}

/// Fixed values keyed by expression
#[derive(Debug, Default)]
pub struct StaticMetricsSource {
    values: Mutex<HashMap<String, f64>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, expression: impl Into<String>, value: f64) {
        self.values.lock().await.insert(expression.into(), value);
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn query(&self, expression: &str) -> Result<Option<f64>> {
        Ok(self.values.lock().await.get(expression).copied())
    }
}

/// Load phase of the synthetic workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Low,
    Medium,
    High,
}

impl LoadPhase {
    /// Ten iterations low, ten medium, then high
    pub fn at(iteration: u64) -> Self {
        match iteration {
            0..=9 => LoadPhase::Low,
            10..=19 => LoadPhase::Medium,
            _ => LoadPhase::High,
        }
    }

    /// Random `(cpu%, memory%)` for this phase
    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> (f64, f64) {
        match self {
            LoadPhase::Low => (rng.gen_range(25.0..45.0), rng.gen_range(30.0..50.0)),
            LoadPhase::Medium => (rng.gen_range(50.0..85.0), rng.gen_range(60.0..90.0)),
            LoadPhase::High => (rng.gen_range(70.0..95.0), rng.gen_range(75.0..95.0)),
        }
    }
}

struct SyntheticState {
    rng: StdRng,
    iteration: u64,
    memory: f64,
}

/// Phased synthetic load for simulation mode
///
/// Each CPU query advances one iteration and draws a fresh sample; the
/// memory query returns the value drawn alongside it. Other expressions
/// have no data.
pub struct SyntheticMetricsSource {
    state: Mutex<SyntheticState>,
}

impl SyntheticMetricsSource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state: Mutex::new(SyntheticState {
                rng,
                iteration: 0,
                memory: 0.0,
            }),
        }
    }
}

#[async_trait]
impl MetricsSource for SyntheticMetricsSource {
    async fn query(&self, expression: &str) -> Result<Option<f64>> {
        let mut state = self.state.lock().await;
        let expression = expression.to_ascii_lowercase();

        if expression.contains("cpu") {
            let phase = LoadPhase::at(state.iteration);
            let (cpu, memory) = phase.sample(&mut state.rng);
            state.iteration += 1;
            state.memory = memory;
            Ok(Some(cpu))
        } else if expression.contains("memory") {
            Ok(Some(state.memory))
        } else {
            Ok(None)
        }
    }
}
