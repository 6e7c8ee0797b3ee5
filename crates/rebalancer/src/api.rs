//! HTTP API for health checks, Prometheus metrics and daemon status

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rebalancer_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::RebalancerMetrics,
    status::StatusBoard,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: RebalancerMetrics,
    pub status: StatusBoard,
    /// Feeds spot interruption notices to the rebalance loop
    pub interruptions: Option<mpsc::Sender<String>>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: RebalancerMetrics, status: StatusBoard) -> Self {
        Self {
            health_registry,
            metrics,
            status,
            interruptions: None,
        }
    }

    pub fn with_interruptions(mut self, tx: mpsc::Sender<String>) -> Self {
        self.interruptions = Some(tx);
        self
    }
}

/// 200 while operational (healthy or degraded), 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus text exposition of the daemon's own registry
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                e.to_string().into_bytes(),
            )
        }
    }
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status.snapshot().await)
}

#[derive(Debug, Deserialize)]
struct InterruptionRequest {
    node: String,
}

/// Queue a spot interruption notice for the rebalance loop
async fn interrupt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InterruptionRequest>,
) -> impl IntoResponse {
    let Some(tx) = &state.interruptions else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "rebalance loop is not accepting interruptions" })),
        );
    };

    match tx.send(request.node.clone()).await {
        Ok(()) => {
            info!(node = %request.node, "Interruption notice queued");
            (StatusCode::ACCEPTED, Json(json!({ "node": request.node })))
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "rebalance loop has stopped" })),
        ),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/interruptions", post(interrupt))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
