//! Integration tests for the daemon API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use rebalancer_lib::{
    cluster::SimulatedCluster,
    config::RebalanceConfig,
    health::{components, HealthRegistry},
    observability::{EventLogger, RebalancerMetrics},
    rebalance::{CycleOutcome, RebalanceOrchestrator},
    status::StatusBoard,
};
use spot_rebalancer::api::{create_router, AppState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::REBALANCER).await;
    health_registry.register(components::AUTOSCALER).await;

    let metrics = RebalancerMetrics::new().unwrap();
    let status = StatusBoard::new("test-cluster", "simulation");
    let state = Arc::new(AppState::new(health_registry, metrics, status));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["rebalancer"].is_object());
    assert!(health["components"]["autoscaler"].is_object());
}

#[tokio::test]
async fn test_healthz_stays_ok_after_single_failure() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .record_failure(components::REBALANCER, "observing cluster state")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::AUTOSCALER, "Prometheus unreachable")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state) = setup_test_app().await;

    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_owned_registry() {
    let (app, state) = setup_test_app().await;

    state.metrics.observe_cycle(0.02);
    state.metrics.inc_pods_migrated();
    state.metrics.record_scale_decision("up", 3);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("spot_rebalancer_pods_migrated_total 1"));
    assert!(text.contains("spot_rebalancer_cycle_duration_seconds_bucket"));
    assert!(text.contains("spot_rebalancer_scale_decisions_total{direction=\"up\"} 1"));
}

#[tokio::test]
async fn test_status_reports_last_cycle() {
    let (app, state) = setup_test_app().await;

    let config = RebalanceConfig {
        rng_seed: Some(1),
        ..Default::default()
    };
    let mut orchestrator = RebalanceOrchestrator::new(
        Arc::new(SimulatedCluster::demo(Utc::now())),
        &config,
        state.metrics.clone(),
        EventLogger::new("test-cluster"),
    )
    .with_status(state.status.clone());
    assert!(matches!(
        orchestrator.run_cycle(Utc::now()).await,
        CycleOutcome::Completed(_)
    ));

    let (status, body) = get(app, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);

    let snapshot: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(snapshot["cluster"], "test-cluster");
    assert_eq!(snapshot["cycles_completed"], 1);
    assert_eq!(snapshot["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(snapshot["last_cycle"]["migration"]["moved"], 7);
}

#[tokio::test]
async fn test_interruption_is_forwarded() {
    let health_registry = HealthRegistry::new();
    let (tx, mut rx) = mpsc::channel(1);
    let state = Arc::new(
        AppState::new(
            health_registry,
            RebalancerMetrics::new().unwrap(),
            StatusBoard::new("test-cluster", "simulation"),
        )
        .with_interruptions(tx),
    );
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/interruptions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"node":"aks-spot-1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(rx.recv().await.as_deref(), Some("aks-spot-1"));
}

#[tokio::test]
async fn test_interruption_without_loop_is_unavailable() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/interruptions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"node":"aks-spot-1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
