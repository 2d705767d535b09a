//! HTTP surface: booking lifecycle, payment webhooks, admin alerts and probes

pub mod alerts;
pub mod bookings;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::alerting::AlertService;
use crate::services::booking_orchestrator::BookingOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;
use crate::workers::trigger_engine::TriggerEngine;

// Application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BookingOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub alerts: AlertService,
    pub triggers: Arc<TriggerEngine>,
    pub health_checker: HealthChecker,
}

/// Full router with request-id and request-logging layers applied
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/api/bookings", post(bookings::initiate_booking))
        .route("/api/bookings/{id}", get(bookings::get_booking))
        .route(
            "/api/bookings/reference/{reference}",
            get(bookings::get_booking_by_reference),
        )
        .route("/api/bookings/{id}/cancel", post(bookings::cancel_booking))
        .route("/api/bookings/{id}/complete", post(bookings::complete_booking))
        .route("/webhooks/payments", post(webhooks::handle_payment_webhook))
        .route("/api/admin/alerts", get(alerts::list_alerts))
        .route("/api/admin/alerts/{id}/resolve", post(alerts::resolve_alert))
        .route("/api/admin/triggers/evaluate", post(alerts::evaluate_triggers))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn root() -> &'static str {
    "Wayfare booking backend"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any critical component is down
    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    let result = health(State(state)).await;
    if result.is_err() {
        error!("❌ Readiness check failed");
    }
    result
}

/// Liveness probe - the process is up and serving
async fn liveness() -> &'static str {
    info!("💓 Liveness probe requested");
    "OK"
}
