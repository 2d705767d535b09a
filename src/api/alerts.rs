//! Admin endpoints for alerts and on-demand trigger evaluation

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::database::alert_repository::AlertRecord;
use crate::error::AppError;
use crate::middleware::error::tag_request_id;
use crate::workers::trigger_engine::CycleReport;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub unresolved: Option<bool>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<AlertRecord>,
    pub count: usize,
}

/// GET /api/admin/alerts?unresolved=true
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<AlertsQuery>,
    headers: HeaderMap,
) -> Result<Json<AlertsResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let alerts = state
        .alerts
        .list(params.unresolved.unwrap_or(false), limit)
        .await
        .map_err(|e| tag_request_id(e, &headers))?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

/// POST /api/admin/alerts/{id}/resolve
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AlertRecord>, AppError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| tag_request_id(AppError::validation("id", "must be a UUID"), &headers))?;
    let record = state
        .alerts
        .resolve(id)
        .await
        .map_err(|e| tag_request_id(e, &headers))?;
    Ok(Json(record))
}

/// POST /api/admin/triggers/evaluate
pub async fn evaluate_triggers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CycleReport>, AppError> {
    let report = state
        .triggers
        .evaluate()
        .await
        .map_err(|e| tag_request_id(AppError::from(e), &headers))?;
    Ok(Json(report))
}
