use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::info;

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::tag_request_id;
use crate::payments::webhook::SIGNATURE_HEADER;
use crate::services::webhook_processor::WebhookOutcome;

/// POST /webhooks/payments
///
/// The raw body is verified before it is parsed. A duplicate delivery is
/// acknowledged like a fresh one; transient failures return 409/500 so the
/// processor redelivers.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.webhooks.process(&body, signature).await {
        Ok(WebhookOutcome::Processed { event_id }) => {
            info!(event_id = %event_id, "payment webhook acknowledged");
            StatusCode::OK.into_response()
        }
        Ok(WebhookOutcome::Duplicate { event_id }) => {
            info!(event_id = %event_id, "duplicate payment webhook acknowledged");
            StatusCode::OK.into_response()
        }
        Err(e) => tag_request_id(AppError::from(e), &headers).into_response(),
    }
}
