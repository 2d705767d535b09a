//! Booking lifecycle endpoints

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::database::booking_repository::BookingTransaction;
use crate::error::{AppError, AppResult};
use crate::middleware::error::tag_request_id;
use crate::payments::types::PaymentMethod;
use crate::services::booking_orchestrator::InitiateBookingRequest;
use crate::services::booking_state::BookingStatus;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSummary {
    pub id: Uuid,
    pub reference: String,
    /// Customer-facing status, see [`BookingStatus::public_status`]
    pub status: &'static str,
    pub total_amount: String,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_reference: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub method: PaymentMethod,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub booking: BookingSummary,
    pub payment: PaymentSummary,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

fn payment_status(tx: &BookingTransaction) -> &'static str {
    match tx.status {
        BookingStatus::Initiated | BookingStatus::PaymentProcessing => "pending",
        BookingStatus::PaymentConfirmed | BookingStatus::Confirmed | BookingStatus::Completed => {
            "captured"
        }
        BookingStatus::PaymentFailed | BookingStatus::Failed | BookingStatus::Expired => "failed",
        BookingStatus::Refunded => "refunded",
        BookingStatus::Cancelled if tx.flag("refund_issued") || tx.flag("fund_credited") => {
            "refunded"
        }
        BookingStatus::Cancelled => "voided",
    }
}

impl BookingResponse {
    pub fn new(tx: &BookingTransaction, client_secret: Option<String>) -> Self {
        Self {
            booking: BookingSummary {
                id: tx.id,
                reference: tx.booking_reference.clone(),
                status: tx.status.public_status(),
                total_amount: tx.total_amount.with_scale(2).to_string(),
                currency: tx.currency.clone(),
                supplier_reference: tx.supplier_reference.clone(),
            },
            payment: PaymentSummary {
                method: tx.payment_method,
                status: payment_status(tx),
                client_secret,
            },
        }
    }
}

fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::validation("id", "must be a UUID"))
}

/// POST /api/bookings
pub async fn initiate_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let request: InitiateBookingRequest = serde_json::from_slice(&body)
            .map_err(|e| AppError::validation("body", e.to_string()))?;
        state.orchestrator.initiate(request).await
    }
    .await;

    match result {
        Ok(outcome) => {
            info!(
                transaction_id = %outcome.transaction.id,
                status = %outcome.transaction.status,
                "booking request accepted"
            );
            (
                StatusCode::CREATED,
                Json(BookingResponse::new(&outcome.transaction, outcome.client_secret)),
            )
                .into_response()
        }
        Err(e) => tag_request_id(e, &headers).into_response(),
    }
}

/// GET /api/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BookingResponse>, AppError> {
    let id = parse_id(&id).map_err(|e| tag_request_id(e, &headers))?;
    let tx = state
        .orchestrator
        .status(id)
        .await
        .map_err(|e| tag_request_id(e, &headers))?;
    Ok(Json(BookingResponse::new(&tx, None)))
}

/// GET /api/bookings/reference/{reference}
pub async fn get_booking_by_reference(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BookingResponse>, AppError> {
    let tx = state
        .orchestrator
        .status_by_reference(&reference)
        .await
        .map_err(|e| tag_request_id(e, &headers))?;
    Ok(Json(BookingResponse::new(&tx, None)))
}

/// POST /api/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BookingResponse>, AppError> {
    let result = async {
        let id = parse_id(&id)?;
        let request = if body.is_empty() {
            CancelRequest::default()
        } else {
            serde_json::from_slice::<CancelRequest>(&body)
                .map_err(|e| AppError::validation("body", e.to_string()))?
        };
        state.orchestrator.cancel(id, request.reason).await
    }
    .await;

    let tx = result.map_err(|e| tag_request_id(e, &headers))?;
    Ok(Json(BookingResponse::new(&tx, None)))
}

/// POST /api/bookings/{id}/complete
pub async fn complete_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BookingResponse>, AppError> {
    let result = async {
        let id = parse_id(&id)?;
        state.orchestrator.complete(id).await
    }
    .await;

    let tx = result.map_err(|e| tag_request_id(e, &headers))?;
    Ok(Json(BookingResponse::new(&tx, None)))
}
