use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;
use crate::database::alert_repository::{AlertSeverity, AlertType, NewAlert};
use crate::database::booking_repository::BookingTransactionStore;
use crate::database::error::DatabaseError;
use crate::database::idempotency_repository::{Admission, IdempotencyLedger, IdempotencyLedgerEntry};
use crate::database::Stores;
use crate::error::{
    AppError, AppErrorKind, AppResult, DomainError, InfrastructureError, SecurityError,
};
use crate::payments::webhook::{SignatureVerifier, WebhookEnvelope, WebhookEventKind};
use crate::services::alerting::AlertService;
use crate::services::booking_orchestrator::{is_supplier_failure, BookingOrchestrator};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Event {0} is already being processed")]
    InFlight(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<DatabaseError> for WebhookProcessorError {
    fn from(err: DatabaseError) -> Self {
        WebhookProcessorError::DatabaseError(err.to_string())
    }
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        match err {
            WebhookProcessorError::InvalidSignature(reason) => {
                AppError::new(AppErrorKind::Security(SecurityError::InvalidSignature { reason }))
            }
            WebhookProcessorError::MalformedPayload(message) => {
                AppError::validation("payload", message)
            }
            WebhookProcessorError::InFlight(event_id) => {
                AppError::new(AppErrorKind::Domain(DomainError::WebhookInFlight { event_id }))
            }
            WebhookProcessorError::ProcessingError(message) => AppError::new(
                AppErrorKind::Infrastructure(InfrastructureError::ProcessingDeferred { message }),
            ),
            WebhookProcessorError::DatabaseError(message) => {
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed { event_id: String },
    /// Event was settled by an earlier delivery
    Duplicate { event_id: String },
}

pub struct WebhookProcessor {
    ledger: Arc<dyn IdempotencyLedger>,
    bookings: Arc<dyn BookingTransactionStore>,
    orchestrator: Arc<BookingOrchestrator>,
    alerts: AlertService,
    verifier: SignatureVerifier,
    lease: Duration,
}

impl WebhookProcessor {
    pub fn new(stores: &Stores, orchestrator: Arc<BookingOrchestrator>, config: &WebhookConfig) -> Self {
        Self {
            ledger: stores.ledger.clone(),
            bookings: stores.bookings.clone(),
            orchestrator,
            alerts: AlertService::new(stores.alerts.clone()),
            verifier: SignatureVerifier::new(
                config.signing_secret.clone(),
                config.signature_tolerance,
            ),
            lease: config.processing_lease,
        }
    }

    /// Verify, admit, dispatch and settle one delivery
    pub async fn process(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let signature = signature.ok_or_else(|| self.reject("missing signature header"))?;
        if let Err(e) = self.verifier.verify(payload, signature, Utc::now()) {
            return Err(self.reject(&e.to_string()));
        }

        let envelope = WebhookEnvelope::parse(payload)
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;
        let kind = envelope
            .kind()
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;
        let stored = serde_json::to_value(&envelope)
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;

        self.admit_and_dispatch(&envelope, kind, &stored).await
    }

    /// Replays a stored, already verified event (called by the retry worker)
    pub async fn replay(
        &self,
        entry: &IdempotencyLedgerEntry,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let parsed = serde_json::from_value::<WebhookEnvelope>(entry.payload.clone())
            .map_err(|e| e.to_string())
            .and_then(|envelope| {
                envelope
                    .kind()
                    .map(|kind| (envelope, kind))
                    .map_err(|e| e.to_string())
            });

        match parsed {
            Ok((envelope, kind)) => self.admit_and_dispatch(&envelope, kind, &entry.payload).await,
            Err(reason) => {
                self.ledger.record_failure(&entry.event_id, &reason).await?;
                Err(WebhookProcessorError::MalformedPayload(reason))
            }
        }
    }

    fn reject(&self, reason: &str) -> WebhookProcessorError {
        warn!(target: "security", reason = %reason, "webhook signature rejected");
        WebhookProcessorError::InvalidSignature(reason.to_string())
    }

    async fn admit_and_dispatch(
        &self,
        envelope: &WebhookEnvelope,
        kind: WebhookEventKind,
        payload: &JsonValue,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let event_id = envelope.id.clone();

        let admission = self
            .ledger
            .admit(&event_id, &envelope.event_type, payload, self.lease)
            .await?;

        match &admission {
            Admission::AlreadyProcessed(_) => {
                info!(event_id = %event_id, "webhook already processed, discarding");
                return Ok(WebhookOutcome::Duplicate { event_id });
            }
            Admission::InFlight(entry) => {
                info!(
                    event_id = %event_id,
                    claimed_until = ?entry.claimed_until,
                    "webhook in flight elsewhere"
                );
                return Err(WebhookProcessorError::InFlight(event_id));
            }
            Admission::Owner(_) | Admission::Retry(_) => {}
        }

        info!(
            event_id = %event_id,
            event_type = %envelope.event_type,
            attempt = admission.entry().processing_attempts + 1,
            "processing webhook"
        );

        match self.dispatch(&event_id, kind).await {
            Ok(()) => {
                self.ledger.mark_processed(&event_id).await?;
                info!(event_id = %event_id, "webhook processed successfully");
                Ok(WebhookOutcome::Processed { event_id })
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "webhook processing failed");
                self.ledger.record_failure(&event_id, &e.to_string()).await?;
                Err(WebhookProcessorError::ProcessingError(e.to_string()))
            }
        }
    }

    async fn dispatch(&self, event_id: &str, kind: WebhookEventKind) -> AppResult<()> {
        match kind {
            WebhookEventKind::PaymentSucceeded { handle_id } => {
                match self.orchestrator.handle_payment_succeeded(&handle_id).await {
                    Ok(_) => Ok(()),
                    // Escalated already; the event itself was handled
                    Err(e) if is_supplier_failure(&e) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            WebhookEventKind::PaymentFailed { handle_id, reason } => {
                self.orchestrator
                    .handle_payment_failed(&handle_id, &reason)
                    .await?;
                Ok(())
            }
            WebhookEventKind::ChargeDisputed {
                charge_id,
                handle_id,
                reason,
            } => self.record_dispute(charge_id, handle_id, reason).await,
            WebhookEventKind::Other => {
                info!(event_id = %event_id, "webhook type not handled, acknowledging");
                Ok(())
            }
        }
    }

    async fn record_dispute(
        &self,
        charge_id: String,
        handle_id: Option<String>,
        reason: Option<String>,
    ) -> AppResult<()> {
        let booking = match handle_id.as_deref() {
            Some(handle) => self.bookings.find_by_payment_ref(handle).await?,
            None => None,
        };

        let message = format!(
            "Charge {} disputed{}{}",
            charge_id,
            booking
                .as_ref()
                .map(|tx| format!(" for booking {}", tx.booking_reference))
                .unwrap_or_default(),
            reason.map(|r| format!(": {}", r)).unwrap_or_default()
        );

        let mut alert = NewAlert::new(AlertType::Manual, AlertSeverity::Critical, message)
            .manual_action()
            .subject(format!("dispute:{}", charge_id));
        if let Some(tx) = &booking {
            alert = alert.for_transaction(tx.id);
        }

        self.alerts.raise(alert).await.map_err(|e| {
            error!(charge_id = %charge_id, error = %e, "failed to record dispute alert");
            AppError::from(e)
        })?;
        Ok(())
    }
}
