//! Unified error handling for the booking backend
//!
//! Every failure that can reach an HTTP boundary is expressed as an
//! [`AppError`], which knows its status code, machine-readable error code,
//! user-facing message and whether the caller may retry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by API clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "ALERT_NOT_FOUND")]
    AlertNotFound,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "STATE_CONFLICT")]
    StateConflict,
    #[serde(rename = "SUPPLIER_CONFIRMATION_FAILED")]
    SupplierConfirmationFailed,
    #[serde(rename = "WEBHOOK_IN_FLIGHT")]
    WebhookInFlight,

    // Security errors
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "PROCESSING_DEFERRED")]
    ProcessingDeferred,

    // External errors (502, 503, 504)
    #[serde(rename = "UPSTREAM_UNAVAILABLE")]
    UpstreamUnavailable,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule failures
#[derive(Debug, Clone)]
pub enum DomainError {
    /// The fund-balance collaborator refused the debit
    InsufficientFunds { account_id: String, required: String },
    /// Booking transaction with the given id or reference does not exist
    TransactionNotFound { transaction_id: String },
    AlertNotFound { alert_id: String },
    /// Requested status change is not allowed by the booking state machine
    InvalidTransition { from: String, to: String },
    /// Compare-and-set kept losing against concurrent writers
    StateConflict {
        transaction_id: String,
        expected: String,
        actual: String,
    },
    /// Payment captured but the supplier did not confirm the reservation
    SupplierConfirmation {
        transaction_id: String,
        supplier_id: String,
        reason: String,
    },
    /// Another worker currently holds the processing lease for this event
    WebhookInFlight { event_id: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
    /// Work was accepted but could not finish; the sender should redeliver
    ProcessingDeferred { message: String },
}

/// External collaborator errors (payment, fund balance, suppliers)
#[derive(Debug, Clone)]
pub enum ExternalError {
    UpstreamUnavailable { service: String, message: String },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    InvalidAmount { amount: String, reason: String },
}

/// Authenticity failures, logged as security events
#[derive(Debug, Clone)]
pub enum SecurityError {
    InvalidSignature { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
    Security(SecurityError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn not_found(transaction_id: impl ToString) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
            transaction_id: transaction_id.to_string(),
        }))
    }

    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::External(ExternalError::UpstreamUnavailable {
            service: service.into(),
            message: message.into(),
        }))
    }

    pub fn timeout(service: impl Into<String>, timeout_secs: u64) -> Self {
        Self::new(AppErrorKind::External(ExternalError::Timeout {
            service: service.into(),
            timeout_secs,
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => 402,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::AlertNotFound { .. } => 404,
                DomainError::InvalidTransition { .. } => 409,
                DomainError::StateConflict { .. } => 409,
                DomainError::SupplierConfirmation { .. } => 502,
                DomainError::WebhookInFlight { .. } => 409,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
                InfrastructureError::ProcessingDeferred { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::UpstreamUnavailable { .. } => 503,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Security(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::AlertNotFound { .. } => ErrorCode::AlertNotFound,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::StateConflict { .. } => ErrorCode::StateConflict,
                DomainError::SupplierConfirmation { .. } => ErrorCode::SupplierConfirmationFailed,
                DomainError::WebhookInFlight { .. } => ErrorCode::WebhookInFlight,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::ProcessingDeferred { .. } => ErrorCode::ProcessingDeferred,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::UpstreamUnavailable { .. } => ErrorCode::UpstreamUnavailable,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::Security(_) => ErrorCode::InvalidSignature,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { required, .. } => {
                    format!("Insufficient balance to cover {}", required)
                }
                DomainError::TransactionNotFound { transaction_id } => {
                    format!("Booking '{}' not found", transaction_id)
                }
                DomainError::AlertNotFound { alert_id } => {
                    format!("Alert '{}' not found", alert_id)
                }
                DomainError::InvalidTransition { from, to } => {
                    format!("Booking cannot move from '{}' to '{}'", from, to)
                }
                DomainError::StateConflict { transaction_id, .. } => {
                    format!(
                        "Booking '{}' was modified concurrently. Please try again",
                        transaction_id
                    )
                }
                DomainError::SupplierConfirmation { .. } => {
                    "Your booking is being processed. Our team has been notified".to_string()
                }
                DomainError::WebhookInFlight { event_id } => {
                    format!("Event '{}' is already being processed", event_id)
                }
            },
            AppErrorKind::Infrastructure(InfrastructureError::ProcessingDeferred { .. }) => {
                "Event could not be processed yet. Please redeliver".to_string()
            }
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::UpstreamUnavailable { service, .. } => {
                    format!("{} is temporarily unavailable. Please try again", service)
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
            },
            AppErrorKind::Security(_) => "Invalid webhook signature".to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::StateConflict { .. } => true,
                DomainError::WebhookInFlight { .. } => true,
                _ => false,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::ProcessingDeferred { .. } => true,
            },
            AppErrorKind::External(_) => true,
            AppErrorKind::Validation(_) => false,
            AppErrorKind::Security(_) => false,
        }
    }

    /// True when a transient upstream failure or timeout caused this error
    pub fn is_upstream(&self) -> bool {
        matches!(self.kind, AppErrorKind::External(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.user_message(), context),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientFunds {
            account_id: "acct_1".to_string(),
            required: "40.00 USD".to_string(),
        }));

        assert_eq!(error.status_code(), 402);
        assert_eq!(error.error_code(), ErrorCode::InsufficientFunds);
        assert!(error.user_message().contains("40.00 USD"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable_and_distinct() {
        let error = AppError::timeout("Fund balance service", 5);

        assert_eq!(error.status_code(), 504);
        assert_eq!(error.error_code(), ErrorCode::ExternalServiceTimeout);
        assert!(error.is_retryable());
        assert!(error.is_upstream());
    }

    #[test]
    fn test_invalid_signature_is_never_retried() {
        let error = AppError::new(AppErrorKind::Security(SecurityError::InvalidSignature {
            reason: "mismatch".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidSignature);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::validation("customerInfo.email", "must be a valid email address");

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(error.user_message().contains("customerInfo.email"));
    }

    #[test]
    fn test_context_is_shown_in_display() {
        let error = AppError::not_found("abc").with_context("cancel");
        assert!(error.to_string().contains("cancel"));
    }
}
