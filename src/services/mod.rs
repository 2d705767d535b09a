//! Services module for booking business logic

pub mod alerting;
pub mod booking_orchestrator;
pub mod booking_state;
pub mod side_effects;
pub mod webhook_processor;

// Re-export orchestrator types
pub use crate::services::booking_orchestrator::{
    BookingOrchestrator, InitiateBookingRequest, InitiateOutcome, OrchestratorConfig,
};
pub use crate::services::booking_state::BookingStatus;
pub use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
