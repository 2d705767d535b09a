//! Booking lifecycle state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Row created, no payment handle or debit yet
    Initiated,
    /// Card handle issued, waiting for the processor webhook
    PaymentProcessing,
    /// Money captured, supplier not confirmed yet
    PaymentConfirmed,
    /// Supplier accepted the reservation
    Confirmed,
    Completed,
    PaymentFailed,
    Failed,
    Cancelled,
    Refunded,
    /// Abandoned by the stuck-transaction remedy
    Expired,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 10] = [
        BookingStatus::Initiated,
        BookingStatus::PaymentProcessing,
        BookingStatus::PaymentConfirmed,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::PaymentFailed,
        BookingStatus::Failed,
        BookingStatus::Cancelled,
        BookingStatus::Refunded,
        BookingStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Initiated => "initiated",
            BookingStatus::PaymentProcessing => "payment_processing",
            BookingStatus::PaymentConfirmed => "payment_confirmed",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::PaymentFailed => "payment_failed",
            BookingStatus::Failed => "failed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Refunded => "refunded",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn valid_transitions(&self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            Initiated => &[
                PaymentProcessing,
                PaymentConfirmed,
                PaymentFailed,
                Failed,
                Cancelled,
                Refunded,
                Expired,
            ],
            PaymentProcessing => &[
                PaymentConfirmed,
                PaymentFailed,
                Failed,
                Cancelled,
                Refunded,
                Expired,
            ],
            PaymentConfirmed => &[Confirmed, Failed, Cancelled, Refunded],
            Confirmed => &[Completed, Cancelled, Refunded],
            PaymentFailed => &[Failed, Cancelled, Refunded],
            Completed | Failed | Cancelled | Refunded | Expired => &[],
        }
    }

    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Status exposed to customers; reconciliation states collapse to `processing`
    pub fn public_status(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Failed => "failed",
            _ => "processing",
        }
    }

    /// Whether money is known to be captured in this state
    pub fn has_capture(&self) -> bool {
        matches!(
            self,
            BookingStatus::PaymentConfirmed | BookingStatus::Confirmed | BookingStatus::Completed
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown booking status '{}'", s))
    }
}
