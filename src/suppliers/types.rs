use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the customer is buying; selects the supplier lookup table row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingType {
    Flight,
    Hotel,
    Activity,
    Package,
}

impl BookingType {
    pub const ALL: [BookingType; 4] = [
        BookingType::Flight,
        BookingType::Hotel,
        BookingType::Activity,
        BookingType::Package,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingType::Flight => "flight",
            BookingType::Hotel => "hotel",
            BookingType::Activity => "activity",
            BookingType::Package => "package",
        }
    }
}

impl fmt::Display for BookingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flight" => Ok(BookingType::Flight),
            "hotel" => Ok(BookingType::Hotel),
            "activity" => Ok(BookingType::Activity),
            "package" => Ok(BookingType::Package),
            other => Err(format!("unknown booking type '{}'", other)),
        }
    }
}

/// Request sent to a supplier to finalize a reservation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub booking_reference: String,
    pub booking_type: BookingType,
    pub booking_data: serde_json::Value,
    pub customer: serde_json::Value,
}

/// Supplier answer to a confirmation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierConfirmation {
    pub success: bool,
    #[serde(default)]
    pub provider_reference: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderHealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Health snapshot of one supplier, as published by the provider-health feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthSample {
    pub provider_id: String,
    pub status: ProviderHealthStatus,
    pub last_checked_at: DateTime<Utc>,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Quota used divided by quota limit, when the supplier meters usage
    #[serde(default)]
    pub usage_ratio: Option<f64>,
}
