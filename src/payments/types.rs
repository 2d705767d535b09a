use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// How the customer pays for a booking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Full amount through a card payment handle, confirmed by webhook
    Card,
    /// Full amount debited synchronously from the stored-fund balance
    Fund,
    /// Fund portion debited synchronously, remainder by card
    Split,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Fund => "fund",
            PaymentMethod::Split => "split",
        }
    }

    pub fn uses_card(&self) -> bool {
        matches!(self, PaymentMethod::Card | PaymentMethod::Split)
    }

    pub fn uses_fund(&self) -> bool {
        matches!(self, PaymentMethod::Fund | PaymentMethod::Split)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "fund" => Ok(PaymentMethod::Fund),
            "split" => Ok(PaymentMethod::Split),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment method: {}", value),
                field: Some("paymentMethod".to_string()),
            }),
        }
    }
}

/// Amount in the transaction's single settlement currency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Amount rendered with two decimal places, as sent to collaborators
    pub fn amount_string(&self) -> String {
        self.amount.with_scale(2).to_string()
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::from(0) {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount_string(), self.currency)
    }
}

#[derive(Debug, Clone)]
pub struct PaymentHandleRequest {
    pub amount: Money,
    /// Booking transaction id, used as the provider-side idempotency key
    pub reference: String,
    pub metadata: JsonValue,
}

/// Provider-side payment intent the client completes with `client_secret`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentHandle {
    pub handle_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
}
