//! Signed payment-provider event envelopes
//!
//! Deliveries carry a `Payment-Signature: t=<unix>,v1=<hex>` header where `v1`
//! is HMAC-SHA256 over `"{t}.{raw body}"` with the shared signing secret. The
//! body is `{ "id", "type", "data": { "object": { ... } } }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::utils::{hmac_sha256_hex, verify_hmac_sha256_hex};

pub const SIGNATURE_HEADER: &str = "payment-signature";

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const CHARGE_DISPUTED: &str = "charge.dispute.created";

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> PaymentResult<()> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| PaymentError::WebhookVerificationError {
            message: "signature header has no timestamp".to_string(),
        })?;
        if signatures.is_empty() {
            return Err(PaymentError::WebhookVerificationError {
                message: "signature header has no v1 signature".to_string(),
            });
        }

        let age = (now.timestamp() - timestamp).unsigned_abs();
        if age > self.tolerance.as_secs() {
            return Err(PaymentError::WebhookVerificationError {
                message: format!("signature timestamp outside tolerance ({}s)", age),
            });
        }

        let signed = signed_payload(timestamp, payload);
        if signatures
            .iter()
            .any(|sig| verify_hmac_sha256_hex(&signed, &self.secret, sig))
        {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "signature mismatch".to_string(),
            })
        }
    }

    /// Build a header value for `payload`; used by test harnesses and local tooling
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let signature = hmac_sha256_hex(&signed_payload(timestamp, payload), &self.secret)
            .unwrap_or_default();
        format!("t={},v1={}", timestamp, signature)
    }
}

fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    signed
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    pub object: JsonValue,
}

/// Event categories the processor acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentSucceeded {
        handle_id: String,
    },
    PaymentFailed {
        handle_id: String,
        reason: String,
    },
    ChargeDisputed {
        charge_id: String,
        handle_id: Option<String>,
        reason: Option<String>,
    },
    Other,
}

impl WebhookEnvelope {
    pub fn parse(payload: &[u8]) -> PaymentResult<Self> {
        let envelope: WebhookEnvelope =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("malformed webhook envelope: {}", e),
                field: Some("payload".to_string()),
            })?;
        if envelope.id.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "webhook event id is empty".to_string(),
                field: Some("id".to_string()),
            });
        }
        Ok(envelope)
    }

    pub fn kind(&self) -> PaymentResult<WebhookEventKind> {
        let object = &self.data.object;
        match self.event_type.as_str() {
            PAYMENT_SUCCEEDED => Ok(WebhookEventKind::PaymentSucceeded {
                handle_id: required_str(object, "id")?,
            }),
            PAYMENT_FAILED => Ok(WebhookEventKind::PaymentFailed {
                handle_id: required_str(object, "id")?,
                reason: object
                    .pointer("/last_payment_error/message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("payment failed")
                    .to_string(),
            }),
            CHARGE_DISPUTED => Ok(WebhookEventKind::ChargeDisputed {
                charge_id: object
                    .get("charge")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .map_or_else(|| required_str(object, "id"), Ok)?,
                handle_id: object
                    .get("payment_intent")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                reason: object
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }),
            _ => Ok(WebhookEventKind::Other),
        }
    }
}

fn required_str(object: &JsonValue, field: &str) -> PaymentResult<String> {
    object
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!("data.object.{} is required", field),
            field: Some(format!("data.object.{}", field)),
        })
}
