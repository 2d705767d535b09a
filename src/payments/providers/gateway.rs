use crate::config::PaymentGatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{PaymentHandle, PaymentHandleRequest, RefundReceipt};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

/// Card processor speaking a payment-intent style JSON API
pub struct HttpPaymentGateway {
    config: PaymentGatewayConfig,
    http: PaymentHttpClient,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

impl HttpPaymentGateway {
    pub fn new(config: PaymentGatewayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "payment_gateway",
            Duration::from_secs(config.request_timeout),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentGateway {
    fn name(&self) -> &str {
        "payment_gateway"
    }

    async fn create_payment_handle(
        &self,
        request: PaymentHandleRequest,
    ) -> PaymentResult<PaymentHandle> {
        request.amount.validate_positive("amount")?;

        let payload = serde_json::json!({
            "amount": request.amount.amount_string(),
            "currency": request.amount.currency,
            "metadata": request.metadata,
        });
        let idempotency_key = format!("handle:{}", request.reference);

        let intent: PaymentIntentResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/payment_intents"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await?;

        info!(
            handle_id = %intent.id,
            reference = %request.reference,
            amount = %request.amount,
            "payment handle created"
        );

        Ok(PaymentHandle {
            handle_id: intent.id,
            client_secret: intent.client_secret,
        })
    }

    async fn refund(&self, handle_id: &str, idempotency_key: &str) -> PaymentResult<RefundReceipt> {
        if handle_id.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "payment handle is required for a refund".to_string(),
                field: Some("handle_id".to_string()),
            });
        }

        let payload = serde_json::json!({ "payment_intent": handle_id });
        let refund: RefundResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/refunds"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[("Idempotency-Key", idempotency_key)],
            )
            .await?;

        info!(handle_id = %handle_id, refund_id = %refund.id, "refund issued");
        Ok(RefundReceipt { refund_id: refund.id })
    }

    async fn cancel_handle(&self, handle_id: &str) -> PaymentResult<()> {
        let _: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/payment_intents/{}/cancel", handle_id)),
                Some(&self.config.secret_key),
                None,
                &[],
            )
            .await?;

        info!(handle_id = %handle_id, "payment handle cancelled");
        Ok(())
    }
}
