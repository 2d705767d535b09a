use crate::config::FundServiceConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::FundBalanceService;
use crate::payments::types::Money;
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Stored-fund wallet API: `POST /v1/accounts/{id}/debits` and `/credits`
pub struct HttpFundWallet {
    config: FundServiceConfig,
    http: PaymentHttpClient,
}

impl HttpFundWallet {
    pub fn new(config: FundServiceConfig) -> PaymentResult<Self> {
        // Debits are not idempotent on every wallet backend, so no transport retries
        let http = PaymentHttpClient::new(
            "fund_wallet",
            Duration::from_secs(config.request_timeout),
            0,
        )?;
        Ok(Self { config, http })
    }

    async fn post_movement(
        &self,
        account_id: &str,
        direction: &str,
        amount: &Money,
        reference: &str,
    ) -> PaymentResult<()> {
        let url = format!(
            "{}/v1/accounts/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            account_id,
            direction
        );
        let payload = serde_json::json!({
            "amount": amount.amount_string(),
            "currency": amount.currency,
            "reference": reference,
        });
        let idempotency_key = format!("{}:{}", direction, reference);

        let result: PaymentResult<JsonValue> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &url,
                self.config.api_key.as_deref(),
                Some(&payload),
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(PaymentError::ProviderError {
                provider_code: Some(code),
                message,
                ..
            }) if code == "402" => Err(PaymentError::InsufficientFundsError { message }),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl FundBalanceService for HttpFundWallet {
    async fn debit(&self, account_id: &str, amount: &Money, reference: &str) -> PaymentResult<()> {
        amount.validate_positive("fundAmount")?;
        self.post_movement(account_id, "debits", amount, reference).await
    }

    async fn credit(&self, account_id: &str, amount: &Money, reference: &str) -> PaymentResult<()> {
        self.post_movement(account_id, "credits", amount, reference).await
    }
}
