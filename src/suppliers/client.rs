//! Supplier-confirmation collaborators

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::suppliers::error::{SupplierError, SupplierResult};
use crate::suppliers::types::{ConfirmationRequest, SupplierConfirmation};

#[async_trait]
pub trait SupplierClient: Send + Sync {
    fn id(&self) -> &str;

    /// Finalize the reservation. A supplier refusal is reported as
    /// `success = false`, transport problems as `Err`.
    async fn confirm(&self, request: &ConfirmationRequest) -> SupplierResult<SupplierConfirmation>;
}

/// JSON-over-HTTP supplier endpoint: `POST {base_url}/confirmations`
pub struct HttpSupplierClient {
    id: String,
    base_url: String,
    timeout: Duration,
    client: Client,
}

impl HttpSupplierClient {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> SupplierResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SupplierError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }
}

#[async_trait]
impl SupplierClient for HttpSupplierClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn confirm(&self, request: &ConfirmationRequest) -> SupplierResult<SupplierConfirmation> {
        let url = format!("{}/confirmations", self.base_url);
        debug!(supplier = %self.id, reference = %request.booking_reference, "confirming with supplier");

        let response = self
            .client
            .post(&url)
            .header("Idempotency-Key", request.booking_reference.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SupplierError::Timeout {
                        supplier: self.id.clone(),
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    SupplierError::Network {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            warn!(supplier = %self.id, status = %status, "supplier returned server error");
            return Err(SupplierError::Network {
                message: format!("HTTP {}", status),
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            return Ok(SupplierConfirmation {
                success: false,
                provider_reference: None,
                message: Some(format!("HTTP {}: {}", status, body)),
            });
        }

        serde_json::from_str::<SupplierConfirmation>(&body).map_err(|e| {
            SupplierError::InvalidResponse {
                message: e.to_string(),
            }
        })
    }
}
