//! Provider-health feed polled by the trigger engine

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::suppliers::error::{SupplierError, SupplierResult};
use crate::suppliers::types::ProviderHealthSample;

#[async_trait]
pub trait ProviderHealthSource: Send + Sync {
    async fn samples(&self) -> SupplierResult<Vec<ProviderHealthSample>>;
}

/// `GET {url}` returning a JSON array of samples
pub struct HttpProviderHealthSource {
    url: String,
    client: Client,
}

impl HttpProviderHealthSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SupplierResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SupplierError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ProviderHealthSource for HttpProviderHealthSource {
    async fn samples(&self) -> SupplierResult<Vec<ProviderHealthSample>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SupplierError::Network {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SupplierError::Network {
                message: format!("health feed returned HTTP {}", response.status()),
            });
        }

        response
            .json::<Vec<ProviderHealthSample>>()
            .await
            .map_err(|e| SupplierError::InvalidResponse {
                message: e.to_string(),
            })
    }
}
