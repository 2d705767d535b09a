//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::suppliers::health::ProviderHealthSource;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application.
///
/// The database is critical: when it is down the service is unhealthy. The
/// provider-health feed only feeds the trigger engine, so losing it degrades
/// the service without taking it out of rotation.
#[derive(Clone, Default)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    health_feed: Option<Arc<dyn ProviderHealthSource>>,
}

impl HealthChecker {
    /// Checker for a process running on the in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_health_feed(mut self, source: Arc<dyn ProviderHealthSource>) -> Self {
        self.health_feed = Some(source);
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut overall_healthy = true;
        let mut degraded = false;

        match self.check_database(&mut health_status).await {
            Some(healthy) => overall_healthy &= healthy,
            None => {
                health_status.checks.insert(
                    "storage".to_string(),
                    ComponentHealth {
                        status: ComponentState::Up,
                        response_time_ms: Some(0),
                        details: Some("in-memory".to_string()),
                    },
                );
            }
        }

        if let Some(source) = &self.health_feed {
            let start = Instant::now();
            match timeout(Duration::from_secs(10), source.samples()).await {
                Ok(Ok(samples)) => {
                    let response_time = start.elapsed().as_millis();
                    health_status.checks.insert(
                        "provider_health_feed".to_string(),
                        ComponentHealth {
                            status: ComponentState::Up,
                            response_time_ms: Some(response_time),
                            details: Some(format!("{} samples", samples.len())),
                        },
                    );
                }
                Ok(Err(e)) => {
                    degraded = true;
                    health_status.checks.insert(
                        "provider_health_feed".to_string(),
                        ComponentHealth::warning(None, Some(e.to_string())),
                    );
                    warn!("Provider health feed check failed: {}", e);
                }
                Err(_) => {
                    degraded = true;
                    health_status.checks.insert(
                        "provider_health_feed".to_string(),
                        ComponentHealth::warning(None, Some("Timeout".to_string())),
                    );
                    warn!("Provider health feed check timed out");
                }
            }
        }

        // Set overall status
        health_status.status = if !overall_healthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

impl HealthChecker {
    /// `None` when no database is configured
    #[cfg(feature = "database")]
    async fn check_database(&self, health_status: &mut HealthStatus) -> Option<bool> {
        let pool = self.db_pool.as_ref()?;
        let healthy = match timeout(Duration::from_secs(5), check_database_health(pool)).await {
            Ok(Ok(response_time)) => {
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::up(Some(response_time)),
                );
                info!("Database health check: OK ({}ms)", response_time);
                true
            }
            Ok(Err(e)) => {
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("Database health check failed: {}", e);
                false
            }
            Err(_) => {
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Database health check timed out");
                false
            }
        };
        Some(healthy)
    }

    #[cfg(not(feature = "database"))]
    async fn check_database(&self, _health_status: &mut HealthStatus) -> Option<bool> {
        None
    }
}

#[cfg(feature = "database")]
pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suppliers::error::{SupplierError, SupplierResult};
    use crate::suppliers::types::ProviderHealthSample;
    use async_trait::async_trait;

    struct DownFeed;

    #[async_trait]
    impl ProviderHealthSource for DownFeed {
        async fn samples(&self) -> SupplierResult<Vec<ProviderHealthSample>> {
            Err(SupplierError::Network {
                message: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
    }

    #[tokio::test]
    async fn in_memory_checker_is_healthy() {
        let status = HealthChecker::new().check_health().await;
        assert!(status.is_healthy());
        assert!(status.checks.contains_key("storage"));
    }

    #[tokio::test]
    async fn failing_health_feed_degrades() {
        let status = HealthChecker::new()
            .with_health_feed(Arc::new(DownFeed))
            .check_health()
            .await;
        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(
            status.checks["provider_health_feed"].status,
            ComponentState::Warning
        );
    }
}
