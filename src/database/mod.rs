pub mod alert_repository;
pub mod audit_repository;
pub mod booking_repository;
pub mod error;
pub mod idempotency_repository;
pub mod memory;
pub mod routing_repository;

use std::sync::Arc;

use self::alert_repository::AlertStore;
use self::audit_repository::AuditLog;
use self::booking_repository::BookingTransactionStore;
use self::idempotency_repository::IdempotencyLedger;
use self::memory::InMemoryStore;
use self::routing_repository::SupplierRoutingStore;

#[cfg(feature = "database")]
use self::error::DatabaseError;
#[cfg(feature = "database")]
use crate::config::DatabaseConfig;
#[cfg(feature = "database")]
use sqlx::postgres::PgPoolOptions;
#[cfg(feature = "database")]
use sqlx::PgPool;
#[cfg(feature = "database")]
use std::time::Duration;
#[cfg(feature = "database")]
use tracing::{error as log_error, info, warn};

/// Every durable store the service coordinates through
#[derive(Clone)]
pub struct Stores {
    pub bookings: Arc<dyn BookingTransactionStore>,
    pub ledger: Arc<dyn IdempotencyLedger>,
    pub alerts: Arc<dyn AlertStore>,
    pub audit: Arc<dyn AuditLog>,
    pub routing: Arc<dyn SupplierRoutingStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self::from_memory(InMemoryStore::new())
    }

    /// All five traits served by one shared in-memory state
    pub fn from_memory(store: InMemoryStore) -> Self {
        let shared = Arc::new(store);
        Self {
            bookings: shared.clone(),
            ledger: shared.clone(),
            alerts: shared.clone(),
            audit: shared.clone(),
            routing: shared,
        }
    }

    #[cfg(feature = "database")]
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            bookings: Arc::new(booking_repository::BookingTransactionRepository::new(
                pool.clone(),
            )),
            ledger: Arc::new(idempotency_repository::IdempotencyLedgerRepository::new(
                pool.clone(),
            )),
            alerts: Arc::new(alert_repository::AlertRepository::new(pool.clone())),
            audit: Arc::new(audit_repository::AuditLogRepository::new(pool.clone())),
            routing: Arc::new(routing_repository::SupplierRoutingRepository::new(pool)),
        }
    }
}

/// Database pool configuration
#[cfg(feature = "database")]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

#[cfg(feature = "database")]
impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Initialize the database connection pool
#[cfg(feature = "database")]
pub async fn init_pool(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<PgPool, DatabaseError> {
    let config = config.unwrap_or_default();

    info!(
        "Initializing database pool: max_connections={}, min_connections={}, connection_timeout={:?}",
        config.max_connections, config.min_connections, config.connection_timeout
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    pool.acquire().await.map_err(|e| {
        log_error!("Failed to acquire test connection: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}

/// Applies the SQL files under `migrations/`
#[cfg(feature = "database")]
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        log_error!("Migration failed: {}", e);
        DatabaseError::new(error::DatabaseErrorKind::Unknown {
            message: format!("migration failed: {}", e),
        })
    })?;
    info!("Database migrations applied");
    Ok(())
}

/// Connection pool health check
#[cfg(feature = "database")]
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!("Health check failed: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    Ok(())
}

/// Initialize the database pool from application configuration
#[cfg(feature = "database")]
pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let pool_config = PoolConfig {
        max_connections: config.max_connections,
        min_connections: config.min_connections,
        connection_timeout: Duration::from_secs(config.connection_timeout),
        idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
        max_lifetime: Duration::from_secs(1800),
    };

    init_pool(&config.url, Some(pool_config)).await
}
