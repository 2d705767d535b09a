//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

use crate::suppliers::types::BookingType;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Run with in-memory stores and no database
    pub skip_externals: bool,
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentGatewayConfig,
    pub fund: FundServiceConfig,
    pub webhooks: WebhookConfig,
    pub suppliers: SupplierConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment processor endpoint
#[derive(Debug, Clone)]
pub struct PaymentGatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub request_timeout: u64, // seconds
    pub max_retries: u32,
}

/// Stored-fund balance service endpoint
#[derive(Debug, Clone)]
pub struct FundServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: u64, // seconds
}

/// Inbound webhook verification and retry settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub signing_secret: String,
    pub signature_tolerance: Duration,
    /// How long an admitted delivery holds the processing lease
    pub processing_lease: Duration,
    pub retry_interval: Duration,
    pub max_attempts: i32,
    pub retry_batch_size: i64,
}

/// One supplier-confirmation endpoint for a booking type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierEndpoint {
    pub booking_type: BookingType,
    pub supplier_id: String,
    /// Lower value is preferred
    pub priority: u32,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct SupplierConfig {
    pub endpoints: Vec<SupplierEndpoint>,
    pub health_url: Option<String>,
    pub request_timeout: u64, // seconds
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let skip_externals = env::var("SKIP_EXTERNALS")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";

        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            skip_externals,
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            payments: PaymentGatewayConfig::from_env()?,
            fund: FundServiceConfig::from_env()?,
            webhooks: WebhookConfig::from_env(skip_externals)?,
            suppliers: SupplierConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;
        self.webhooks.validate()?;
        self.suppliers.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                == "true",
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl PaymentGatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaymentGatewayConfig {
            base_url: env::var("PAYMENT_GATEWAY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9100".to_string()),
            secret_key: env::var("PAYMENT_GATEWAY_SECRET_KEY").unwrap_or_default(),
            request_timeout: env::var("PAYMENT_GATEWAY_TIMEOUT")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_GATEWAY_TIMEOUT".to_string()))?,
            max_retries: env::var("PAYMENT_GATEWAY_MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("PAYMENT_GATEWAY_MAX_RETRIES".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_GATEWAY_URL must be a valid URL".to_string(),
            ));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_GATEWAY_TIMEOUT".to_string(),
            ));
        }

        Ok(())
    }
}

impl FundServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(FundServiceConfig {
            base_url: env::var("FUND_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9200".to_string()),
            api_key: env::var("FUND_SERVICE_API_KEY").ok(),
            request_timeout: env::var("FUND_SERVICE_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FUND_SERVICE_TIMEOUT".to_string()))?,
        })
    }
}

impl WebhookConfig {
    pub fn from_env(skip_externals: bool) -> Result<Self, ConfigError> {
        let signing_secret = match env::var("PAYMENT_WEBHOOK_SECRET") {
            Ok(secret) => secret,
            Err(_) if skip_externals => "whsec_local_development".to_string(),
            Err(_) => {
                return Err(ConfigError::MissingVariable(
                    "PAYMENT_WEBHOOK_SECRET".to_string(),
                ))
            }
        };

        let secs = |name: &str, default: u64| -> Duration {
            Duration::from_secs(
                env::var(name)
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(default),
            )
        };

        Ok(WebhookConfig {
            signing_secret,
            signature_tolerance: secs("WEBHOOK_SIGNATURE_TOLERANCE_SECONDS", 300),
            processing_lease: secs("WEBHOOK_PROCESSING_LEASE_SECONDS", 120),
            retry_interval: secs("WEBHOOK_RETRY_INTERVAL_SECONDS", 30),
            max_attempts: env::var("WEBHOOK_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            retry_batch_size: env::var("WEBHOOK_RETRY_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.is_empty() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_WEBHOOK_SECRET cannot be empty".to_string(),
            ));
        }

        if self.processing_lease.is_zero() {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_PROCESSING_LEASE_SECONDS".to_string(),
            ));
        }

        Ok(())
    }
}

impl SupplierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoints = match env::var("SUPPLIERS") {
            Ok(raw) => parse_supplier_endpoints(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(SupplierConfig {
            endpoints,
            health_url: env::var("PROVIDER_HEALTH_URL").ok(),
            request_timeout: env::var("SUPPLIER_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SUPPLIER_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for endpoint in &self.endpoints {
            if !endpoint.base_url.starts_with("http://")
                && !endpoint.base_url.starts_with("https://")
            {
                return Err(ConfigError::ValidationFailed(format!(
                    "supplier '{}' has an invalid URL",
                    endpoint.supplier_id
                )));
            }
        }

        Ok(())
    }
}

/// Parse `SUPPLIERS`, a comma separated list of `type:id:priority:url` entries.
pub fn parse_supplier_endpoints(raw: &str) -> Result<Vec<SupplierEndpoint>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.splitn(4, ':').collect();
            if parts.len() != 4 {
                return Err(ConfigError::InvalidValue(format!("SUPPLIERS entry '{}'", entry)));
            }
            let booking_type = parts[0]
                .parse::<BookingType>()
                .map_err(|_| ConfigError::InvalidValue(format!("SUPPLIERS type '{}'", parts[0])))?;
            let priority = parts[2].parse::<u32>()?;
            Ok(SupplierEndpoint {
                booking_type,
                supplier_id: parts[1].to_string(),
                priority,
                base_url: parts[3].to_string(),
            })
        })
        .collect()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}
