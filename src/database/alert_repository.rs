use crate::database::error::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "database")]
use crate::database::booking_repository::invalid_column;
#[cfg(feature = "database")]
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    StuckTransactions,
    PaymentFailureSpike,
    SupplierDegradation,
    QuotaExhaustion,
    Manual,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::StuckTransactions => "stuck_transactions",
            AlertType::PaymentFailureSpike => "payment_failure_spike",
            AlertType::SupplierDegradation => "supplier_degradation",
            AlertType::QuotaExhaustion => "quota_exhaustion",
            AlertType::Manual => "manual",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stuck_transactions" => Ok(AlertType::StuckTransactions),
            "payment_failure_spike" => Ok(AlertType::PaymentFailureSpike),
            "supplier_degradation" => Ok(AlertType::SupplierDegradation),
            "quota_exhaustion" => Ok(AlertType::QuotaExhaustion),
            "manual" => Ok(AlertType::Manual),
            other => Err(format!("unknown alert type '{}'", other)),
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown alert severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub related_transaction_id: Option<Uuid>,
    pub requires_manual_action: bool,
    /// Unresolved alerts sharing type and subject are deduplicated
    pub subject_key: Option<String>,
}

impl NewAlert {
    pub fn new(alert_type: AlertType, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            severity,
            message: message.into(),
            related_transaction_id: None,
            requires_manual_action: false,
            subject_key: None,
        }
    }

    pub fn for_transaction(mut self, transaction_id: Uuid) -> Self {
        self.related_transaction_id = Some(transaction_id);
        self
    }

    pub fn manual_action(mut self) -> Self {
        self.requires_manual_action = true;
        self
    }

    pub fn subject(mut self, subject_key: impl Into<String>) -> Self {
        self.subject_key = Some(subject_key.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub related_transaction_id: Option<Uuid>,
    pub requires_manual_action: bool,
    pub resolved: bool,
    pub subject_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Inserts unless an unresolved alert with the same type and subject exists;
    /// `None` means the alert was suppressed
    async fn insert_if_absent(&self, alert: NewAlert) -> Result<Option<AlertRecord>, DatabaseError>;

    async fn find_unresolved(
        &self,
        alert_type: AlertType,
        subject_key: &str,
    ) -> Result<Option<AlertRecord>, DatabaseError>;

    /// Newest first
    async fn list(&self, unresolved_only: bool, limit: i64)
        -> Result<Vec<AlertRecord>, DatabaseError>;

    async fn resolve(&self, id: Uuid) -> Result<Option<AlertRecord>, DatabaseError>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[cfg(feature = "database")]
const ALERT_COLUMNS: &str = "id, alert_type, severity, message, related_transaction_id, \
     requires_manual_action, resolved, subject_key, created_at, resolved_at";

#[cfg(feature = "database")]
#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    alert_type: String,
    severity: String,
    message: String,
    related_transaction_id: Option<Uuid>,
    requires_manual_action: bool,
    resolved: bool,
    subject_key: Option<String>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "database")]
impl TryFrom<AlertRow> for AlertRecord {
    type Error = DatabaseError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(AlertRecord {
            id: row.id,
            alert_type: row
                .alert_type
                .parse()
                .map_err(|_| invalid_column("alert_type", &row.alert_type))?,
            severity: row
                .severity
                .parse()
                .map_err(|_| invalid_column("severity", &row.severity))?,
            message: row.message,
            related_transaction_id: row.related_transaction_id,
            requires_manual_action: row.requires_manual_action,
            resolved: row.resolved,
            subject_key: row.subject_key,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

/// Repository for `alerts`
#[cfg(feature = "database")]
pub struct AlertRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl AlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl AlertStore for AlertRepository {
    async fn insert_if_absent(&self, alert: NewAlert) -> Result<Option<AlertRecord>, DatabaseError> {
        // Partial unique index on (alert_type, subject_key) WHERE NOT resolved
        sqlx::query_as::<_, AlertRow>(&format!(
            "INSERT INTO alerts
             (alert_type, severity, message, related_transaction_id, requires_manual_action, subject_key)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (alert_type, subject_key)
                 WHERE resolved = FALSE AND subject_key IS NOT NULL
                 DO NOTHING
             RETURNING {}",
            ALERT_COLUMNS
        ))
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.related_transaction_id)
        .bind(alert.requires_manual_action)
        .bind(&alert.subject_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(AlertRecord::try_from)
        .transpose()
    }

    async fn find_unresolved(
        &self,
        alert_type: AlertType,
        subject_key: &str,
    ) -> Result<Option<AlertRecord>, DatabaseError> {
        sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {} FROM alerts
             WHERE alert_type = $1 AND subject_key = $2 AND resolved = FALSE",
            ALERT_COLUMNS
        ))
        .bind(alert_type.as_str())
        .bind(subject_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(AlertRecord::try_from)
        .transpose()
    }

    async fn list(
        &self,
        unresolved_only: bool,
        limit: i64,
    ) -> Result<Vec<AlertRecord>, DatabaseError> {
        sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {} FROM alerts
             WHERE ($1 = FALSE OR resolved = FALSE)
             ORDER BY created_at DESC
             LIMIT $2",
            ALERT_COLUMNS
        ))
        .bind(unresolved_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .into_iter()
        .map(AlertRecord::try_from)
        .collect()
    }

    async fn resolve(&self, id: Uuid) -> Result<Option<AlertRecord>, DatabaseError> {
        sqlx::query_as::<_, AlertRow>(&format!(
            "UPDATE alerts
             SET resolved = TRUE,
                 resolved_at = COALESCE(resolved_at, NOW())
             WHERE id = $1
             RETURNING {}",
            ALERT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(AlertRecord::try_from)
        .transpose()
    }
}
