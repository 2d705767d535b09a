use crate::database::error::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

#[cfg(feature = "database")]
use sqlx::PgPool;

/// One row per inbound payment-provider event
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct IdempotencyLedgerEntry {
    pub event_id: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub processed: bool,
    pub processing_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Processing lease; `None` when no attempt is running
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyLedgerEntry {
    pub fn lease_active(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Result of trying to take ownership of an event
#[derive(Debug, Clone)]
pub enum Admission {
    /// First delivery; the caller inserted the row and holds the lease
    Owner(IdempotencyLedgerEntry),
    /// Earlier attempt failed and the lease was free; the caller now holds it
    Retry(IdempotencyLedgerEntry),
    AlreadyProcessed(IdempotencyLedgerEntry),
    /// Another attempt holds the lease
    InFlight(IdempotencyLedgerEntry),
}

impl Admission {
    pub fn entry(&self) -> &IdempotencyLedgerEntry {
        match self {
            Admission::Owner(entry)
            | Admission::Retry(entry)
            | Admission::AlreadyProcessed(entry)
            | Admission::InFlight(entry) => entry,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Owner(_) | Admission::Retry(_))
    }
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Unique insert of the event id, falling back to a lease claim on an
    /// unprocessed row
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &JsonValue,
        lease: Duration,
    ) -> Result<Admission, DatabaseError>;

    async fn mark_processed(&self, event_id: &str) -> Result<(), DatabaseError>;

    async fn record_failure(&self, event_id: &str, error: &str) -> Result<(), DatabaseError>;

    /// Unprocessed rows below `max_attempts` whose lease has been released
    async fn pending_retries(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<IdempotencyLedgerEntry>, DatabaseError>;

    async fn find(&self, event_id: &str) -> Result<Option<IdempotencyLedgerEntry>, DatabaseError>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[cfg(feature = "database")]
const LEDGER_COLUMNS: &str = "event_id, event_type, payload, processed, processing_attempts, \
     last_attempt_at, error_message, claimed_until, created_at";

/// Repository for `idempotency_ledger`
#[cfg(feature = "database")]
pub struct IdempotencyLedgerRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl IdempotencyLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl IdempotencyLedger for IdempotencyLedgerRepository {
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &JsonValue,
        lease: Duration,
    ) -> Result<Admission, DatabaseError> {
        let lease_secs = lease.as_secs_f64();

        let inserted = sqlx::query_as::<_, IdempotencyLedgerEntry>(&format!(
            "INSERT INTO idempotency_ledger
             (event_id, event_type, payload, processed, processing_attempts, claimed_until)
             VALUES ($1, $2, $3, FALSE, 0, NOW() + make_interval(secs => $4))
             ON CONFLICT (event_id) DO NOTHING
             RETURNING {}",
            LEDGER_COLUMNS
        ))
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .bind(lease_secs)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(entry) = inserted {
            return Ok(Admission::Owner(entry));
        }

        let claimed = sqlx::query_as::<_, IdempotencyLedgerEntry>(&format!(
            "UPDATE idempotency_ledger
             SET claimed_until = NOW() + make_interval(secs => $2)
             WHERE event_id = $1
               AND processed = FALSE
               AND (claimed_until IS NULL OR claimed_until < NOW())
             RETURNING {}",
            LEDGER_COLUMNS
        ))
        .bind(event_id)
        .bind(lease_secs)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(entry) = claimed {
            return Ok(Admission::Retry(entry));
        }

        let existing = self
            .find(event_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("idempotency_ledger", event_id))?;

        if existing.processed {
            Ok(Admission::AlreadyProcessed(existing))
        } else {
            Ok(Admission::InFlight(existing))
        }
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE idempotency_ledger
             SET processed = TRUE,
                 processing_attempts = processing_attempts + 1,
                 last_attempt_at = NOW(),
                 error_message = NULL,
                 claimed_until = NULL
             WHERE event_id = $1 AND processed = FALSE",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    async fn record_failure(&self, event_id: &str, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE idempotency_ledger
             SET processing_attempts = processing_attempts + 1,
                 last_attempt_at = NOW(),
                 error_message = $2,
                 claimed_until = NULL
             WHERE event_id = $1 AND processed = FALSE",
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    async fn pending_retries(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<IdempotencyLedgerEntry>, DatabaseError> {
        sqlx::query_as::<_, IdempotencyLedgerEntry>(&format!(
            "SELECT {} FROM idempotency_ledger
             WHERE processed = FALSE
               AND processing_attempts < $1
               AND (claimed_until IS NULL OR claimed_until < NOW())
             ORDER BY last_attempt_at ASC NULLS FIRST
             LIMIT $2",
            LEDGER_COLUMNS
        ))
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find(&self, event_id: &str) -> Result<Option<IdempotencyLedgerEntry>, DatabaseError> {
        sqlx::query_as::<_, IdempotencyLedgerEntry>(&format!(
            "SELECT {} FROM idempotency_ledger WHERE event_id = $1",
            LEDGER_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
