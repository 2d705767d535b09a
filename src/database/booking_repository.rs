use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::types::PaymentMethod;
use crate::services::booking_state::BookingStatus;
use crate::suppliers::types::BookingType;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[cfg(feature = "database")]
use sqlx::PgPool;

/// Booking transaction as the rest of the service sees it
#[derive(Debug, Clone, Serialize)]
pub struct BookingTransaction {
    pub id: Uuid,
    pub booking_reference: String,
    pub booking_type: BookingType,
    pub status: BookingStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: BigDecimal,
    pub fund_amount: BigDecimal,
    pub card_amount: BigDecimal,
    pub currency: String,
    pub account_id: Option<String>,
    pub external_payment_ref: Option<String>,
    pub supplier_id: String,
    pub supplier_reference: Option<String>,
    pub customer: JsonValue,
    pub booking_data: JsonValue,
    pub line_items: JsonValue,
    pub failure_reason: Option<String>,
    pub rollback_required: bool,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl BookingTransaction {
    /// Boolean flag stored in `metadata`, false when absent
    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    pub fn customer_email(&self) -> Option<&str> {
        self.customer.get("email").and_then(JsonValue::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct NewBookingTransaction {
    pub id: Uuid,
    pub booking_reference: String,
    pub booking_type: BookingType,
    pub payment_method: PaymentMethod,
    pub total_amount: BigDecimal,
    pub fund_amount: BigDecimal,
    pub card_amount: BigDecimal,
    pub currency: String,
    pub account_id: Option<String>,
    pub supplier_id: String,
    pub customer: JsonValue,
    pub booking_data: JsonValue,
    pub line_items: JsonValue,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// A compare-and-set status change plus the columns that move with it
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub actor: String,
    pub reason: Option<String>,
    /// Only written when the row has no payment ref yet
    pub external_payment_ref: Option<String>,
    pub supplier_reference: Option<String>,
    pub rollback_required: Option<bool>,
    /// Shallow-merged into the existing metadata object
    pub metadata: Option<JsonValue>,
}

impl StatusChange {
    pub fn new(from: BookingStatus, to: BookingStatus, actor: impl Into<String>) -> Self {
        Self {
            from,
            to,
            actor: actor.into(),
            reason: None,
            external_payment_ref: None,
            supplier_reference: None,
            rollback_required: None,
            metadata: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn payment_ref(mut self, payment_ref: impl Into<String>) -> Self {
        self.external_payment_ref = Some(payment_ref.into());
        self
    }

    pub fn supplier_reference(mut self, reference: impl Into<String>) -> Self {
        self.supplier_reference = Some(reference.into());
        self
    }

    pub fn rollback_required(mut self, required: bool) -> Self {
        self.rollback_required = Some(required);
        self
    }

    pub fn metadata(mut self, patch: JsonValue) -> Self {
        self.metadata = Some(patch);
        self
    }

    fn audit_details(&self) -> JsonValue {
        serde_json::json!({
            "reason": self.reason,
            "external_payment_ref": self.external_payment_ref,
            "supplier_reference": self.supplier_reference,
        })
    }
}

/// Column updates that do not move the status
#[derive(Debug, Clone, Default)]
pub struct BookingAnnotation {
    pub failure_reason: Option<String>,
    pub rollback_required: Option<bool>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(BookingTransaction),
    /// Row exists but is no longer in the expected status
    Conflict { current: BookingStatus },
    NotFound,
}

impl TransitionOutcome {
    pub fn applied(self) -> Option<BookingTransaction> {
        match self {
            TransitionOutcome::Applied(tx) => Some(tx),
            _ => None,
        }
    }
}

#[async_trait]
pub trait BookingTransactionStore: Send + Sync {
    async fn create(&self, new: NewBookingTransaction) -> Result<BookingTransaction, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BookingTransaction>, DatabaseError>;

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<BookingTransaction>, DatabaseError>;

    async fn find_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> Result<Option<BookingTransaction>, DatabaseError>;

    /// Applies the change only if the row is still in `change.from`, writing
    /// one `status_transition` audit entry in the same unit of work
    async fn transition(
        &self,
        id: Uuid,
        change: StatusChange,
    ) -> Result<TransitionOutcome, DatabaseError>;

    async fn annotate(
        &self,
        id: Uuid,
        annotation: BookingAnnotation,
    ) -> Result<Option<BookingTransaction>, DatabaseError>;

    /// Rows sitting in one of `statuses` since before `older_than`, oldest first
    async fn find_stale(
        &self,
        statuses: &[BookingStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingTransaction>, DatabaseError>;

    async fn count_in_status_since(
        &self,
        status: BookingStatus,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError>;
}

pub(crate) fn invalid_column(column: &str, value: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::Unknown {
        message: format!("invalid {} value '{}' in storage", column, value),
    })
}

/// Shallow merge of two JSON objects; non-object patches are ignored
pub(crate) fn merge_metadata(base: &mut JsonValue, patch: &JsonValue) {
    if let (Some(base), Some(patch)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            base.insert(key.clone(), value.clone());
        }
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[cfg(feature = "database")]
const BOOKING_COLUMNS: &str = "id, booking_reference, booking_type, status, payment_method, \
     total_amount, fund_amount, card_amount, currency, account_id, external_payment_ref, \
     supplier_id, supplier_reference, customer, booking_data, line_items, failure_reason, \
     rollback_required, metadata, created_at, updated_at, confirmed_at, cancelled_at";

#[cfg(feature = "database")]
#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    booking_reference: String,
    booking_type: String,
    status: String,
    payment_method: String,
    total_amount: BigDecimal,
    fund_amount: BigDecimal,
    card_amount: BigDecimal,
    currency: String,
    account_id: Option<String>,
    external_payment_ref: Option<String>,
    supplier_id: String,
    supplier_reference: Option<String>,
    customer: JsonValue,
    booking_data: JsonValue,
    line_items: JsonValue,
    failure_reason: Option<String>,
    rollback_required: bool,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "database")]
impl TryFrom<BookingRow> for BookingTransaction {
    type Error = DatabaseError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let booking_type = row
            .booking_type
            .parse::<BookingType>()
            .map_err(|_| invalid_column("booking_type", &row.booking_type))?;
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|_| invalid_column("status", &row.status))?;
        let payment_method = row
            .payment_method
            .parse::<PaymentMethod>()
            .map_err(|_| invalid_column("payment_method", &row.payment_method))?;

        Ok(BookingTransaction {
            id: row.id,
            booking_reference: row.booking_reference,
            booking_type,
            status,
            payment_method,
            total_amount: row.total_amount,
            fund_amount: row.fund_amount,
            card_amount: row.card_amount,
            currency: row.currency,
            account_id: row.account_id,
            external_payment_ref: row.external_payment_ref,
            supplier_id: row.supplier_id,
            supplier_reference: row.supplier_reference,
            customer: row.customer,
            booking_data: row.booking_data,
            line_items: row.line_items,
            failure_reason: row.failure_reason,
            rollback_required: row.rollback_required,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            confirmed_at: row.confirmed_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

/// Repository for `booking_transactions`
#[cfg(feature = "database")]
pub struct BookingTransactionRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl BookingTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<BookingTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM booking_transactions WHERE {} = $1",
            BOOKING_COLUMNS, column
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(BookingTransaction::try_from)
            .transpose()
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl BookingTransactionStore for BookingTransactionRepository {
    async fn create(&self, new: NewBookingTransaction) -> Result<BookingTransaction, DatabaseError> {
        let sql = format!(
            "INSERT INTO booking_transactions
             (id, booking_reference, booking_type, status, payment_method, total_amount,
              fund_amount, card_amount, currency, account_id, supplier_id, customer,
              booking_data, line_items, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, 'initiated', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
             RETURNING {}",
            BOOKING_COLUMNS
        );
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(new.id)
            .bind(&new.booking_reference)
            .bind(new.booking_type.as_str())
            .bind(new.payment_method.as_str())
            .bind(&new.total_amount)
            .bind(&new.fund_amount)
            .bind(&new.card_amount)
            .bind(&new.currency)
            .bind(&new.account_id)
            .bind(&new.supplier_id)
            .bind(&new.customer)
            .bind(&new.booking_data)
            .bind(&new.line_items)
            .bind(&new.metadata)
            .bind(new.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        BookingTransaction::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BookingTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM booking_transactions WHERE id = $1",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(BookingTransaction::try_from)
            .transpose()
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<BookingTransaction>, DatabaseError> {
        self.find_one("booking_reference", reference).await
    }

    async fn find_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> Result<Option<BookingTransaction>, DatabaseError> {
        self.find_one("external_payment_ref", payment_ref).await
    }

    async fn transition(
        &self,
        id: Uuid,
        change: StatusChange,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let mut db_tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let sql = format!(
            "UPDATE booking_transactions
             SET status = $3,
                 external_payment_ref = COALESCE(external_payment_ref, $4),
                 supplier_reference = COALESCE($5, supplier_reference),
                 failure_reason = COALESCE($6, failure_reason),
                 rollback_required = COALESCE($7, rollback_required),
                 metadata = metadata || COALESCE($8, '{{}}'::jsonb),
                 confirmed_at = CASE WHEN $3 = 'confirmed' THEN NOW() ELSE confirmed_at END,
                 cancelled_at = CASE WHEN $3 = 'cancelled' THEN NOW() ELSE cancelled_at END,
                 updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {}",
            BOOKING_COLUMNS
        );
        let updated = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .bind(change.from.as_str())
            .bind(change.to.as_str())
            .bind(&change.external_payment_ref)
            .bind(&change.supplier_reference)
            .bind(&change.reason)
            .bind(change.rollback_required)
            .bind(&change.metadata)
            .fetch_optional(&mut *db_tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let Some(row) = updated else {
            db_tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM booking_transactions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(DatabaseError::from_sqlx)?;
            return match current {
                Some((status,)) => Ok(TransitionOutcome::Conflict {
                    current: status
                        .parse()
                        .map_err(|_| invalid_column("status", &status))?,
                }),
                None => Ok(TransitionOutcome::NotFound),
            };
        };

        sqlx::query(
            "INSERT INTO audit_log (subject, action, actor, from_status, to_status, details)
             VALUES ($1, 'status_transition', $2, $3, $4, $5)",
        )
        .bind(id.to_string())
        .bind(&change.actor)
        .bind(change.from.as_str())
        .bind(change.to.as_str())
        .bind(change.audit_details())
        .execute(&mut *db_tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        db_tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(TransitionOutcome::Applied(BookingTransaction::try_from(row)?))
    }

    async fn annotate(
        &self,
        id: Uuid,
        annotation: BookingAnnotation,
    ) -> Result<Option<BookingTransaction>, DatabaseError> {
        let sql = format!(
            "UPDATE booking_transactions
             SET failure_reason = COALESCE($2, failure_reason),
                 rollback_required = COALESCE($3, rollback_required),
                 metadata = metadata || COALESCE($4, '{{}}'::jsonb)
             WHERE id = $1
             RETURNING {}",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .bind(&annotation.failure_reason)
            .bind(annotation.rollback_required)
            .bind(&annotation.metadata)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(BookingTransaction::try_from)
            .transpose()
    }

    async fn find_stale(
        &self,
        statuses: &[BookingStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingTransaction>, DatabaseError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "SELECT {} FROM booking_transactions
             WHERE status = ANY($1) AND updated_at < $2
             ORDER BY updated_at ASC
             LIMIT $3",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(&statuses)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(BookingTransaction::try_from)
            .collect()
    }

    async fn count_in_status_since(
        &self,
        status: BookingStatus,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM booking_transactions WHERE status = $1 AND updated_at >= $2",
        )
        .bind(status.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(count)
    }
}
