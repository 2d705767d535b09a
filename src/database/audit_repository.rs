use crate::database::error::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[cfg(feature = "database")]
use sqlx::PgPool;

pub const ACTION_STATUS_TRANSITION: &str = "status_transition";
pub const ACTION_AUTO_EXPIRE: &str = "auto_expire";
pub const ACTION_FAILOVER: &str = "failover";
pub const ACTION_ROTATE: &str = "rotate";
pub const ACTION_RESTORE: &str = "restore";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct AuditEntry {
    pub id: Uuid,
    pub subject: String,
    pub action: String,
    pub actor: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub details: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub subject: String,
    pub action: String,
    pub actor: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub details: JsonValue,
}

impl NewAuditEntry {
    pub fn new(subject: impl Into<String>, action: &str, actor: &str) -> Self {
        Self {
            subject: subject.into(),
            action: action.to_string(),
            actor: actor.to_string(),
            from_status: None,
            to_status: None,
            details: serde_json::json!({}),
        }
    }

    pub fn statuses(mut self, from: impl ToString, to: impl ToString) -> Self {
        self.from_status = Some(from.to_string());
        self.to_status = Some(to.to_string());
        self
    }

    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, DatabaseError>;

    /// Oldest first
    async fn list_for_subject(&self, subject: &str) -> Result<Vec<AuditEntry>, DatabaseError>;
}

/// Repository for `audit_log`
#[cfg(feature = "database")]
pub struct AuditLogRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl AuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl AuditLog for AuditLogRepository {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, DatabaseError> {
        sqlx::query_as::<_, AuditEntry>(
            "INSERT INTO audit_log (subject, action, actor, from_status, to_status, details)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, subject, action, actor, from_status, to_status, details, created_at",
        )
        .bind(&entry.subject)
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(&entry.from_status)
        .bind(&entry.to_status)
        .bind(&entry.details)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_for_subject(&self, subject: &str) -> Result<Vec<AuditEntry>, DatabaseError> {
        sqlx::query_as::<_, AuditEntry>(
            "SELECT id, subject, action, actor, from_status, to_status, details, created_at
             FROM audit_log
             WHERE subject = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(subject)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
