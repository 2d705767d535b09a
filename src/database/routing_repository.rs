use crate::database::error::DatabaseError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[cfg(feature = "database")]
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DemotionReason {
    Degradation,
    Quota,
}

impl DemotionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemotionReason::Degradation => "degradation",
            DemotionReason::Quota => "quota",
        }
    }
}

/// Supplier demotions applied by failover and quota rotation
#[async_trait]
pub trait SupplierRoutingStore: Send + Sync {
    /// Returns false when the supplier was already demoted
    async fn demote(&self, supplier_id: &str, reason: DemotionReason)
        -> Result<bool, DatabaseError>;

    /// Returns false when the supplier was not demoted
    async fn restore(&self, supplier_id: &str) -> Result<bool, DatabaseError>;

    async fn demoted_suppliers(&self) -> Result<HashSet<String>, DatabaseError>;
}

/// Repository for `supplier_routing`
#[cfg(feature = "database")]
pub struct SupplierRoutingRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl SupplierRoutingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl SupplierRoutingStore for SupplierRoutingRepository {
    async fn demote(
        &self,
        supplier_id: &str,
        reason: DemotionReason,
    ) -> Result<bool, DatabaseError> {
        let changed: Option<(String,)> = sqlx::query_as(
            "INSERT INTO supplier_routing (supplier_id, demoted, reason, updated_at)
             VALUES ($1, TRUE, $2, NOW())
             ON CONFLICT (supplier_id) DO UPDATE
                 SET demoted = TRUE, reason = EXCLUDED.reason, updated_at = NOW()
                 WHERE supplier_routing.demoted = FALSE
             RETURNING supplier_id",
        )
        .bind(supplier_id)
        .bind(reason.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(changed.is_some())
    }

    async fn restore(&self, supplier_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE supplier_routing
             SET demoted = FALSE, reason = NULL, updated_at = NOW()
             WHERE supplier_id = $1 AND demoted = TRUE",
        )
        .bind(supplier_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn demoted_suppliers(&self) -> Result<HashSet<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT supplier_id FROM supplier_routing WHERE demoted = TRUE")
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
