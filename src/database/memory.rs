//! In-process store with the same compare-and-set and dedup semantics as the
//! PostgreSQL repositories. Backs tests and `SKIP_EXTERNALS` mode.

use crate::database::alert_repository::{AlertRecord, AlertStore, AlertType, NewAlert};
use crate::database::audit_repository::{
    AuditEntry, AuditLog, NewAuditEntry, ACTION_STATUS_TRANSITION,
};
use crate::database::booking_repository::{
    merge_metadata, BookingAnnotation, BookingTransaction, BookingTransactionStore,
    NewBookingTransaction, StatusChange, TransitionOutcome,
};
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::idempotency_repository::{
    Admission, IdempotencyLedger, IdempotencyLedgerEntry,
};
use crate::database::routing_repository::{DemotionReason, SupplierRoutingStore};
use crate::services::booking_state::BookingStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    bookings: HashMap<Uuid, BookingTransaction>,
    ledger: HashMap<String, IdempotencyLedgerEntry>,
    alerts: Vec<AlertRecord>,
    audit: Vec<AuditEntry>,
    routing: HashMap<String, DemotionReason>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(120))
}

// ============================================================================
// Bookings
// ============================================================================

#[async_trait]
impl BookingTransactionStore for InMemoryStore {
    async fn create(&self, new: NewBookingTransaction) -> Result<BookingTransaction, DatabaseError> {
        let mut state = self.state.write().await;

        if state.bookings.contains_key(&new.id) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "booking_transactions_pkey".to_string(),
            }));
        }
        if state
            .bookings
            .values()
            .any(|tx| tx.booking_reference == new.booking_reference)
        {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "booking_transactions_booking_reference_key".to_string(),
            }));
        }

        let tx = BookingTransaction {
            id: new.id,
            booking_reference: new.booking_reference,
            booking_type: new.booking_type,
            status: BookingStatus::Initiated,
            payment_method: new.payment_method,
            total_amount: new.total_amount,
            fund_amount: new.fund_amount,
            card_amount: new.card_amount,
            currency: new.currency,
            account_id: new.account_id,
            external_payment_ref: None,
            supplier_id: new.supplier_id,
            supplier_reference: None,
            customer: new.customer,
            booking_data: new.booking_data,
            line_items: new.line_items,
            failure_reason: None,
            rollback_required: false,
            metadata: new.metadata,
            created_at: new.created_at,
            updated_at: new.created_at,
            confirmed_at: None,
            cancelled_at: None,
        };
        state.bookings.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BookingTransaction>, DatabaseError> {
        Ok(self.state.read().await.bookings.get(&id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<BookingTransaction>, DatabaseError> {
        Ok(self
            .state
            .read()
            .await
            .bookings
            .values()
            .find(|tx| tx.booking_reference == reference)
            .cloned())
    }

    async fn find_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> Result<Option<BookingTransaction>, DatabaseError> {
        Ok(self
            .state
            .read()
            .await
            .bookings
            .values()
            .find(|tx| tx.external_payment_ref.as_deref() == Some(payment_ref))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        change: StatusChange,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let Some(tx) = state.bookings.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if tx.status != change.from {
            return Ok(TransitionOutcome::Conflict { current: tx.status });
        }

        tx.status = change.to;
        if tx.external_payment_ref.is_none() {
            tx.external_payment_ref = change.external_payment_ref.clone();
        }
        if let Some(reference) = &change.supplier_reference {
            tx.supplier_reference = Some(reference.clone());
        }
        if let Some(reason) = &change.reason {
            tx.failure_reason = Some(reason.clone());
        }
        if let Some(required) = change.rollback_required {
            tx.rollback_required = required;
        }
        if let Some(patch) = &change.metadata {
            merge_metadata(&mut tx.metadata, patch);
        }
        match change.to {
            BookingStatus::Confirmed => tx.confirmed_at = Some(now),
            BookingStatus::Cancelled => tx.cancelled_at = Some(now),
            _ => {}
        }
        tx.updated_at = now;
        let updated = tx.clone();

        state.audit.push(AuditEntry {
            id: Uuid::new_v4(),
            subject: id.to_string(),
            action: ACTION_STATUS_TRANSITION.to_string(),
            actor: change.actor.clone(),
            from_status: Some(change.from.as_str().to_string()),
            to_status: Some(change.to.as_str().to_string()),
            details: serde_json::json!({
                "reason": change.reason,
                "external_payment_ref": change.external_payment_ref,
                "supplier_reference": change.supplier_reference,
            }),
            created_at: now,
        });

        Ok(TransitionOutcome::Applied(updated))
    }

    async fn annotate(
        &self,
        id: Uuid,
        annotation: BookingAnnotation,
    ) -> Result<Option<BookingTransaction>, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(tx) = state.bookings.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(reason) = annotation.failure_reason {
            tx.failure_reason = Some(reason);
        }
        if let Some(required) = annotation.rollback_required {
            tx.rollback_required = required;
        }
        if let Some(patch) = &annotation.metadata {
            merge_metadata(&mut tx.metadata, patch);
        }
        Ok(Some(tx.clone()))
    }

    async fn find_stale(
        &self,
        statuses: &[BookingStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingTransaction>, DatabaseError> {
        let state = self.state.read().await;
        let mut stale: Vec<BookingTransaction> = state
            .bookings
            .values()
            .filter(|tx| statuses.contains(&tx.status) && tx.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|tx| tx.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn count_in_status_since(
        &self,
        status: BookingStatus,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .bookings
            .values()
            .filter(|tx| tx.status == status && tx.updated_at >= since)
            .count() as i64)
    }
}

// ============================================================================
// Idempotency ledger
// ============================================================================

#[async_trait]
impl IdempotencyLedger for InMemoryStore {
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &JsonValue,
        lease: Duration,
    ) -> Result<Admission, DatabaseError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let Some(entry) = state.ledger.get_mut(event_id) else {
            let entry = IdempotencyLedgerEntry {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                payload: payload.clone(),
                processed: false,
                processing_attempts: 0,
                last_attempt_at: None,
                error_message: None,
                claimed_until: Some(lease_deadline(now, lease)),
                created_at: now,
            };
            state.ledger.insert(event_id.to_string(), entry.clone());
            return Ok(Admission::Owner(entry));
        };

        if entry.processed {
            return Ok(Admission::AlreadyProcessed(entry.clone()));
        }
        if entry.lease_active(now) {
            return Ok(Admission::InFlight(entry.clone()));
        }
        entry.claimed_until = Some(lease_deadline(now, lease));
        Ok(Admission::Retry(entry.clone()))
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        if let Some(entry) = state.ledger.get_mut(event_id) {
            if !entry.processed {
                entry.processed = true;
                entry.processing_attempts += 1;
                entry.last_attempt_at = Some(Utc::now());
                entry.error_message = None;
                entry.claimed_until = None;
            }
        }
        Ok(())
    }

    async fn record_failure(&self, event_id: &str, error: &str) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        if let Some(entry) = state.ledger.get_mut(event_id) {
            if !entry.processed {
                entry.processing_attempts += 1;
                entry.last_attempt_at = Some(Utc::now());
                entry.error_message = Some(error.to_string());
                entry.claimed_until = None;
            }
        }
        Ok(())
    }

    async fn pending_retries(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<IdempotencyLedgerEntry>, DatabaseError> {
        let state = self.state.read().await;
        let now = Utc::now();
        let mut pending: Vec<IdempotencyLedgerEntry> = state
            .ledger
            .values()
            .filter(|entry| {
                !entry.processed
                    && entry.processing_attempts < max_attempts
                    && !entry.lease_active(now)
            })
            .cloned()
            .collect();
        // NULLS FIRST, like the SQL ordering
        pending.sort_by_key(|entry| entry.last_attempt_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn find(&self, event_id: &str) -> Result<Option<IdempotencyLedgerEntry>, DatabaseError> {
        Ok(self.state.read().await.ledger.get(event_id).cloned())
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn insert_if_absent(&self, alert: NewAlert) -> Result<Option<AlertRecord>, DatabaseError> {
        let mut state = self.state.write().await;

        if let Some(subject) = &alert.subject_key {
            let duplicate = state.alerts.iter().any(|existing| {
                !existing.resolved
                    && existing.alert_type == alert.alert_type
                    && existing.subject_key.as_ref() == Some(subject)
            });
            if duplicate {
                return Ok(None);
            }
        }

        let record = AlertRecord {
            id: Uuid::new_v4(),
            alert_type: alert.alert_type,
            severity: alert.severity,
            message: alert.message,
            related_transaction_id: alert.related_transaction_id,
            requires_manual_action: alert.requires_manual_action,
            resolved: false,
            subject_key: alert.subject_key,
            created_at: Utc::now(),
            resolved_at: None,
        };
        state.alerts.push(record.clone());
        Ok(Some(record))
    }

    async fn find_unresolved(
        &self,
        alert_type: AlertType,
        subject_key: &str,
    ) -> Result<Option<AlertRecord>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .iter()
            .find(|alert| {
                !alert.resolved
                    && alert.alert_type == alert_type
                    && alert.subject_key.as_deref() == Some(subject_key)
            })
            .cloned())
    }

    async fn list(
        &self,
        unresolved_only: bool,
        limit: i64,
    ) -> Result<Vec<AlertRecord>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .iter()
            .rev()
            .filter(|alert| !unresolved_only || !alert.resolved)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn resolve(&self, id: Uuid) -> Result<Option<AlertRecord>, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(alert) = state.alerts.iter_mut().find(|alert| alert.id == id) else {
            return Ok(None);
        };
        if !alert.resolved {
            alert.resolved = true;
            alert.resolved_at = Some(Utc::now());
        }
        Ok(Some(alert.clone()))
    }
}

// ============================================================================
// Audit log
// ============================================================================

#[async_trait]
impl AuditLog for InMemoryStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, DatabaseError> {
        let record = AuditEntry {
            id: Uuid::new_v4(),
            subject: entry.subject,
            action: entry.action,
            actor: entry.actor,
            from_status: entry.from_status,
            to_status: entry.to_status,
            details: entry.details,
            created_at: Utc::now(),
        };
        self.state.write().await.audit.push(record.clone());
        Ok(record)
    }

    async fn list_for_subject(&self, subject: &str) -> Result<Vec<AuditEntry>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .filter(|entry| entry.subject == subject)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Supplier routing
// ============================================================================

#[async_trait]
impl SupplierRoutingStore for InMemoryStore {
    async fn demote(
        &self,
        supplier_id: &str,
        reason: DemotionReason,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        if state.routing.contains_key(supplier_id) {
            return Ok(false);
        }
        state.routing.insert(supplier_id.to_string(), reason);
        Ok(true)
    }

    async fn restore(&self, supplier_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.state.write().await.routing.remove(supplier_id).is_some())
    }

    async fn demoted_suppliers(&self) -> Result<HashSet<String>, DatabaseError> {
        Ok(self.state.read().await.routing.keys().cloned().collect())
    }
}
