//! Best-effort side calls that must never fail a booking operation

use crate::database::booking_repository::BookingTransaction;
use crate::logging::mask_email;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationType {
    BookingProcessing,
    BookingConfirmed,
    BookingCompleted,
    BookingCancelled,
    BookingFailed,
}

#[async_trait]
pub trait BookingNotifier: Send + Sync {
    async fn notify(
        &self,
        tx: &BookingTransaction,
        notification_type: NotificationType,
        message: &str,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait LoyaltyProgram: Send + Sync {
    async fn accrue(&self, tx: &BookingTransaction) -> anyhow::Result<()>;
}

/// Writes notifications to the structured log
pub struct LoggingNotifier;

#[async_trait]
impl BookingNotifier for LoggingNotifier {
    async fn notify(
        &self,
        tx: &BookingTransaction,
        notification_type: NotificationType,
        message: &str,
    ) -> anyhow::Result<()> {
        let recipient = tx.customer_email().map(mask_email).unwrap_or_default();
        match notification_type {
            NotificationType::BookingFailed => {
                error!(
                    transaction_id = %tx.id,
                    reference = %tx.booking_reference,
                    recipient = %recipient,
                    "🔔 NOTIFICATION: Booking Failed - {}", message
                );
            }
            other => {
                info!(
                    transaction_id = %tx.id,
                    reference = %tx.booking_reference,
                    recipient = %recipient,
                    amount = %tx.total_amount,
                    currency = %tx.currency,
                    "🔔 NOTIFICATION: {:?} - {}", other, message
                );
            }
        }
        Ok(())
    }
}

/// Logs accruals; stands in until a loyalty service is wired
pub struct LoggingLoyaltyProgram;

#[async_trait]
impl LoyaltyProgram for LoggingLoyaltyProgram {
    async fn accrue(&self, tx: &BookingTransaction) -> anyhow::Result<()> {
        info!(
            transaction_id = %tx.id,
            amount = %tx.total_amount,
            currency = %tx.currency,
            "loyalty points accrued"
        );
        Ok(())
    }
}

/// Spawns side calls, bounds them by a timeout and swallows their errors
#[derive(Clone)]
pub struct BestEffortHooks {
    notifier: Arc<dyn BookingNotifier>,
    loyalty: Arc<dyn LoyaltyProgram>,
    timeout: Duration,
}

impl BestEffortHooks {
    pub fn new(
        notifier: Arc<dyn BookingNotifier>,
        loyalty: Arc<dyn LoyaltyProgram>,
        timeout: Duration,
    ) -> Self {
        Self {
            notifier,
            loyalty,
            timeout,
        }
    }

    pub fn logging() -> Self {
        Self::new(
            Arc::new(LoggingNotifier),
            Arc::new(LoggingLoyaltyProgram),
            Duration::from_secs(5),
        )
    }

    pub fn notify(
        &self,
        tx: &BookingTransaction,
        notification_type: NotificationType,
        message: impl Into<String>,
    ) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let tx = tx.clone();
        let message = message.into();
        let limit = self.timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(limit, notifier.notify(&tx, notification_type, &message))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(transaction_id = %tx.id, error = %e, "notification failed");
                }
                Err(_) => {
                    warn!(transaction_id = %tx.id, timeout_secs = limit.as_secs(), "notification timed out");
                }
            }
        })
    }

    pub fn accrue_loyalty(&self, tx: &BookingTransaction) -> JoinHandle<()> {
        let loyalty = self.loyalty.clone();
        let tx = tx.clone();
        let limit = self.timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(limit, loyalty.accrue(&tx)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(transaction_id = %tx.id, error = %e, "loyalty accrual failed");
                }
                Err(_) => {
                    warn!(transaction_id = %tx.id, timeout_secs = limit.as_secs(), "loyalty accrual timed out");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentMethod;
    use crate::services::booking_state::BookingStatus;
    use crate::suppliers::types::BookingType;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn booking() -> BookingTransaction {
        BookingTransaction {
            id: Uuid::new_v4(),
            booking_reference: "WF0123456789".to_string(),
            booking_type: BookingType::Flight,
            status: BookingStatus::Completed,
            payment_method: PaymentMethod::Card,
            total_amount: BigDecimal::from(100),
            fund_amount: BigDecimal::from(0),
            card_amount: BigDecimal::from(100),
            currency: "USD".to_string(),
            account_id: None,
            external_payment_ref: Some("pi_1".to_string()),
            supplier_id: "air-1".to_string(),
            supplier_reference: Some("PNR1".to_string()),
            customer: serde_json::json!({ "email": "jane@example.com" }),
            booking_data: serde_json::json!({}),
            line_items: serde_json::json!([]),
            failure_reason: None,
            rollback_required: false,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            confirmed_at: Some(Utc::now()),
            cancelled_at: None,
        }
    }

    struct FailingLoyalty(AtomicUsize);

    #[async_trait]
    impl LoyaltyProgram for FailingLoyalty {
        async fn accrue(&self, _tx: &BookingTransaction) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("loyalty service unavailable")
        }
    }

    struct SlowNotifier;

    #[async_trait]
    impl BookingNotifier for SlowNotifier {
        async fn notify(
            &self,
            _tx: &BookingTransaction,
            _notification_type: NotificationType,
            _message: &str,
        ) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_loyalty_is_swallowed() {
        let loyalty = Arc::new(FailingLoyalty(AtomicUsize::new(0)));
        let hooks = BestEffortHooks::new(
            Arc::new(LoggingNotifier),
            loyalty.clone(),
            Duration::from_secs(1),
        );

        hooks.accrue_loyalty(&booking()).await.unwrap();
        assert_eq!(loyalty.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_notifier_is_bounded_by_timeout() {
        let hooks = BestEffortHooks::new(
            Arc::new(SlowNotifier),
            Arc::new(LoggingLoyaltyProgram),
            Duration::from_millis(50),
        );

        let handle = hooks.notify(&booking(), NotificationType::BookingCompleted, "done");
        assert!(handle.await.is_ok());
    }
}
