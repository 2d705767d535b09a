use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;
use crate::database::idempotency_repository::{IdempotencyLedger, IdempotencyLedgerEntry};
use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessor};

/// Delay before the next replay, indexed by settled attempts
const BACKOFF_SCHEDULE_SECS: [u64; 6] = [0, 10, 30, 120, 300, 600];

pub fn backoff_delay(attempts: i32) -> Duration {
    let index = usize::try_from(attempts.max(0))
        .unwrap_or(0)
        .min(BACKOFF_SCHEDULE_SECS.len() - 1);
    Duration::from_secs(BACKOFF_SCHEDULE_SECS[index])
}

pub fn is_ready_for_retry(entry: &IdempotencyLedgerEntry, now: DateTime<Utc>) -> bool {
    if entry.processed || entry.lease_active(now) {
        return false;
    }
    match entry.last_attempt_at {
        None => true,
        Some(last) => {
            let delay = chrono::Duration::from_std(backoff_delay(entry.processing_attempts))
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
            now >= last + delay
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub replayed: usize,
    pub failed: usize,
    pub not_due: usize,
}

pub struct WebhookRetryWorker {
    ledger: Arc<dyn IdempotencyLedger>,
    processor: Arc<WebhookProcessor>,
    interval: Duration,
    max_attempts: i32,
    batch_size: i64,
}

impl WebhookRetryWorker {
    pub fn new(
        ledger: Arc<dyn IdempotencyLedger>,
        processor: Arc<WebhookProcessor>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            ledger,
            processor,
            interval: config.retry_interval,
            max_attempts: config.max_attempts,
            batch_size: config.retry_batch_size,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_attempts = self.max_attempts,
            "webhook retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("webhook retry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.retry_pending().await {
                        Ok(report) if report.replayed > 0 || report.failed > 0 => {
                            info!(
                                replayed = report.replayed,
                                failed = report.failed,
                                "retried pending webhooks"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "failed to retry pending webhooks"),
                    }
                }
            }
        }

        info!("webhook retry worker stopped");
    }

    /// Replays due ledger entries through the normal admission path
    pub async fn retry_pending(&self) -> anyhow::Result<RetryReport> {
        let pending = self
            .ledger
            .pending_retries(self.max_attempts, self.batch_size)
            .await?;

        let now = Utc::now();
        let mut report = RetryReport::default();

        for entry in pending {
            if !is_ready_for_retry(&entry, now) {
                report.not_due += 1;
                continue;
            }

            match self.processor.replay(&entry).await {
                Ok(WebhookOutcome::Processed { .. }) | Ok(WebhookOutcome::Duplicate { .. }) => {
                    report.replayed += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        event_id = %entry.event_id,
                        attempts = entry.processing_attempts + 1,
                        error = %e,
                        "webhook replay failed"
                    );
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(attempts: i32, last_attempt_secs_ago: Option<i64>) -> IdempotencyLedgerEntry {
        let now = Utc::now();
        IdempotencyLedgerEntry {
            event_id: "evt_1".to_string(),
            event_type: "payment_intent.succeeded".to_string(),
            payload: json!({}),
            processed: false,
            processing_attempts: attempts,
            last_attempt_at: last_attempt_secs_ago.map(|s| now - chrono::Duration::seconds(s)),
            error_message: Some("no booking for payment handle".to_string()),
            claimed_until: None,
            created_at: now,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(0));
        assert_eq!(backoff_delay(1), Duration::from_secs(10));
        assert_eq!(backoff_delay(2), Duration::from_secs(30));
        assert_eq!(backoff_delay(3), Duration::from_secs(120));
        assert_eq!(backoff_delay(4), Duration::from_secs(300));
        assert_eq!(backoff_delay(5), Duration::from_secs(600));
        assert_eq!(backoff_delay(40), Duration::from_secs(600));
        assert_eq!(backoff_delay(-1), Duration::from_secs(0));
    }

    #[test]
    fn entry_waits_for_its_backoff() {
        let now = Utc::now();
        assert!(!is_ready_for_retry(&entry(1, Some(5)), now));
        assert!(is_ready_for_retry(&entry(1, Some(11)), now));
        assert!(!is_ready_for_retry(&entry(3, Some(60)), now));
        assert!(is_ready_for_retry(&entry(0, None), now));
    }

    #[test]
    fn leased_or_processed_entries_are_not_ready() {
        let now = Utc::now();
        let mut leased = entry(1, Some(600));
        leased.claimed_until = Some(now + chrono::Duration::seconds(60));
        assert!(!is_ready_for_retry(&leased, now));

        let mut processed = entry(1, Some(600));
        processed.processed = true;
        assert!(!is_ready_for_retry(&processed, now));
    }
}
