use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::database::alert_repository::{AlertSeverity, AlertType, NewAlert};
use crate::database::audit_repository::{
    AuditLog, NewAuditEntry, ACTION_AUTO_EXPIRE, ACTION_FAILOVER, ACTION_RESTORE, ACTION_ROTATE,
};
use crate::database::booking_repository::BookingTransactionStore;
use crate::database::error::DatabaseError;
use crate::database::routing_repository::{DemotionReason, SupplierRoutingStore};
use crate::database::Stores;
use crate::error::AppError;
use crate::services::alerting::{AlertService, RaiseOutcome};
use crate::services::booking_orchestrator::{
    BookingOrchestrator, ExpireOutcome, ACTOR_TRIGGER_ENGINE,
};
use crate::services::booking_state::BookingStatus;
use crate::suppliers::health::ProviderHealthSource;
use crate::suppliers::types::{ProviderHealthSample, ProviderHealthStatus};

// ---------------------------------------------------------------------------
// Custom error type
// ---------------------------------------------------------------------------

/// Failures that abort a whole evaluation cycle. Per-transaction and
/// per-supplier failures are logged and counted instead.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("invalid trigger configuration: {0}")]
    Config(String),
}

impl From<TriggerError> for AppError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Database(e) => e.into(),
            TriggerError::Config(message) => AppError::new(crate::error::AppErrorKind::Infrastructure(
                crate::error::InfrastructureError::Configuration { message },
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TriggerEngineConfig {
    /// How often the worker re-evaluates every trigger.
    pub interval: Duration,
    /// `initiated`/`payment_processing` rows untouched for this long are stuck.
    pub stuck_age: Duration,
    /// Minimum number of stuck rows before the trigger fires.
    pub stuck_threshold: usize,
    /// Maximum stuck rows loaded (and expired) per cycle.
    pub stuck_batch_size: i64,
    /// Trailing window for the payment failure spike.
    pub failure_window: Duration,
    pub failure_threshold: i64,
    /// Supplier usage ratio at or above which quota rotation kicks in.
    pub quota_high_water: f64,
}

impl Default for TriggerEngineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stuck_age: Duration::from_secs(900),
            stuck_threshold: 5,
            stuck_batch_size: 200,
            failure_window: Duration::from_secs(900),
            failure_threshold: 10,
            quota_high_water: 0.9,
        }
    }
}

impl TriggerEngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("TRIGGER_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.stuck_age = Duration::from_secs(
            std::env::var("TRIGGER_STUCK_AGE_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.stuck_age.as_secs()),
        );
        cfg.stuck_threshold = std::env::var("TRIGGER_STUCK_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(cfg.stuck_threshold);
        cfg.stuck_batch_size = std::env::var("TRIGGER_STUCK_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.stuck_batch_size);
        cfg.failure_window = Duration::from_secs(
            std::env::var("TRIGGER_FAILURE_WINDOW_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.failure_window.as_secs()),
        );
        cfg.failure_threshold = std::env::var("TRIGGER_FAILURE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.failure_threshold);
        cfg.quota_high_water = std::env::var("TRIGGER_QUOTA_HIGH_WATER")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(cfg.quota_high_water);
        cfg
    }

    pub fn validate(&self) -> Result<(), TriggerError> {
        if self.interval.is_zero() {
            return Err(TriggerError::Config("TRIGGER_INTERVAL_SECONDS cannot be 0".into()));
        }
        if self.stuck_threshold == 0 || self.failure_threshold <= 0 {
            return Err(TriggerError::Config("trigger thresholds must be positive".into()));
        }
        if !(self.quota_high_water > 0.0 && self.quota_high_water <= 1.0) {
            return Err(TriggerError::Config(
                "TRIGGER_QUOTA_HIGH_WATER must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// What one evaluation did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub alerts_raised: usize,
    pub alerts_deduplicated: usize,
    pub expired: usize,
    pub expiry_skipped: usize,
    pub demoted: usize,
    pub restored: usize,
}

impl CycleReport {
    fn count_alert(&mut self, outcome: Option<RaiseOutcome>) {
        match outcome {
            Some(RaiseOutcome::Created(_)) => self.alerts_raised += 1,
            Some(RaiseOutcome::Deduplicated) => self.alerts_deduplicated += 1,
            None => {}
        }
    }

    fn merge(&mut self, other: CycleReport) {
        self.alerts_raised += other.alerts_raised;
        self.alerts_deduplicated += other.alerts_deduplicated;
        self.expired += other.expired;
        self.expiry_skipped += other.expiry_skipped;
        self.demoted += other.demoted;
        self.restored += other.restored;
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct TriggerEngine {
    bookings: Arc<dyn BookingTransactionStore>,
    audit: Arc<dyn AuditLog>,
    routing: Arc<dyn SupplierRoutingStore>,
    alerts: AlertService,
    orchestrator: Arc<BookingOrchestrator>,
    health: Option<Arc<dyn ProviderHealthSource>>,
    config: TriggerEngineConfig,
}

impl TriggerEngine {
    pub fn new(
        stores: &Stores,
        orchestrator: Arc<BookingOrchestrator>,
        health: Option<Arc<dyn ProviderHealthSource>>,
        config: TriggerEngineConfig,
    ) -> Self {
        Self {
            bookings: stores.bookings.clone(),
            audit: stores.audit.clone(),
            routing: stores.routing.clone(),
            alerts: AlertService::new(stores.alerts.clone()),
            orchestrator,
            health,
            config,
        }
    }

    pub fn config(&self) -> &TriggerEngineConfig {
        &self.config
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stuck_age_secs = self.config.stuck_age.as_secs(),
            stuck_threshold = self.config.stuck_threshold,
            failure_threshold = self.config.failure_threshold,
            has_health_feed = self.health.is_some(),
            "trigger engine started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("trigger engine stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "trigger engine cycle failed");
                    }
                }
            }
        }

        info!("trigger engine stopped");
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let report = self.evaluate().await?;
        if report != CycleReport::default() {
            info!(
                alerts_raised = report.alerts_raised,
                expired = report.expired,
                demoted = report.demoted,
                restored = report.restored,
                "trigger engine cycle complete"
            );
        } else {
            debug!("trigger engine cycle: nothing to do");
        }
        Ok(())
    }

    /// Evaluates every trigger once and applies the remedies
    pub async fn evaluate(&self) -> Result<CycleReport, TriggerError> {
        let mut report = CycleReport::default();
        report.merge(self.check_stuck_transactions().await?);
        report.merge(self.check_payment_failures().await?);
        report.merge(self.check_supplier_health().await?);
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Stuck transactions
    // -----------------------------------------------------------------------

    async fn check_stuck_transactions(&self) -> Result<CycleReport, TriggerError> {
        let mut report = CycleReport::default();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stuck_age)
                .unwrap_or_else(|_| chrono::Duration::seconds(900));

        let stuck = self
            .bookings
            .find_stale(
                &[BookingStatus::Initiated, BookingStatus::PaymentProcessing],
                cutoff,
                self.config.stuck_batch_size,
            )
            .await?;

        if stuck.len() < self.config.stuck_threshold {
            return Ok(report);
        }

        let outcome = self
            .alerts
            .raise_logged(
                NewAlert::new(
                    AlertType::StuckTransactions,
                    AlertSeverity::Critical,
                    format!(
                        "{} bookings stalled in initiated/payment_processing for over {}s",
                        stuck.len(),
                        self.config.stuck_age.as_secs()
                    ),
                )
                .subject("stuck_transactions"),
            )
            .await;
        report.count_alert(outcome);

        for tx in stuck {
            match self.orchestrator.expire(&tx).await {
                Ok(ExpireOutcome::Expired(expired)) => {
                    report.expired += 1;
                    let entry = NewAuditEntry::new(
                        expired.id.to_string(),
                        ACTION_AUTO_EXPIRE,
                        ACTOR_TRIGGER_ENGINE,
                    )
                    .statuses(tx.status, BookingStatus::Expired)
                    .details(serde_json::json!({
                        "booking_reference": expired.booking_reference,
                        "stale_since": tx.updated_at,
                    }));
                    if let Err(e) = self.audit.append(entry).await {
                        error!(transaction_id = %tx.id, error = %e, "failed to audit auto-expire");
                    }
                    info!(transaction_id = %tx.id, from = %tx.status, "stuck booking expired");
                }
                Ok(ExpireOutcome::Skipped { reason }) => {
                    report.expiry_skipped += 1;
                    info!(transaction_id = %tx.id, reason = %reason, "stuck booking not expired");
                }
                Err(e) => {
                    report.expiry_skipped += 1;
                    warn!(transaction_id = %tx.id, error = %e, "auto-expire failed");
                }
            }
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Payment failure spike
    // -----------------------------------------------------------------------

    async fn check_payment_failures(&self) -> Result<CycleReport, TriggerError> {
        let mut report = CycleReport::default();
        let since = Utc::now()
            - chrono::Duration::from_std(self.config.failure_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(900));

        let failures = self
            .bookings
            .count_in_status_since(BookingStatus::PaymentFailed, since)
            .await?;

        if failures >= self.config.failure_threshold {
            let outcome = self
                .alerts
                .raise_logged(
                    NewAlert::new(
                        AlertType::PaymentFailureSpike,
                        AlertSeverity::High,
                        format!(
                            "{} payment failures in the last {}s",
                            failures,
                            self.config.failure_window.as_secs()
                        ),
                    )
                    .subject("payment_failed"),
                )
                .await;
            report.count_alert(outcome);
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Supplier degradation / quota exhaustion
    // -----------------------------------------------------------------------

    async fn check_supplier_health(&self) -> Result<CycleReport, TriggerError> {
        let Some(source) = &self.health else {
            return Ok(CycleReport::default());
        };

        let samples = match source.samples().await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "provider health feed unavailable, skipping supplier triggers");
                return Ok(CycleReport::default());
            }
        };

        let demoted = self.routing.demoted_suppliers().await?;

        let results = join_all(
            samples
                .iter()
                .map(|sample| self.evaluate_sample(sample, demoted.contains(&sample.provider_id))),
        )
        .await;

        let mut report = CycleReport::default();
        for result in results {
            match result {
                Ok(sample_report) => report.merge(sample_report),
                Err(e) => warn!(error = %e, "supplier trigger failed"),
            }
        }
        Ok(report)
    }

    async fn evaluate_sample(
        &self,
        sample: &ProviderHealthSample,
        is_demoted: bool,
    ) -> Result<CycleReport, TriggerError> {
        let mut report = CycleReport::default();
        let supplier = sample.provider_id.as_str();
        let subject = format!("supplier:{}", supplier);
        let over_quota = sample
            .usage_ratio
            .map(|ratio| ratio >= self.config.quota_high_water)
            .unwrap_or(false);

        if sample.status == ProviderHealthStatus::Critical {
            let outcome = self
                .alerts
                .raise_logged(
                    NewAlert::new(
                        AlertType::SupplierDegradation,
                        AlertSeverity::High,
                        format!(
                            "Supplier {} is critical ({} consecutive failures)",
                            supplier, sample.consecutive_failures
                        ),
                    )
                    .subject(subject.clone()),
                )
                .await;
            report.count_alert(outcome);

            if self.routing.demote(supplier, DemotionReason::Degradation).await? {
                report.demoted += 1;
                self.audit_routing(supplier, ACTION_FAILOVER, sample).await;
                warn!(supplier = %supplier, "supplier demoted after degradation");
            }
        }

        if over_quota {
            let outcome = self
                .alerts
                .raise_logged(
                    NewAlert::new(
                        AlertType::QuotaExhaustion,
                        AlertSeverity::Critical,
                        format!(
                            "Supplier {} quota at {:.0}% of limit",
                            supplier,
                            sample.usage_ratio.unwrap_or_default() * 100.0
                        ),
                    )
                    .subject(subject.clone()),
                )
                .await;
            report.count_alert(outcome);

            if self.routing.demote(supplier, DemotionReason::Quota).await? {
                report.demoted += 1;
                self.audit_routing(supplier, ACTION_ROTATE, sample).await;
                warn!(supplier = %supplier, "supplier rotated out after quota exhaustion");
            }
        }

        if is_demoted
            && sample.status == ProviderHealthStatus::Healthy
            && !over_quota
            && self.routing.restore(supplier).await?
        {
            report.restored += 1;
            self.audit_routing(supplier, ACTION_RESTORE, sample).await;
            info!(supplier = %supplier, "supplier restored to normal routing");
        }

        Ok(report)
    }

    async fn audit_routing(&self, supplier: &str, action: &str, sample: &ProviderHealthSample) {
        let entry = NewAuditEntry::new(format!("supplier:{}", supplier), action, ACTOR_TRIGGER_ENGINE)
            .details(serde_json::json!({
                "status": sample.status,
                "usage_ratio": sample.usage_ratio,
                "consecutive_failures": sample.consecutive_failures,
                "sampled_at": sample.last_checked_at,
            }));
        if let Err(e) = self.audit.append(entry).await {
            error!(supplier = %supplier, action = %action, error = %e, "failed to audit routing change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TriggerEngineConfig::default().validate().is_ok());
    }

    #[test]
    fn high_water_outside_unit_interval_is_rejected() {
        let config = TriggerEngineConfig {
            quota_high_water: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn report_merge_sums_counters() {
        let mut total = CycleReport {
            expired: 2,
            ..Default::default()
        };
        total.merge(CycleReport {
            expired: 1,
            demoted: 1,
            ..Default::default()
        });
        assert_eq!(total.expired, 3);
        assert_eq!(total.demoted, 1);
    }
}
