//! Integration tests for the trigger engine's triggers and remedies

mod common;

use chrono::Utc;
use common::{booking_request, dec, sample, TestApp};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;

use wayfare_backend::database::alert_repository::{AlertSeverity, AlertType};
use wayfare_backend::database::audit_repository::{
    ACTION_AUTO_EXPIRE, ACTION_FAILOVER, ACTION_RESTORE, ACTION_ROTATE,
};
use wayfare_backend::database::booking_repository::BookingTransaction;
use wayfare_backend::services::booking_state::BookingStatus;
use wayfare_backend::suppliers::types::ProviderHealthStatus;
use wayfare_backend::workers::trigger_engine::{CycleReport, TriggerEngineConfig};

fn stuck_config(threshold: usize) -> TriggerEngineConfig {
    TriggerEngineConfig {
        stuck_age: Duration::ZERO,
        stuck_threshold: threshold,
        ..Default::default()
    }
}

async fn audit_actions(app: &TestApp, subject: &str) -> Vec<String> {
    app.stores
        .audit
        .list_for_subject(subject)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect()
}

// ----------------------------------------------------------------------------
// Stuck transactions
// ----------------------------------------------------------------------------

#[tokio::test]
async fn stuck_bookings_raise_one_alert_and_are_expired() {
    let app = TestApp::with_trigger_config(stuck_config(2));
    let first = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;
    let second = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.alerts_raised, 1);
    assert_eq!(report.expired, 2);
    assert_eq!(report.expiry_skipped, 0);
    assert_eq!(app.payments.void_count(), 2);

    for tx in [&first, &second] {
        let row = app.orchestrator.status(tx.id).await.unwrap();
        assert_eq!(row.status, BookingStatus::Expired);
        assert!(row.flag("handle_voided"));
        assert!(audit_actions(&app, &tx.id.to_string())
            .await
            .contains(&ACTION_AUTO_EXPIRE.to_string()));
    }

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::StuckTransactions);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);

    // Expired rows are no longer stuck
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report, CycleReport::default());
}

#[tokio::test]
async fn repeated_stuck_alert_is_deduplicated_while_unresolved() {
    let app = TestApp::with_trigger_config(stuck_config(1));
    app.orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.alerts_raised, 1);

    app.orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.alerts_raised, 0);
    assert_eq!(report.alerts_deduplicated, 1);
    assert_eq!(report.expired, 1);
}

#[tokio::test]
async fn stuck_bookings_below_threshold_are_left_alone() {
    let app = TestApp::with_trigger_config(stuck_config(5));
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report, CycleReport::default());
    assert_eq!(
        app.orchestrator.status(tx.id).await.unwrap().status,
        BookingStatus::PaymentProcessing
    );
    assert_eq!(app.payments.void_count(), 0);
}

#[tokio::test]
async fn expiring_a_split_booking_credits_the_fund_portion() {
    let app = TestApp::with_trigger_config(stuck_config(1));
    app.funds.set_balance("acct_1", "500");
    let tx = app
        .orchestrator
        .initiate(booking_request("split"))
        .await
        .unwrap()
        .transaction;
    assert_eq!(app.funds.balance("acct_1"), dec("460"));
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.expired, 1);

    let row = app.orchestrator.status(tx.id).await.unwrap();
    assert_eq!(row.status, BookingStatus::Expired);
    assert!(row.flag("fund_credited"));
    assert_eq!(app.funds.balance("acct_1"), dec("500"));
}

#[tokio::test]
async fn failed_void_skips_expiry_and_escalates() {
    let app = TestApp::with_trigger_config(stuck_config(1));
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;
    app.payments.refuse_void.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.expiry_skipped, 1);
    assert_eq!(
        app.orchestrator.status(tx.id).await.unwrap().status,
        BookingStatus::PaymentProcessing
    );

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    let escalation = alerts
        .iter()
        .find(|a| a.subject_key.as_deref() == Some(format!("expire:{}", tx.id).as_str()))
        .expect("expiry escalation alert");
    assert!(escalation.requires_manual_action);
    assert_eq!(escalation.related_transaction_id, Some(tx.id));
}

async fn initiated_rows(app: &TestApp) -> Vec<BookingTransaction> {
    app.stores
        .bookings
        .find_stale(
            &[BookingStatus::Initiated],
            Utc::now() + chrono::Duration::hours(1),
            100,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn six_initiated_bookings_over_threshold_expire_with_one_alert() {
    let app = TestApp::with_trigger_config(stuck_config(5));
    app.funds.set_balance("acct_1", "1000");
    app.funds.hang_debit.store(true, Ordering::SeqCst);
    for _ in 0..6 {
        let err = app
            .orchestrator
            .initiate(booking_request("fund"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 504);
    }
    let stuck = initiated_rows(&app).await;
    assert_eq!(stuck.len(), 6);
    assert_eq!(app.funds.balance("acct_1"), dec("400"));

    app.funds.hang_debit.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.alerts_raised, 1);
    assert_eq!(report.expired, 6);
    assert_eq!(report.expiry_skipped, 0);

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::StuckTransactions);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);

    for tx in &stuck {
        let row = app.orchestrator.status(tx.id).await.unwrap();
        assert_eq!(row.status, BookingStatus::Expired);
        assert!(row.flag("fund_credited"));
        assert!(!row.rollback_required);
    }
    assert_eq!(app.funds.debit_count(), 6);
    assert_eq!(app.funds.credit_count(), 6);
    assert_eq!(app.funds.balance("acct_1"), dec("1000"));
}

#[tokio::test]
async fn unknown_debit_outcome_blocks_expiry_and_escalates() {
    let app = TestApp::with_trigger_config(stuck_config(1));
    app.funds.set_balance("acct_1", "500");
    app.funds.hang_debit.store(true, Ordering::SeqCst);
    app.orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap_err();
    let id = initiated_rows(&app).await[0].id;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.expiry_skipped, 1);

    let row = app.orchestrator.status(id).await.unwrap();
    assert_eq!(row.status, BookingStatus::Initiated);
    assert!(row.rollback_required);
    assert_eq!(app.funds.credit_count(), 0);

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    let escalation = alerts
        .iter()
        .find(|a| a.subject_key.as_deref() == Some(format!("fund_credit:{}", id).as_str()))
        .expect("fund credit escalation alert");
    assert_eq!(escalation.severity, AlertSeverity::Critical);
    assert!(escalation.requires_manual_action);
    assert_eq!(escalation.related_transaction_id, Some(id));
}

#[tokio::test]
async fn split_handle_timeout_is_voided_and_credited_on_expiry() {
    let app = TestApp::with_trigger_config(stuck_config(1));
    app.funds.set_balance("acct_1", "500");
    app.payments.hang_create.store(true, Ordering::SeqCst);

    let err = app
        .orchestrator
        .initiate(booking_request("split"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 504);
    assert_eq!(app.funds.balance("acct_1"), dec("460"));
    assert_eq!(app.funds.credit_count(), 0);
    let id = initiated_rows(&app).await[0].id;

    app.payments.hang_create.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.expired, 1);

    let row = app.orchestrator.status(id).await.unwrap();
    assert_eq!(row.status, BookingStatus::Expired);
    assert!(row.flag("handle_voided"));
    assert!(row.flag("fund_credited"));
    assert_eq!(app.payments.void_count(), 1);
    assert_eq!(app.funds.balance("acct_1"), dec("500"));
}

// ----------------------------------------------------------------------------
// Payment failure spike
// ----------------------------------------------------------------------------

#[tokio::test]
async fn payment_failure_spike_alerts_once_until_resolved() {
    let app = TestApp::with_trigger_config(TriggerEngineConfig {
        failure_threshold: 2,
        ..Default::default()
    });
    for _ in 0..2 {
        app.orchestrator
            .initiate(booking_request("card"))
            .await
            .unwrap();
    }
    for handle in ["pi_test_1", "pi_test_2"] {
        app.orchestrator
            .handle_payment_failed(handle, "card declined")
            .await
            .unwrap();
    }

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.alerts_raised, 1);

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::PaymentFailureSpike);
    assert_eq!(alerts[0].severity, AlertSeverity::High);
    assert_eq!(alerts[0].subject_key.as_deref(), Some("payment_failed"));

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.alerts_raised, 0);
    assert_eq!(report.alerts_deduplicated, 1);

    app.stores.alerts.resolve(alerts[0].id).await.unwrap();
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.alerts_raised, 1);
}

#[tokio::test]
async fn failures_below_threshold_do_not_alert() {
    let app = TestApp::with_trigger_config(TriggerEngineConfig {
        failure_threshold: 3,
        ..Default::default()
    });
    app.orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap();
    app.orchestrator
        .handle_payment_failed("pi_test_1", "card declined")
        .await
        .unwrap();

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.alerts_raised, 0);
    assert!(app.stores.alerts.list(false, 100).await.unwrap().is_empty());
}

// ----------------------------------------------------------------------------
// Supplier degradation and quota
// ----------------------------------------------------------------------------

#[tokio::test]
async fn critical_supplier_is_demoted_once_and_restored_when_healthy() {
    let app = TestApp::new();
    app.health_feed
        .set(vec![sample("skyway", ProviderHealthStatus::Critical, None)]);

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.demoted, 1);
    assert_eq!(report.alerts_raised, 1);
    assert!(app
        .stores
        .routing
        .demoted_suppliers()
        .await
        .unwrap()
        .contains("skyway"));

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    assert_eq!(alerts[0].alert_type, AlertType::SupplierDegradation);
    assert_eq!(alerts[0].subject_key.as_deref(), Some("supplier:skyway"));

    // Same sample again: no second demotion, alert suppressed
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.demoted, 0);
    assert_eq!(report.alerts_deduplicated, 1);

    app.health_feed
        .set(vec![sample("skyway", ProviderHealthStatus::Healthy, None)]);
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.restored, 1);
    assert!(app
        .stores
        .routing
        .demoted_suppliers()
        .await
        .unwrap()
        .is_empty());

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.restored, 0);

    assert_eq!(
        audit_actions(&app, "supplier:skyway").await,
        vec![ACTION_FAILOVER.to_string(), ACTION_RESTORE.to_string()]
    );
}

#[tokio::test]
async fn degraded_but_not_healthy_supplier_stays_demoted() {
    let app = TestApp::new();
    app.health_feed
        .set(vec![sample("skyway", ProviderHealthStatus::Critical, None)]);
    app.triggers.evaluate().await.unwrap();

    app.health_feed
        .set(vec![sample("skyway", ProviderHealthStatus::Degraded, None)]);
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.restored, 0);
    assert!(app
        .stores
        .routing
        .demoted_suppliers()
        .await
        .unwrap()
        .contains("skyway"));
}

#[tokio::test]
async fn quota_exhaustion_rotates_supplier_out() {
    let app = TestApp::new();
    app.health_feed.set(vec![sample(
        "backup-air",
        ProviderHealthStatus::Healthy,
        Some(0.95),
    )]);

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.demoted, 1);
    assert_eq!(report.alerts_raised, 1);

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    assert_eq!(alerts[0].alert_type, AlertType::QuotaExhaustion);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);

    // Usage back under the high-water mark
    app.health_feed.set(vec![sample(
        "backup-air",
        ProviderHealthStatus::Healthy,
        Some(0.4),
    )]);
    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report.restored, 1);

    assert_eq!(
        audit_actions(&app, "supplier:backup-air").await,
        vec![ACTION_ROTATE.to_string(), ACTION_RESTORE.to_string()]
    );
}

#[tokio::test]
async fn unavailable_health_feed_is_skipped() {
    let app = TestApp::new();
    app.health_feed
        .set(vec![sample("skyway", ProviderHealthStatus::Critical, None)]);
    app.health_feed.down.store(true, Ordering::SeqCst);

    let report = app.triggers.evaluate().await.unwrap();
    assert_eq!(report, CycleReport::default());
    assert!(app
        .stores
        .routing
        .demoted_suppliers()
        .await
        .unwrap()
        .is_empty());
}

// ----------------------------------------------------------------------------
// Worker loop
// ----------------------------------------------------------------------------

#[tokio::test]
async fn engine_loop_evaluates_until_shutdown() {
    let app = TestApp::with_trigger_config(TriggerEngineConfig {
        interval: Duration::from_millis(20),
        ..stuck_config(1)
    });
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(app.triggers.clone().run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("engine stops on shutdown")
        .unwrap();

    assert_eq!(
        app.orchestrator.status(tx.id).await.unwrap().status,
        BookingStatus::Expired
    );
}
