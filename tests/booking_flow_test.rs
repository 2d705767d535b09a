//! Integration tests for the booking lifecycle against in-memory stores

mod common;

use chrono::Utc;
use common::{booking_request, dec, flight_request, TestApp};
use std::sync::atomic::Ordering;

use wayfare_backend::database::alert_repository::AlertSeverity;
use wayfare_backend::database::booking_repository::{StatusChange, TransitionOutcome};
use wayfare_backend::database::routing_repository::DemotionReason;
use wayfare_backend::error::ErrorCode;
use wayfare_backend::payments::types::PaymentMethod;
use wayfare_backend::services::booking_orchestrator::is_supplier_failure;
use wayfare_backend::services::booking_state::BookingStatus;

async fn rows_in(app: &TestApp, status: BookingStatus) -> Vec<wayfare_backend::database::booking_repository::BookingTransaction> {
    app.stores
        .bookings
        .find_stale(&[status], Utc::now() + chrono::Duration::hours(1), 100)
        .await
        .unwrap()
}

// ----------------------------------------------------------------------------
// Fund payments
// ----------------------------------------------------------------------------

#[tokio::test]
async fn fund_booking_debits_and_confirms_synchronously() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");

    let outcome = app
        .orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap();
    let tx = outcome.transaction;

    assert_eq!(tx.status, BookingStatus::Confirmed);
    assert_eq!(tx.payment_method, PaymentMethod::Fund);
    assert_eq!(tx.total_amount, dec("100"));
    assert_eq!(tx.fund_amount, dec("100"));
    assert_eq!(tx.card_amount, dec("0"));
    assert!(outcome.client_secret.is_none());
    assert!(tx.flag("fund_debited"));
    assert!(tx.booking_reference.starts_with("WF"));
    assert!(tx
        .supplier_reference
        .as_deref()
        .unwrap()
        .starts_with("staylane-"));

    assert_eq!(app.funds.balance("acct_1"), dec("400"));
    assert_eq!(app.hotel_supplier.call_count(), 1);
    assert_eq!(app.payments.handles.lock().unwrap().len(), 0);

    let trail = app
        .stores
        .audit
        .list_for_subject(&tx.id.to_string())
        .await
        .unwrap();
    let steps: Vec<_> = trail
        .iter()
        .map(|e| (e.from_status.clone().unwrap(), e.to_status.clone().unwrap()))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("initiated".to_string(), "payment_confirmed".to_string()),
            ("payment_confirmed".to_string(), "confirmed".to_string()),
        ]
    );
}

#[tokio::test]
async fn insufficient_balance_fails_without_debit() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "10");

    let err = app
        .orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 402);
    assert_eq!(err.error_code(), ErrorCode::InsufficientFunds);
    assert_eq!(app.funds.debit_count(), 0);
    assert_eq!(app.hotel_supplier.call_count(), 0);

    let failed = rows_in(&app, BookingStatus::PaymentFailed).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure_reason.as_deref(), Some("insufficient funds"));
}

#[tokio::test]
async fn debit_timeout_flags_rollback_and_leaves_booking_initiated() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");
    app.funds.hang_debit.store(true, Ordering::SeqCst);

    let err = app
        .orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 504);
    let pending = rows_in(&app, BookingStatus::Initiated).await;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].rollback_required);
    assert_eq!(app.hotel_supplier.call_count(), 0);
}

#[tokio::test]
async fn cancel_after_debit_timeout_credits_the_landed_debit_back() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");
    app.funds.hang_debit.store(true, Ordering::SeqCst);
    app.orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap_err();
    // The wallet applied the debit before the call timed out
    assert_eq!(app.funds.balance("acct_1"), dec("400"));
    let id = rows_in(&app, BookingStatus::Initiated).await[0].id;

    app.funds.hang_debit.store(false, Ordering::SeqCst);
    let cancelled = app.orchestrator.cancel(id, None).await.unwrap();

    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.flag("fund_credited"));
    assert!(!cancelled.rollback_required);
    assert_eq!(app.funds.balance("acct_1"), dec("500"));
    assert_eq!(app.funds.debit_count(), 1);
    assert_eq!(app.funds.credit_count(), 1);
}

#[tokio::test]
async fn cancel_with_unknown_debit_outcome_escalates_and_keeps_rollback_flag() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");
    app.funds.hang_debit.store(true, Ordering::SeqCst);
    app.orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap_err();
    let id = rows_in(&app, BookingStatus::Initiated).await[0].id;

    let err = app.orchestrator.cancel(id, None).await.unwrap_err();
    assert_eq!(err.status_code(), 504);

    let row = app.orchestrator.status(id).await.unwrap();
    assert_eq!(row.status, BookingStatus::Initiated);
    assert!(row.rollback_required);
    assert_eq!(app.funds.credit_count(), 0);

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert!(alerts[0].requires_manual_action);
    assert_eq!(
        alerts[0].subject_key.as_deref(),
        Some(format!("fund_credit:{}", id).as_str())
    );
}

#[tokio::test]
async fn card_handle_timeout_leaves_booking_initiated_until_cancel_voids_it() {
    let app = TestApp::new();
    app.payments.hang_create.store(true, Ordering::SeqCst);

    let err = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 504);

    let pending = rows_in(&app, BookingStatus::Initiated).await;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].rollback_required);
    assert!(pending[0].external_payment_ref.is_none());
    assert!(rows_in(&app, BookingStatus::Failed).await.is_empty());

    app.payments.hang_create.store(false, Ordering::SeqCst);
    let cancelled = app.orchestrator.cancel(pending[0].id, None).await.unwrap();

    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.flag("handle_voided"));
    // The provider returned the handle it already held for this booking
    assert_eq!(app.payments.handles.lock().unwrap().len(), 1);
    assert_eq!(*app.payments.voids.lock().unwrap(), vec!["pi_test_1".to_string()]);
}

// ----------------------------------------------------------------------------
// Split payments
// ----------------------------------------------------------------------------

#[tokio::test]
async fn split_booking_debits_fund_portion_and_charges_remainder() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");

    let outcome = app
        .orchestrator
        .initiate(booking_request("split"))
        .await
        .unwrap();
    let tx = outcome.transaction;

    assert_eq!(tx.status, BookingStatus::PaymentProcessing);
    assert_eq!(tx.fund_amount, dec("40"));
    assert_eq!(tx.card_amount, dec("60"));
    assert_eq!(&tx.fund_amount + &tx.card_amount, tx.total_amount);
    assert!(tx.flag("fund_debited"));
    assert_eq!(outcome.client_secret.as_deref(), Some("pi_test_1_secret"));

    let handles = app.payments.handles.lock().unwrap().clone();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].1.amount, dec("60"));
    assert_eq!(handles[0].1.currency, "USD");
    assert_eq!(app.funds.balance("acct_1"), dec("460"));

    let confirmed = app
        .orchestrator
        .handle_payment_succeeded("pi_test_1")
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(app.hotel_supplier.call_count(), 1);
}

#[tokio::test]
async fn split_handle_failure_credits_fund_portion_back() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");
    app.payments.fail_create.store(true, Ordering::SeqCst);

    let err = app
        .orchestrator
        .initiate(booking_request("split"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 503);

    assert_eq!(app.funds.debit_count(), 1);
    assert_eq!(app.funds.credit_count(), 1);
    assert_eq!(app.funds.balance("acct_1"), dec("500"));

    let failed = rows_in(&app, BookingStatus::Failed).await;
    assert_eq!(failed.len(), 1);
    assert!(failed[0].flag("fund_credited"));
}

#[tokio::test]
async fn split_card_failure_credits_fund_portion_once() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");
    app.orchestrator
        .initiate(booking_request("split"))
        .await
        .unwrap();

    let failed = app
        .orchestrator
        .handle_payment_failed("pi_test_1", "card declined")
        .await
        .unwrap();
    assert_eq!(failed.status, BookingStatus::PaymentFailed);
    assert!(failed.flag("fund_credited"));

    // A second failure report for the same handle is ignored
    let again = app
        .orchestrator
        .handle_payment_failed("pi_test_1", "card declined")
        .await
        .unwrap();
    assert_eq!(again.status, BookingStatus::PaymentFailed);
    assert_eq!(app.funds.credit_count(), 1);
    assert_eq!(app.funds.balance("acct_1"), dec("500"));
    assert_eq!(app.payments.refund_count(), 0);
}

// ----------------------------------------------------------------------------
// Card payments and cancellation
// ----------------------------------------------------------------------------

#[tokio::test]
async fn card_booking_waits_for_payment_confirmation() {
    let app = TestApp::new();

    let outcome = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap();
    let tx = outcome.transaction;

    assert_eq!(tx.status, BookingStatus::PaymentProcessing);
    assert_eq!(tx.status.public_status(), "processing");
    assert_eq!(tx.external_payment_ref.as_deref(), Some("pi_test_1"));
    assert_eq!(outcome.client_secret.as_deref(), Some("pi_test_1_secret"));
    assert_eq!(app.hotel_supplier.call_count(), 0);
    assert_eq!(app.funds.debit_count(), 0);
}

#[tokio::test]
async fn cancel_before_capture_voids_the_handle() {
    let app = TestApp::new();
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;

    let cancelled = app
        .orchestrator
        .cancel(tx.id, Some("changed plans".to_string()))
        .await
        .unwrap();

    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.failure_reason.as_deref(), Some("changed plans"));
    assert!(cancelled.flag("handle_voided"));
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(app.payments.void_count(), 1);
    assert_eq!(app.payments.refund_count(), 0);
}

#[tokio::test]
async fn refused_void_falls_back_to_refund() {
    let app = TestApp::new();
    app.payments.refuse_void.store(true, Ordering::SeqCst);
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;

    let cancelled = app.orchestrator.cancel(tx.id, None).await.unwrap();

    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.flag("refund_issued"));
    assert_eq!(app.payments.refund_count(), 1);
}

#[tokio::test]
async fn cancelling_a_captured_booking_refunds_exactly_once() {
    let app = TestApp::new();
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;
    let confirmed = app
        .orchestrator
        .handle_payment_succeeded("pi_test_1")
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    let cancelled = app.orchestrator.cancel(tx.id, None).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let again = app.orchestrator.cancel(tx.id, None).await.unwrap();
    assert_eq!(again.status, BookingStatus::Cancelled);

    let refunds = app.payments.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].0, "pi_test_1");
    assert_eq!(refunds[0].1, format!("refund:{}", tx.id));
    assert_eq!(app.payments.void_count(), 0);
}

#[tokio::test]
async fn cancelling_a_fund_booking_credits_once() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");
    let tx = app
        .orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap()
        .transaction;

    app.orchestrator.cancel(tx.id, None).await.unwrap();
    app.orchestrator.cancel(tx.id, None).await.unwrap();

    assert_eq!(app.funds.credit_count(), 1);
    assert_eq!(app.funds.balance("acct_1"), dec("500"));
}

#[tokio::test]
async fn cancel_racing_payment_success_never_double_refunds() {
    let app = TestApp::new();
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;

    let (cancelled, _) = tokio::join!(
        app.orchestrator.cancel(tx.id, None),
        app.orchestrator.handle_payment_succeeded("pi_test_1"),
    );

    let cancelled = cancelled.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(app.payments.refund_count() <= 1);

    let final_row = app.orchestrator.status(tx.id).await.unwrap();
    assert_eq!(final_row.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn terminal_bookings_cannot_be_cancelled() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");
    let tx = app
        .orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap()
        .transaction;

    let completed = app.orchestrator.complete(tx.id).await.unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);

    let err = app.orchestrator.cancel(tx.id, None).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(err.error_code(), ErrorCode::InvalidTransition);
    assert_eq!(app.funds.credit_count(), 0);
}

#[tokio::test]
async fn complete_requires_a_confirmed_booking() {
    let app = TestApp::new();
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;

    let err = app.orchestrator.complete(tx.id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);

    let missing = app
        .orchestrator
        .complete(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(missing.status_code(), 404);
}

// ----------------------------------------------------------------------------
// Supplier confirmation
// ----------------------------------------------------------------------------

#[tokio::test]
async fn supplier_refusal_keeps_payment_and_raises_one_alert() {
    let app = TestApp::new();
    app.funds.set_balance("acct_1", "500");
    app.hotel_supplier.reject.store(true, Ordering::SeqCst);

    let tx = app
        .orchestrator
        .initiate(booking_request("fund"))
        .await
        .unwrap()
        .transaction;

    assert_eq!(tx.status, BookingStatus::PaymentConfirmed);
    assert_eq!(tx.status.public_status(), "processing");
    assert!(tx.rollback_required);
    assert_eq!(
        tx.failure_reason.as_deref(),
        Some("inventory no longer available")
    );
    assert_eq!(app.funds.credit_count(), 0);

    // A manual retry fails again without a second alert
    let err = app
        .orchestrator
        .confirm_with_supplier(tx.id)
        .await
        .unwrap_err();
    assert!(is_supplier_failure(&err));

    let alerts = app.stores.alerts.list(true, 100).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].requires_manual_action);
    assert_eq!(alerts[0].related_transaction_id, Some(tx.id));
    assert_eq!(
        alerts[0].subject_key.as_deref(),
        Some(format!("supplier_confirmation:{}", tx.id).as_str())
    );
}

#[tokio::test]
async fn confirm_with_supplier_is_a_no_op_outside_payment_confirmed() {
    let app = TestApp::new();
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;

    let unchanged = app.orchestrator.confirm_with_supplier(tx.id).await.unwrap();
    assert_eq!(unchanged.status, BookingStatus::PaymentProcessing);
    assert_eq!(app.hotel_supplier.call_count(), 0);
}

#[tokio::test]
async fn demoted_supplier_is_bypassed_for_new_bookings() {
    let app = TestApp::new();
    app.stores
        .routing
        .demote("skyway", DemotionReason::Degradation)
        .await
        .unwrap();

    let tx = app
        .orchestrator
        .initiate(flight_request())
        .await
        .unwrap()
        .transaction;
    assert_eq!(tx.supplier_id, "backup-air");

    app.stores.routing.restore("skyway").await.unwrap();
    let tx = app
        .orchestrator
        .initiate(flight_request())
        .await
        .unwrap()
        .transaction;
    assert_eq!(tx.supplier_id, "skyway");
}

// ----------------------------------------------------------------------------
// Store compare-and-set
// ----------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_transitions_from_the_same_status_apply_once() {
    let app = TestApp::new();
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;

    let confirm = StatusChange::new(
        BookingStatus::PaymentProcessing,
        BookingStatus::PaymentConfirmed,
        "webhook",
    );
    let cancel = StatusChange::new(
        BookingStatus::PaymentProcessing,
        BookingStatus::Cancelled,
        "api",
    );

    let (a, b) = tokio::join!(
        app.stores.bookings.transition(tx.id, confirm),
        app.stores.bookings.transition(tx.id, cancel),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, TransitionOutcome::Applied(_)))
        .count();
    let conflicts = outcomes
        .iter()
        .filter(|o| matches!(o, TransitionOutcome::Conflict { .. }))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(conflicts, 1);

    let transitions = app
        .stores
        .audit
        .list_for_subject(&tx.id.to_string())
        .await
        .unwrap();
    // initiated -> payment_processing, plus the single winner
    assert_eq!(transitions.len(), 2);
}

#[tokio::test]
async fn lookup_by_reference_and_unknown_ids() {
    let app = TestApp::new();
    let tx = app
        .orchestrator
        .initiate(booking_request("card"))
        .await
        .unwrap()
        .transaction;

    let found = app
        .orchestrator
        .status_by_reference(&tx.booking_reference)
        .await
        .unwrap();
    assert_eq!(found.id, tx.id);

    let err = app
        .orchestrator
        .status_by_reference("WF0000000000")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::TransactionNotFound);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_side_effect() {
    let app = TestApp::new();

    let mut missing_account = booking_request("fund");
    missing_account.account_id = None;
    let err = app
        .orchestrator
        .initiate(missing_account)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let mut no_supplier = booking_request("card");
    no_supplier.booking_type = "package".to_string();
    let err = app.orchestrator.initiate(no_supplier).await.unwrap_err();
    assert_eq!(err.status_code(), 503);

    assert_eq!(app.funds.debit_count(), 0);
    assert_eq!(app.payments.handles.lock().unwrap().len(), 0);
    assert!(rows_in(&app, BookingStatus::Initiated).await.is_empty());
}
