//! Shared harness for integration tests: in-memory stores plus scripted
//! payment, fund, supplier and health-feed collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wayfare_backend::api::{self, AppState};
use wayfare_backend::config::WebhookConfig;
use wayfare_backend::database::Stores;
use wayfare_backend::health::HealthChecker;
use wayfare_backend::payments::error::{PaymentError, PaymentResult};
use wayfare_backend::payments::provider::{FundBalanceService, PaymentProvider};
use wayfare_backend::payments::types::{Money, PaymentHandle, PaymentHandleRequest, RefundReceipt};
use wayfare_backend::payments::webhook::SignatureVerifier;
use wayfare_backend::services::alerting::AlertService;
use wayfare_backend::services::booking_orchestrator::{
    BookingOrchestrator, InitiateBookingRequest, OrchestratorConfig,
};
use wayfare_backend::services::side_effects::BestEffortHooks;
use wayfare_backend::services::webhook_processor::WebhookProcessor;
use wayfare_backend::suppliers::error::{SupplierError, SupplierResult};
use wayfare_backend::suppliers::types::{
    BookingType, ConfirmationRequest, ProviderHealthSample, ProviderHealthStatus,
    SupplierConfirmation,
};
use wayfare_backend::suppliers::{ProviderHealthSource, SupplierClient, SupplierRegistry};
use wayfare_backend::workers::trigger_engine::{TriggerEngine, TriggerEngineConfig};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

// ============================================================================
// Payment provider
// ============================================================================

#[derive(Default)]
pub struct MockPayments {
    counter: AtomicUsize,
    pub fail_create: AtomicBool,
    /// Registers the handle, then stalls past any caller timeout
    pub hang_create: AtomicBool,
    by_reference: Mutex<HashMap<String, String>>,
    pub refuse_void: AtomicBool,
    pub handles: Mutex<Vec<(String, Money)>>,
    pub refunds: Mutex<Vec<(String, String)>>,
    pub voids: Mutex<Vec<String>>,
}

impl MockPayments {
    /// Handle id the next `create_payment_handle` call will return
    pub fn next_handle_id(&self) -> String {
        format!("pi_test_{}", self.counter.load(Ordering::SeqCst) + 1)
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }

    pub fn void_count(&self) -> usize {
        self.voids.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProvider for MockPayments {
    fn name(&self) -> &str {
        "mock-gateway"
    }

    async fn create_payment_handle(
        &self,
        request: PaymentHandleRequest,
    ) -> PaymentResult<PaymentHandle> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PaymentError::NetworkError {
                message: "gateway unreachable".to_string(),
            });
        }
        let handle_id = {
            let mut by_reference = self.by_reference.lock().unwrap();
            match by_reference.get(&request.reference) {
                Some(existing) => existing.clone(),
                None => {
                    let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let handle_id = format!("pi_test_{}", n);
                    by_reference.insert(request.reference.clone(), handle_id.clone());
                    self.handles
                        .lock()
                        .unwrap()
                        .push((handle_id.clone(), request.amount));
                    handle_id
                }
            }
        };
        if self.hang_create.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(PaymentHandle {
            client_secret: Some(format!("{}_secret", handle_id)),
            handle_id,
        })
    }

    async fn refund(&self, handle_id: &str, idempotency_key: &str) -> PaymentResult<RefundReceipt> {
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push((handle_id.to_string(), idempotency_key.to_string()));
        Ok(RefundReceipt {
            refund_id: format!("re_{}", refunds.len()),
        })
    }

    async fn cancel_handle(&self, handle_id: &str) -> PaymentResult<()> {
        if self.refuse_void.load(Ordering::SeqCst) {
            return Err(PaymentError::PaymentDeclinedError {
                message: "handle already captured".to_string(),
                provider_code: Some("payment_intent_unexpected_state".to_string()),
            });
        }
        self.voids.lock().unwrap().push(handle_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Fund balance service
// ============================================================================

#[derive(Default)]
pub struct MockFunds {
    pub balances: Mutex<HashMap<String, BigDecimal>>,
    pub debits: Mutex<Vec<(String, BigDecimal)>>,
    pub credits: Mutex<Vec<(String, BigDecimal)>>,
    /// Applies the debit, then stalls past any caller timeout
    pub hang_debit: AtomicBool,
    pub fail_credit: AtomicBool,
    debited_refs: Mutex<HashSet<String>>,
    credited_refs: Mutex<HashSet<String>>,
}

impl MockFunds {
    pub fn set_balance(&self, account_id: &str, amount: &str) {
        self.balances
            .lock()
            .unwrap()
            .insert(account_id.to_string(), dec(amount));
    }

    pub fn balance(&self, account_id: &str) -> BigDecimal {
        self.balances
            .lock()
            .unwrap()
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0))
    }

    pub fn credit_count(&self) -> usize {
        self.credits.lock().unwrap().len()
    }

    pub fn debit_count(&self) -> usize {
        self.debits.lock().unwrap().len()
    }

    /// Replays under an already applied reference succeed without moving money
    fn apply_debit(&self, account_id: &str, amount: &Money, reference: &str) -> PaymentResult<()> {
        if self.debited_refs.lock().unwrap().contains(reference) {
            return Ok(());
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances
            .entry(account_id.to_string())
            .or_insert_with(|| BigDecimal::from(0));
        if *balance < amount.amount {
            return Err(PaymentError::InsufficientFundsError {
                message: format!("balance {} below {}", balance, amount.amount),
            });
        }
        *balance = &*balance - &amount.amount;
        self.debited_refs.lock().unwrap().insert(reference.to_string());
        self.debits
            .lock()
            .unwrap()
            .push((account_id.to_string(), amount.amount.clone()));
        Ok(())
    }
}

#[async_trait]
impl FundBalanceService for MockFunds {
    async fn debit(&self, account_id: &str, amount: &Money, reference: &str) -> PaymentResult<()> {
        self.apply_debit(account_id, amount, reference)?;
        if self.hang_debit.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(())
    }

    async fn credit(&self, account_id: &str, amount: &Money, reference: &str) -> PaymentResult<()> {
        if self.fail_credit.load(Ordering::SeqCst) {
            return Err(PaymentError::NetworkError {
                message: "fund service unavailable".to_string(),
            });
        }
        if !self.credited_refs.lock().unwrap().insert(reference.to_string()) {
            return Ok(());
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances
            .entry(account_id.to_string())
            .or_insert_with(|| BigDecimal::from(0));
        *balance = &*balance + &amount.amount;
        self.credits
            .lock()
            .unwrap()
            .push((account_id.to_string(), amount.amount.clone()));
        Ok(())
    }
}

// ============================================================================
// Supplier
// ============================================================================

pub struct MockSupplier {
    id: String,
    pub reject: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockSupplier {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            reject: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SupplierClient for MockSupplier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn confirm(&self, request: &ConfirmationRequest) -> SupplierResult<SupplierConfirmation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Ok(SupplierConfirmation {
                success: false,
                provider_reference: None,
                message: Some("inventory no longer available".to_string()),
            });
        }
        Ok(SupplierConfirmation {
            success: true,
            provider_reference: Some(format!("{}-{}", self.id, request.booking_reference)),
            message: None,
        })
    }
}

// ============================================================================
// Provider health feed
// ============================================================================

#[derive(Default)]
pub struct MockHealthFeed {
    pub samples: Mutex<Vec<ProviderHealthSample>>,
    pub down: AtomicBool,
}

impl MockHealthFeed {
    pub fn set(&self, samples: Vec<ProviderHealthSample>) {
        *self.samples.lock().unwrap() = samples;
    }
}

#[async_trait]
impl ProviderHealthSource for MockHealthFeed {
    async fn samples(&self) -> SupplierResult<Vec<ProviderHealthSample>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SupplierError::Network {
                message: "health feed unreachable".to_string(),
            });
        }
        Ok(self.samples.lock().unwrap().clone())
    }
}

pub fn sample(
    provider_id: &str,
    status: ProviderHealthStatus,
    usage_ratio: Option<f64>,
) -> ProviderHealthSample {
    ProviderHealthSample {
        provider_id: provider_id.to_string(),
        status,
        last_checked_at: Utc::now(),
        consecutive_failures: if status == ProviderHealthStatus::Critical { 6 } else { 0 },
        usage_ratio,
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestApp {
    pub stores: Stores,
    pub payments: Arc<MockPayments>,
    pub funds: Arc<MockFunds>,
    pub hotel_supplier: Arc<MockSupplier>,
    pub flight_primary: Arc<MockSupplier>,
    pub flight_backup: Arc<MockSupplier>,
    pub health_feed: Arc<MockHealthFeed>,
    pub orchestrator: Arc<BookingOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub triggers: Arc<TriggerEngine>,
    pub webhook_config: WebhookConfig,
}

pub fn webhook_config() -> WebhookConfig {
    WebhookConfig {
        signing_secret: WEBHOOK_SECRET.to_string(),
        signature_tolerance: Duration::from_secs(300),
        processing_lease: Duration::from_secs(60),
        retry_interval: Duration::from_secs(30),
        max_attempts: 5,
        retry_batch_size: 50,
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_trigger_config(TriggerEngineConfig::default())
    }

    pub fn with_trigger_config(trigger_config: TriggerEngineConfig) -> Self {
        let stores = Stores::in_memory();
        let payments = Arc::new(MockPayments::default());
        let funds = Arc::new(MockFunds::default());
        let hotel_supplier = Arc::new(MockSupplier::new("staylane"));
        let flight_primary = Arc::new(MockSupplier::new("skyway"));
        let flight_backup = Arc::new(MockSupplier::new("backup-air"));
        let health_feed = Arc::new(MockHealthFeed::default());

        let suppliers = SupplierRegistry::new()
            .with(BookingType::Hotel, 1, hotel_supplier.clone())
            .with(BookingType::Flight, 1, flight_primary.clone())
            .with(BookingType::Flight, 2, flight_backup.clone());

        let orchestrator_config = OrchestratorConfig {
            fund_timeout: Duration::from_millis(200),
            payment_timeout: Duration::from_millis(500),
            supplier_timeout: Duration::from_secs(2),
            max_cancel_attempts: 3,
        };

        let orchestrator = Arc::new(BookingOrchestrator::new(
            &stores,
            payments.clone(),
            funds.clone(),
            suppliers,
            BestEffortHooks::logging(),
            orchestrator_config,
        ));

        let webhook_config = webhook_config();
        let webhooks = Arc::new(WebhookProcessor::new(
            &stores,
            orchestrator.clone(),
            &webhook_config,
        ));

        let triggers = Arc::new(TriggerEngine::new(
            &stores,
            orchestrator.clone(),
            Some(health_feed.clone() as Arc<dyn ProviderHealthSource>),
            trigger_config,
        ));

        Self {
            stores,
            payments,
            funds,
            hotel_supplier,
            flight_primary,
            flight_backup,
            health_feed,
            orchestrator,
            webhooks,
            triggers,
            webhook_config,
        }
    }

    pub fn router(&self) -> Router {
        api::router(AppState {
            orchestrator: self.orchestrator.clone(),
            webhooks: self.webhooks.clone(),
            alerts: AlertService::new(self.stores.alerts.clone()),
            triggers: self.triggers.clone(),
            health_checker: HealthChecker::new(),
        })
    }

    pub fn sign(&self, body: &[u8]) -> String {
        SignatureVerifier::new(WEBHOOK_SECRET, Duration::from_secs(300))
            .sign(body, Utc::now().timestamp())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Hotel booking worth 100.00 USD, payable per `payment_method`
pub fn booking_body(payment_method: &str) -> Value {
    json!({
        "step": "initiate",
        "bookingType": "hotel",
        "bookingData": {
            "hotelId": "h-42",
            "checkIn": "2026-11-02",
            "checkOut": "2026-11-05",
            "price": { "amount": "100.00", "currency": "USD" },
            "addons": [ { "code": "breakfast", "price": 15 } ]
        },
        "customerInfo": {
            "email": "traveller@example.com",
            "firstName": "Ada",
            "lastName": "Lovelace"
        },
        "paymentMethod": payment_method,
        "accountId": "acct_1",
        "fundAmount": 40
    })
}

pub fn booking_request(payment_method: &str) -> InitiateBookingRequest {
    serde_json::from_value(booking_body(payment_method)).unwrap()
}

pub fn flight_request() -> InitiateBookingRequest {
    let mut body = booking_body("card");
    body["bookingType"] = json!("flight");
    body["bookingData"] = json!({
        "route": "LOS-LHR",
        "price": { "amount": 640, "currency": "USD" }
    });
    serde_json::from_value(body).unwrap()
}

pub fn succeeded_event(event_id: &str, handle_id: &str) -> Vec<u8> {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": handle_id } }
    })
    .to_string()
    .into_bytes()
}

pub fn failed_event(event_id: &str, handle_id: &str) -> Vec<u8> {
    json!({
        "id": event_id,
        "type": "payment_intent.payment_failed",
        "data": {
            "object": {
                "id": handle_id,
                "last_payment_error": { "message": "card declined" }
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn dispute_event(event_id: &str, charge_id: &str, handle_id: &str) -> Vec<u8> {
    json!({
        "id": event_id,
        "type": "charge.dispute.created",
        "data": {
            "object": {
                "id": "dp_1",
                "charge": charge_id,
                "payment_intent": handle_id,
                "reason": "fraudulent"
            }
        }
    })
    .to_string()
    .into_bytes()
}
