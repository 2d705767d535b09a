//! Booking Flow Orchestrator
//!
//! Drives a booking from request to supplier confirmation. Payment capture is
//! either synchronous (stored-fund debit) or asynchronous (card handle settled
//! by webhook), and every status change goes through a compare-and-set on the
//! booking store so webhook deliveries, cancellations and the trigger engine
//! can race safely.

use crate::database::alert_repository::{AlertSeverity, AlertType, NewAlert};
use crate::database::booking_repository::{
    merge_metadata, BookingAnnotation, BookingTransaction, BookingTransactionStore, NewBookingTransaction,
    StatusChange, TransitionOutcome,
};
use crate::database::routing_repository::SupplierRoutingStore;
use crate::database::Stores;
use crate::error::{
    AppError, AppErrorKind, AppResult, DomainError, InfrastructureError, ValidationError,
};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{FundBalanceService, PaymentProvider};
use crate::payments::types::{Money, PaymentHandleRequest, PaymentMethod};
use crate::services::alerting::AlertService;
use crate::services::booking_state::BookingStatus;
use crate::services::side_effects::{BestEffortHooks, NotificationType};
use crate::suppliers::registry::SupplierRegistry;
use crate::suppliers::types::{BookingType, ConfirmationRequest};
use bigdecimal::BigDecimal;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const ACTOR_ORCHESTRATOR: &str = "orchestrator";
pub const ACTOR_WEBHOOK: &str = "webhook";
pub const ACTOR_TRIGGER_ENGINE: &str = "trigger_engine";
pub const ACTOR_API: &str = "api";

// Compensation flags kept in booking metadata
const FLAG_FUND_DEBITED: &str = "fund_debited";
const FLAG_FUND_CREDITED: &str = "fund_credited";
const FLAG_REFUND_ISSUED: &str = "refund_issued";
const FLAG_HANDLE_VOIDED: &str = "handle_voided";
// Set when a debit or handle request timed out and may have been applied
const FLAG_DEBIT_UNCERTAIN: &str = "fund_debit_uncertain";
const FLAG_HANDLE_UNCERTAIN: &str = "payment_handle_uncertain";

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Stored-fund debit/credit call limit
    pub fund_timeout: Duration,
    /// Card handle, refund and void call limit
    pub payment_timeout: Duration,
    pub supplier_timeout: Duration,
    /// Compare-and-set retries before a cancel gives up
    pub max_cancel_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fund_timeout: Duration::from_secs(5),
            payment_timeout: Duration::from_secs(15),
            supplier_timeout: Duration::from_secs(30),
            max_cancel_attempts: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fund_timeout: std::env::var("FUND_CALL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.fund_timeout),
            payment_timeout: std::env::var("PAYMENT_CALL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_timeout),
            supplier_timeout: std::env::var("SUPPLIER_CALL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.supplier_timeout),
            max_cancel_attempts: std::env::var("MAX_CANCEL_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_cancel_attempts),
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySelection {
    pub id: String,
    pub price: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSellSelection {
    #[serde(default)]
    pub insurance: bool,
    #[serde(default)]
    pub transfers: bool,
    #[serde(default)]
    pub activities: Vec<ActivitySelection>,
}

/// Body of `POST /api/bookings`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateBookingRequest {
    #[serde(default)]
    pub step: Option<String>,
    pub booking_type: String,
    pub booking_data: JsonValue,
    #[serde(default)]
    pub customer_info: CustomerInfo,
    pub payment_method: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub fund_amount: Option<JsonValue>,
    #[serde(default)]
    pub selected_addons: Vec<String>,
    #[serde(default)]
    pub cross_sell_items: Option<CrossSellSelection>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LineItemKind {
    Base,
    Addon,
    Insurance,
    Transfers,
    Activity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub kind: LineItemKind,
    pub code: String,
    pub amount: BigDecimal,
}

/// Validated request with its computed total and payment split
#[derive(Debug, Clone)]
pub struct PricedBooking {
    pub booking_type: BookingType,
    pub payment_method: PaymentMethod,
    pub currency: String,
    pub total: BigDecimal,
    pub fund_amount: BigDecimal,
    pub card_amount: BigDecimal,
    pub account_id: Option<String>,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub transaction: BookingTransaction,
    /// Present when a card handle was created
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ExpireOutcome {
    Expired(BookingTransaction),
    Skipped { reason: String },
}

// ============================================================================
// Pricing & Validation
// ============================================================================

fn parse_amount(value: &JsonValue, field: &str) -> AppResult<BigDecimal> {
    let raw = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Object(map) => {
            return match map.get("amount").or_else(|| map.get("price")) {
                Some(inner) => parse_amount(inner, field),
                None => Err(AppError::validation(field, "amount is required")),
            };
        }
        _ => return Err(AppError::validation(field, "must be a decimal amount")),
    };

    let amount = BigDecimal::from_str(&raw)
        .map_err(|_| AppError::validation(field, "must be a decimal amount"))?;
    if amount < BigDecimal::from(0) {
        return Err(AppError::validation(field, "must not be negative"));
    }
    Ok(amount)
}

fn parse_currency(value: Option<&JsonValue>) -> AppResult<String> {
    let currency = value
        .and_then(JsonValue::as_str)
        .map(|c| c.trim().to_uppercase())
        .ok_or_else(|| AppError::validation("bookingData.price.currency", "currency is required"))?;

    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation(
            "bookingData.price.currency",
            "must be a three-letter ISO-4217 code",
        ));
    }
    Ok(currency)
}

fn validate_customer(customer: &CustomerInfo) -> AppResult<()> {
    let email_ok = EMAIL_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(customer.email.trim()));
    if !email_ok {
        return Err(AppError::validation(
            "customerInfo.email",
            "must be a valid email address",
        ));
    }
    if customer.first_name.trim().is_empty() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::MissingField {
                field: "customerInfo.firstName".to_string(),
            },
        )));
    }
    if customer.last_name.trim().is_empty() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::MissingField {
                field: "customerInfo.lastName".to_string(),
            },
        )));
    }
    Ok(())
}

/// Validates the request and sums base price, add-ons and cross-sell items.
/// Prices are taken as given; nothing is converted or recomputed.
pub fn price_booking(request: &InitiateBookingRequest) -> AppResult<PricedBooking> {
    if let Some(step) = &request.step {
        if step != "initiate" {
            return Err(AppError::validation("step", "only 'initiate' is supported"));
        }
    }

    let booking_type = BookingType::from_str(&request.booking_type)
        .map_err(|reason| AppError::validation("bookingType", reason))?;
    let payment_method = PaymentMethod::from_str(&request.payment_method)
        .map_err(|_| AppError::validation("paymentMethod", "must be card, fund or split"))?;

    validate_customer(&request.customer_info)?;

    let data = &request.booking_data;
    if !data.is_object() {
        return Err(AppError::validation("bookingData", "must be an object"));
    }
    let price = data
        .get("price")
        .ok_or_else(|| AppError::validation("bookingData.price", "price is required"))?;
    let base = parse_amount(price, "bookingData.price.amount")?;
    let currency = parse_currency(price.get("currency").or_else(|| data.get("currency")))?;

    let mut line_items = vec![LineItem {
        kind: LineItemKind::Base,
        code: booking_type.as_str().to_string(),
        amount: base,
    }];

    let offered_addons = data
        .get("addons")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();
    let mut seen = HashSet::new();
    for code in &request.selected_addons {
        if !seen.insert(code.as_str()) {
            continue;
        }
        let addon = offered_addons
            .iter()
            .find(|addon| addon.get("code").and_then(JsonValue::as_str) == Some(code.as_str()))
            .ok_or_else(|| {
                AppError::validation("selectedAddons", format!("unknown add-on '{}'", code))
            })?;
        let amount = parse_amount(
            addon.get("price").unwrap_or(&JsonValue::Null),
            "bookingData.addons.price",
        )?;
        line_items.push(LineItem {
            kind: LineItemKind::Addon,
            code: code.clone(),
            amount,
        });
    }

    if let Some(cross_sell) = &request.cross_sell_items {
        let quotes = data.get("crossSellQuotes");
        for (selected, kind, name) in [
            (cross_sell.insurance, LineItemKind::Insurance, "insurance"),
            (cross_sell.transfers, LineItemKind::Transfers, "transfers"),
        ] {
            if !selected {
                continue;
            }
            let field = format!("bookingData.crossSellQuotes.{}", name);
            let quote = quotes
                .and_then(|q| q.get(name))
                .ok_or_else(|| AppError::validation(field.clone(), "no quote offered"))?;
            line_items.push(LineItem {
                kind,
                code: name.to_string(),
                amount: parse_amount(quote, &field)?,
            });
        }
        for activity in &cross_sell.activities {
            line_items.push(LineItem {
                kind: LineItemKind::Activity,
                code: activity.id.clone(),
                amount: parse_amount(&activity.price, "crossSellItems.activities.price")?,
            });
        }
    }

    let total = line_items
        .iter()
        .fold(BigDecimal::from(0), |acc, item| acc + &item.amount);
    if total <= BigDecimal::from(0) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: total.to_string(),
                reason: "total must be greater than zero".to_string(),
            },
        )));
    }

    let account_id = request
        .account_id
        .as_ref()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    if payment_method.uses_fund() && account_id.is_none() {
        return Err(AppError::validation(
            "accountId",
            "required for fund and split payments",
        ));
    }

    let zero = BigDecimal::from(0);
    let (fund_amount, card_amount) = match payment_method {
        PaymentMethod::Card => (zero, total.clone()),
        PaymentMethod::Fund => (total.clone(), zero),
        PaymentMethod::Split => {
            let fund = request
                .fund_amount
                .as_ref()
                .ok_or_else(|| AppError::validation("fundAmount", "required for split payments"))
                .and_then(|value| parse_amount(value, "fundAmount"))?;
            if fund <= zero || fund >= total {
                return Err(AppError::validation(
                    "fundAmount",
                    "must be greater than zero and less than the total",
                ));
            }
            let card = &total - &fund;
            (fund, card)
        }
    };

    Ok(PricedBooking {
        booking_type,
        payment_method,
        currency,
        total,
        fund_amount,
        card_amount,
        account_id,
        line_items,
    })
}

/// Human-facing booking code: `WF` + 10 uppercase hex characters
pub fn generate_booking_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("WF{}", hex[..10].to_uppercase())
}

fn with_flags(tx: &BookingTransaction, flags: &JsonValue) -> BookingTransaction {
    let mut local = tx.clone();
    merge_metadata(&mut local.metadata, flags);
    local
}

async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> PaymentResult<T>
where
    F: Future<Output = PaymentResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PaymentError::TimeoutError {
            operation: operation.to_string(),
            timeout_secs: limit.as_secs(),
        }),
    }
}

fn invalid_transition(from: BookingStatus, to: BookingStatus) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }))
}

fn deferred(message: impl Into<String>) -> AppError {
    AppError::new(AppErrorKind::Infrastructure(
        InfrastructureError::ProcessingDeferred {
            message: message.into(),
        },
    ))
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct BookingOrchestrator {
    bookings: Arc<dyn BookingTransactionStore>,
    routing: Arc<dyn SupplierRoutingStore>,
    payments: Arc<dyn PaymentProvider>,
    funds: Arc<dyn FundBalanceService>,
    suppliers: SupplierRegistry,
    alerts: AlertService,
    hooks: BestEffortHooks,
    config: OrchestratorConfig,
}

impl BookingOrchestrator {
    pub fn new(
        stores: &Stores,
        payments: Arc<dyn PaymentProvider>,
        funds: Arc<dyn FundBalanceService>,
        suppliers: SupplierRegistry,
        hooks: BestEffortHooks,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            bookings: stores.bookings.clone(),
            routing: stores.routing.clone(),
            payments,
            funds,
            suppliers,
            alerts: AlertService::new(stores.alerts.clone()),
            hooks,
            config,
        }
    }

    pub fn suppliers(&self) -> &SupplierRegistry {
        &self.suppliers
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub async fn status(&self, id: Uuid) -> AppResult<BookingTransaction> {
        self.bookings
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(id))
    }

    pub async fn status_by_reference(&self, reference: &str) -> AppResult<BookingTransaction> {
        self.bookings
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::not_found(reference))
    }

    async fn apply(&self, id: Uuid, change: StatusChange) -> AppResult<TransitionOutcome> {
        if !change.from.can_transition_to(change.to) {
            return Err(invalid_transition(change.from, change.to));
        }
        Ok(self.bookings.transition(id, change).await?)
    }

    /// Persists metadata flags. The returned row always carries the patch so
    /// the caller's next decision sees it even when the write failed.
    async fn set_flags(&self, tx: &BookingTransaction, flags: JsonValue) -> BookingTransaction {
        let annotation = BookingAnnotation {
            metadata: Some(flags.clone()),
            ..Default::default()
        };
        match self.bookings.annotate(tx.id, annotation).await {
            Ok(Some(updated)) => updated,
            Ok(None) => with_flags(tx, &flags),
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "failed to persist compensation flags");
                with_flags(tx, &flags)
            }
        }
    }

    /// Records that a collaborator call timed out with an unknown outcome.
    /// The booking stays `initiated` with `rollback_required` so cancel and
    /// expiry reconcile it; if even that marker cannot be written the money
    /// is escalated straight away.
    async fn flag_unknown_outcome(&self, tx: &BookingTransaction, reason: &str, flags: JsonValue) {
        let annotation = BookingAnnotation {
            failure_reason: Some(reason.to_string()),
            rollback_required: Some(true),
            metadata: Some(flags),
        };
        match self.bookings.annotate(tx.id, annotation).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(transaction_id = %tx.id, "booking vanished while flagging rollback"),
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "failed to flag rollback");
                self.alerts
                    .raise_logged(
                        NewAlert::new(
                            AlertType::Manual,
                            AlertSeverity::Critical,
                            format!(
                                "Booking {} needs reconciliation ({}) but the rollback flag could not be stored: {}",
                                tx.booking_reference, reason, e
                            ),
                        )
                        .for_transaction(tx.id)
                        .manual_action()
                        .subject(format!("fund_credit:{}", tx.id)),
                    )
                    .await;
            }
        }
    }

    fn fund_money(&self, tx: &BookingTransaction) -> Money {
        Money::new(tx.fund_amount.clone(), tx.currency.clone())
    }

    // ------------------------------------------------------------------------
    // initiate
    // ------------------------------------------------------------------------

    pub async fn initiate(&self, request: InitiateBookingRequest) -> AppResult<InitiateOutcome> {
        let priced = price_booking(&request)?;

        let demoted = self.routing.demoted_suppliers().await?;
        let route = self
            .suppliers
            .select(priced.booking_type, &demoted)
            .ok_or_else(|| {
                AppError::upstream(
                    "Supplier routing",
                    format!("no supplier serves {} bookings", priced.booking_type),
                )
            })?;

        let customer = serde_json::to_value(&request.customer_info).unwrap_or(JsonValue::Null);
        let line_items = serde_json::to_value(&priced.line_items).unwrap_or(JsonValue::Null);

        let tx = self
            .bookings
            .create(NewBookingTransaction {
                id: Uuid::new_v4(),
                booking_reference: generate_booking_reference(),
                booking_type: priced.booking_type,
                payment_method: priced.payment_method,
                total_amount: priced.total.clone(),
                fund_amount: priced.fund_amount.clone(),
                card_amount: priced.card_amount.clone(),
                currency: priced.currency.clone(),
                account_id: priced.account_id.clone(),
                supplier_id: route.supplier_id.clone(),
                customer,
                booking_data: request.booking_data.clone(),
                line_items,
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            })
            .await?;

        info!(
            transaction_id = %tx.id,
            reference = %tx.booking_reference,
            booking_type = %tx.booking_type,
            payment_method = %tx.payment_method,
            total = %tx.total_amount,
            currency = %tx.currency,
            supplier = %tx.supplier_id,
            "booking initiated"
        );

        match tx.payment_method {
            PaymentMethod::Card => self.initiate_card(tx).await,
            PaymentMethod::Fund => self.initiate_fund(tx).await,
            PaymentMethod::Split => self.initiate_split(tx).await,
        }
    }

    async fn initiate_card(&self, tx: BookingTransaction) -> AppResult<InitiateOutcome> {
        let handle = match self.create_handle(&tx, &tx.card_amount).await {
            Ok(handle) => handle,
            Err(PaymentError::TimeoutError {
                operation,
                timeout_secs,
            }) => {
                warn!(transaction_id = %tx.id, timeout_secs, "payment handle request timed out");
                self.flag_unknown_outcome(
                    &tx,
                    "payment handle request timed out",
                    serde_json::json!({ FLAG_HANDLE_UNCERTAIN: true }),
                )
                .await;
                return Err(AppError::timeout("Payment gateway", timeout_secs).with_context(operation));
            }
            Err(e) => {
                self.fail_initiated(&tx, BookingStatus::Failed, &e.to_string(), None)
                    .await;
                return Err(e.into());
            }
        };

        let change = StatusChange::new(
            BookingStatus::Initiated,
            BookingStatus::PaymentProcessing,
            ACTOR_ORCHESTRATOR,
        )
        .payment_ref(handle.handle_id.clone());
        let tx = self.expect_applied(&tx, change, Some(&handle.handle_id)).await?;

        Ok(InitiateOutcome {
            transaction: tx,
            client_secret: handle.client_secret,
        })
    }

    async fn initiate_fund(&self, tx: BookingTransaction) -> AppResult<InitiateOutcome> {
        self.debit_fund(&tx).await?;

        let change = StatusChange::new(
            BookingStatus::Initiated,
            BookingStatus::PaymentConfirmed,
            ACTOR_ORCHESTRATOR,
        )
        .metadata(serde_json::json!({ FLAG_FUND_DEBITED: true }));
        let tx = self.expect_applied(&tx, change, None).await?;

        let tx = match self.confirm_with_supplier(tx.id).await {
            Ok(confirmed) => confirmed,
            Err(e) if is_supplier_failure(&e) => self.status(tx.id).await?,
            Err(e) => return Err(e),
        };

        Ok(InitiateOutcome {
            transaction: tx,
            client_secret: None,
        })
    }

    async fn initiate_split(&self, tx: BookingTransaction) -> AppResult<InitiateOutcome> {
        self.debit_fund(&tx).await?;

        let handle = match self.create_handle(&tx, &tx.card_amount).await {
            Ok(handle) => handle,
            Err(PaymentError::TimeoutError {
                operation,
                timeout_secs,
            }) => {
                // Keep the debit until the handle's fate is known; cancel or
                // expiry voids it and credits the fund portion back
                warn!(transaction_id = %tx.id, timeout_secs, "payment handle request timed out");
                self.flag_unknown_outcome(
                    &tx,
                    "payment handle request timed out",
                    serde_json::json!({ FLAG_FUND_DEBITED: true, FLAG_HANDLE_UNCERTAIN: true }),
                )
                .await;
                return Err(AppError::timeout("Payment gateway", timeout_secs).with_context(operation));
            }
            Err(e) => {
                let reason = format!("card payment unavailable: {}", e);
                self.compensate_split_initiation(&tx, &reason).await;
                return Err(e.into());
            }
        };

        let change = StatusChange::new(
            BookingStatus::Initiated,
            BookingStatus::PaymentProcessing,
            ACTOR_ORCHESTRATOR,
        )
        .payment_ref(handle.handle_id.clone())
        .metadata(serde_json::json!({ FLAG_FUND_DEBITED: true }));
        let tx = match self.expect_applied(&tx, change, Some(&handle.handle_id)).await {
            Ok(tx) => tx,
            Err(e) => {
                // Whatever moved the row first never saw the debit
                if let Err(credit_err) = self.credit_fund(&tx).await {
                    self.escalate_fund_credit(&tx, &credit_err.to_string()).await;
                }
                return Err(e);
            }
        };

        Ok(InitiateOutcome {
            transaction: tx,
            client_secret: handle.client_secret,
        })
    }

    async fn create_handle(
        &self,
        tx: &BookingTransaction,
        amount: &BigDecimal,
    ) -> PaymentResult<crate::payments::types::PaymentHandle> {
        let request = PaymentHandleRequest {
            amount: Money::new(amount.clone(), tx.currency.clone()),
            reference: tx.id.to_string(),
            metadata: serde_json::json!({
                "transaction_id": tx.id,
                "booking_reference": tx.booking_reference,
            }),
        };
        bounded(
            self.config.payment_timeout,
            "create_payment_handle",
            self.payments.create_payment_handle(request),
        )
        .await
    }

    /// Debits the fund portion; on failure moves the row per the error kind
    async fn debit_fund(&self, tx: &BookingTransaction) -> AppResult<()> {
        let Some(account_id) = tx.account_id.as_deref() else {
            return Err(AppError::validation("accountId", "required for fund payments"));
        };

        let result = bounded(
            self.config.fund_timeout,
            "fund_debit",
            self.funds
                .debit(account_id, &self.fund_money(tx), &tx.id.to_string()),
        )
        .await;

        match result {
            Ok(()) => {
                info!(transaction_id = %tx.id, amount = %tx.fund_amount, "fund portion debited");
                Ok(())
            }
            Err(PaymentError::InsufficientFundsError { message }) => {
                warn!(transaction_id = %tx.id, account_id = %account_id, "insufficient funds");
                self.fail_initiated(tx, BookingStatus::PaymentFailed, "insufficient funds", None)
                    .await;
                Err(AppError::new(AppErrorKind::Domain(
                    DomainError::InsufficientFunds {
                        account_id: account_id.to_string(),
                        required: self.fund_money(tx).to_string(),
                    },
                ))
                .with_context(message))
            }
            Err(PaymentError::TimeoutError {
                operation,
                timeout_secs,
            }) => {
                // Outcome unknown: the debit may have landed
                warn!(
                    transaction_id = %tx.id,
                    timeout_secs,
                    "fund debit timed out, flagging for rollback"
                );
                self.flag_unknown_outcome(
                    tx,
                    "fund debit timed out",
                    serde_json::json!({ FLAG_DEBIT_UNCERTAIN: true }),
                )
                .await;
                Err(AppError::timeout("Fund balance service", timeout_secs).with_context(operation))
            }
            Err(e) => {
                self.fail_initiated(tx, BookingStatus::Failed, &e.to_string(), None)
                    .await;
                Err(AppError::upstream("Fund balance service", e.to_string()))
            }
        }
    }

    /// Credits the fund portion back after the card handle could not be created
    async fn compensate_split_initiation(&self, tx: &BookingTransaction, reason: &str) {
        match self.credit_fund(tx).await {
            Ok(()) => {
                self.fail_initiated(
                    tx,
                    BookingStatus::Failed,
                    reason,
                    Some(serde_json::json!({ FLAG_FUND_CREDITED: true })),
                )
                .await;
            }
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "fund credit-back failed");
                let change =
                    StatusChange::new(BookingStatus::Initiated, BookingStatus::Failed, ACTOR_ORCHESTRATOR)
                        .reason(reason)
                        .rollback_required(true);
                if let Err(e) = self.apply(tx.id, change).await {
                    error!(transaction_id = %tx.id, error = %e, "failed to mark booking failed");
                }
                self.alerts
                    .raise_logged(
                        NewAlert::new(
                            AlertType::Manual,
                            AlertSeverity::Critical,
                            format!(
                                "Fund portion {} for booking {} could not be credited back: {}",
                                self.fund_money(tx),
                                tx.booking_reference,
                                e
                            ),
                        )
                        .for_transaction(tx.id)
                        .manual_action()
                        .subject(format!("fund_credit:{}", tx.id)),
                    )
                    .await;
            }
        }
    }

    async fn credit_fund(&self, tx: &BookingTransaction) -> PaymentResult<()> {
        let Some(account_id) = tx.account_id.as_deref() else {
            return Ok(());
        };
        bounded(
            self.config.fund_timeout,
            "fund_credit",
            self.funds
                .credit(account_id, &self.fund_money(tx), &tx.id.to_string()),
        )
        .await?;
        info!(transaction_id = %tx.id, amount = %tx.fund_amount, "fund portion credited back");
        Ok(())
    }

    async fn escalate_fund_credit(&self, tx: &BookingTransaction, cause: &str) {
        self.alerts
            .raise_logged(
                NewAlert::new(
                    AlertType::Manual,
                    AlertSeverity::Critical,
                    format!(
                        "Fund portion {} for booking {} needs a manual credit-back: {}",
                        self.fund_money(tx),
                        tx.booking_reference,
                        cause
                    ),
                )
                .for_transaction(tx.id)
                .manual_action()
                .subject(format!("fund_credit:{}", tx.id)),
            )
            .await;
    }

    /// Resolves a debit whose first attempt timed out by replaying it under
    /// the same reference. The wallet dedups on that reference, so success
    /// means exactly one debit landed and insufficient funds means none did.
    async fn settle_uncertain_debit(&self, tx: BookingTransaction) -> AppResult<BookingTransaction> {
        if !tx.flag(FLAG_DEBIT_UNCERTAIN)
            || tx.flag(FLAG_FUND_DEBITED)
            || tx.flag(FLAG_FUND_CREDITED)
        {
            return Ok(tx);
        }
        let Some(account_id) = tx.account_id.clone() else {
            return Ok(tx);
        };

        let replay = bounded(
            self.config.fund_timeout,
            "fund_debit",
            self.funds
                .debit(&account_id, &self.fund_money(&tx), &tx.id.to_string()),
        )
        .await;

        let patch = match replay {
            Ok(()) => {
                info!(transaction_id = %tx.id, "timed-out debit confirmed on replay");
                serde_json::json!({ FLAG_FUND_DEBITED: true, FLAG_DEBIT_UNCERTAIN: false })
            }
            Err(PaymentError::InsufficientFundsError { .. }) => {
                info!(transaction_id = %tx.id, "timed-out debit never landed");
                serde_json::json!({ FLAG_DEBIT_UNCERTAIN: false })
            }
            Err(e) => {
                warn!(transaction_id = %tx.id, error = %e, "debit outcome still unknown");
                self.escalate_fund_credit(&tx, &format!("debit outcome unknown: {}", e))
                    .await;
                return Err(e.into());
            }
        };
        Ok(self.set_flags(&tx, patch).await)
    }

    /// Voids a handle whose creation timed out. Handle requests carry the
    /// booking id as idempotency reference, so re-requesting returns the
    /// handle the provider may already hold.
    async fn settle_uncertain_handle(&self, tx: BookingTransaction) -> AppResult<BookingTransaction> {
        if !tx.flag(FLAG_HANDLE_UNCERTAIN)
            || tx.external_payment_ref.is_some()
            || tx.flag(FLAG_HANDLE_VOIDED)
        {
            return Ok(tx);
        }

        let voided = match self.create_handle(&tx, &tx.card_amount).await {
            Ok(handle) => bounded(
                self.config.payment_timeout,
                "cancel_handle",
                self.payments.cancel_handle(&handle.handle_id),
            )
            .await
            .map(|()| handle.handle_id),
            Err(e) => Err(e),
        };

        match voided {
            Ok(handle_id) => {
                info!(transaction_id = %tx.id, handle_id = %handle_id, "orphaned payment handle voided");
                Ok(self
                    .set_flags(
                        &tx,
                        serde_json::json!({
                            FLAG_HANDLE_VOIDED: true,
                            FLAG_HANDLE_UNCERTAIN: false,
                            "voided_handle_id": handle_id,
                        }),
                    )
                    .await)
            }
            Err(e) => {
                warn!(transaction_id = %tx.id, error = %e, "could not void orphaned handle");
                self.alerts
                    .raise_logged(
                        NewAlert::new(
                            AlertType::Manual,
                            AlertSeverity::High,
                            format!(
                                "Booking {} may hold an orphaned payment handle that could not be voided: {}",
                                tx.booking_reference, e
                            ),
                        )
                        .for_transaction(tx.id)
                        .manual_action()
                        .subject(format!("void:{}", tx.id)),
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    async fn fail_initiated(
        &self,
        tx: &BookingTransaction,
        to: BookingStatus,
        reason: &str,
        metadata: Option<JsonValue>,
    ) {
        let mut change =
            StatusChange::new(BookingStatus::Initiated, to, ACTOR_ORCHESTRATOR).reason(reason);
        if let Some(patch) = metadata {
            change = change.metadata(patch);
        }
        match self.apply(tx.id, change).await {
            Ok(TransitionOutcome::Applied(failed)) => {
                self.hooks
                    .notify(&failed, NotificationType::BookingFailed, reason.to_string());
            }
            Ok(other) => {
                warn!(transaction_id = %tx.id, outcome = ?other, "failure transition not applied");
            }
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "failure transition errored");
            }
        }
    }

    /// The initiating path lost a race (e.g. a cancel landed first)
    async fn expect_applied(
        &self,
        tx: &BookingTransaction,
        change: StatusChange,
        handle_id: Option<&str>,
    ) -> AppResult<BookingTransaction> {
        let expected = change.from;
        match self.apply(tx.id, change).await? {
            TransitionOutcome::Applied(updated) => Ok(updated),
            TransitionOutcome::Conflict { current } => {
                warn!(
                    transaction_id = %tx.id,
                    expected = %expected,
                    current = %current,
                    "booking changed while initiating"
                );
                if let Some(handle_id) = handle_id {
                    if let Err(e) = bounded(
                        self.config.payment_timeout,
                        "cancel_handle",
                        self.payments.cancel_handle(handle_id),
                    )
                    .await
                    {
                        warn!(transaction_id = %tx.id, error = %e, "could not void orphaned handle");
                    }
                }
                Err(AppError::new(AppErrorKind::Domain(DomainError::StateConflict {
                    transaction_id: tx.id.to_string(),
                    expected: expected.to_string(),
                    actual: current.to_string(),
                })))
            }
            TransitionOutcome::NotFound => Err(AppError::not_found(tx.id)),
        }
    }

    // ------------------------------------------------------------------------
    // confirmWithSupplier
    // ------------------------------------------------------------------------

    /// No-op unless the booking is `payment_confirmed`. A supplier failure
    /// leaves the booking in place, raises one critical alert and returns
    /// `SupplierConfirmation`.
    pub async fn confirm_with_supplier(&self, id: Uuid) -> AppResult<BookingTransaction> {
        let tx = self.status(id).await?;
        if tx.status != BookingStatus::PaymentConfirmed {
            info!(transaction_id = %id, status = %tx.status, "supplier confirmation skipped");
            return Ok(tx);
        }

        let request = ConfirmationRequest {
            booking_reference: tx.booking_reference.clone(),
            booking_type: tx.booking_type,
            booking_data: tx.booking_data.clone(),
            customer: tx.customer.clone(),
        };

        let failure = match self.suppliers.client(&tx.supplier_id) {
            None => format!("supplier '{}' is not configured", tx.supplier_id),
            Some(client) => {
                match tokio::time::timeout(self.config.supplier_timeout, client.confirm(&request))
                    .await
                {
                    Ok(Ok(confirmation)) if confirmation.success => {
                        let reference = confirmation.provider_reference.unwrap_or_default();
                        return self.record_supplier_success(&tx, reference).await;
                    }
                    Ok(Ok(confirmation)) => confirmation
                        .message
                        .unwrap_or_else(|| "supplier rejected the booking".to_string()),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!(
                        "supplier timed out after {}s",
                        self.config.supplier_timeout.as_secs()
                    ),
                }
            }
        };

        self.escalate_supplier_failure(&tx, failure).await
    }

    async fn record_supplier_success(
        &self,
        tx: &BookingTransaction,
        supplier_reference: String,
    ) -> AppResult<BookingTransaction> {
        let change = StatusChange::new(
            BookingStatus::PaymentConfirmed,
            BookingStatus::Confirmed,
            ACTOR_ORCHESTRATOR,
        )
        .supplier_reference(supplier_reference.clone())
        .rollback_required(false);

        match self.apply(tx.id, change).await? {
            TransitionOutcome::Applied(confirmed) => {
                info!(
                    transaction_id = %tx.id,
                    supplier = %tx.supplier_id,
                    supplier_reference = %supplier_reference,
                    "booking confirmed by supplier"
                );
                self.hooks.notify(
                    &confirmed,
                    NotificationType::BookingConfirmed,
                    format!("Booking {} is confirmed", confirmed.booking_reference),
                );
                Ok(confirmed)
            }
            TransitionOutcome::Conflict { current } => {
                // Supplier holds a reservation for a booking that was cancelled meanwhile
                warn!(
                    transaction_id = %tx.id,
                    current = %current,
                    supplier_reference = %supplier_reference,
                    "supplier confirmed after booking left payment_confirmed"
                );
                if matches!(current, BookingStatus::Cancelled | BookingStatus::Refunded) {
                    self.alerts
                        .raise_logged(
                            NewAlert::new(
                                AlertType::Manual,
                                AlertSeverity::Critical,
                                format!(
                                    "Supplier {} confirmed booking {} (ref {}) after it was {}; release the reservation",
                                    tx.supplier_id, tx.booking_reference, supplier_reference, current
                                ),
                            )
                            .for_transaction(tx.id)
                            .manual_action()
                            .subject(format!("late_confirmation:{}", tx.id)),
                        )
                        .await;
                }
                self.status(tx.id).await
            }
            TransitionOutcome::NotFound => Err(AppError::not_found(tx.id)),
        }
    }

    async fn escalate_supplier_failure(
        &self,
        tx: &BookingTransaction,
        reason: String,
    ) -> AppResult<BookingTransaction> {
        error!(
            transaction_id = %tx.id,
            supplier = %tx.supplier_id,
            reason = %reason,
            "supplier confirmation failed"
        );

        let annotation = BookingAnnotation {
            failure_reason: Some(reason.clone()),
            rollback_required: Some(true),
            metadata: None,
        };
        let updated = self
            .bookings
            .annotate(tx.id, annotation)
            .await?
            .unwrap_or_else(|| tx.clone());

        self.alerts
            .raise_logged(
                NewAlert::new(
                    AlertType::Manual,
                    AlertSeverity::Critical,
                    format!(
                        "Payment captured for booking {} but supplier {} did not confirm: {}",
                        tx.booking_reference, tx.supplier_id, reason
                    ),
                )
                .for_transaction(tx.id)
                .manual_action()
                .subject(format!("supplier_confirmation:{}", tx.id)),
            )
            .await;

        self.hooks.notify(
            &updated,
            NotificationType::BookingProcessing,
            "Your booking is being processed",
        );

        Err(AppError::new(AppErrorKind::Domain(
            DomainError::SupplierConfirmation {
                transaction_id: tx.id.to_string(),
                supplier_id: tx.supplier_id.clone(),
                reason,
            },
        )))
    }

    // ------------------------------------------------------------------------
    // complete
    // ------------------------------------------------------------------------

    pub async fn complete(&self, id: Uuid) -> AppResult<BookingTransaction> {
        let change = StatusChange::new(
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            ACTOR_API,
        );
        match self.apply(id, change).await? {
            TransitionOutcome::Applied(completed) => {
                info!(transaction_id = %id, "booking completed");
                self.hooks.accrue_loyalty(&completed);
                self.hooks.notify(
                    &completed,
                    NotificationType::BookingCompleted,
                    format!("Booking {} is complete", completed.booking_reference),
                );
                Ok(completed)
            }
            TransitionOutcome::Conflict { current } => {
                Err(invalid_transition(current, BookingStatus::Completed))
            }
            TransitionOutcome::NotFound => Err(AppError::not_found(id)),
        }
    }

    // ------------------------------------------------------------------------
    // cancel
    // ------------------------------------------------------------------------

    /// Compensates first, then compare-and-sets to `cancelled`. A lost race
    /// re-reads the row and issues only the compensations not yet recorded.
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> AppResult<BookingTransaction> {
        let reason = reason.unwrap_or_else(|| "cancelled by customer".to_string());
        let mut tx = self.status(id).await?;

        for attempt in 1..=self.config.max_cancel_attempts {
            if tx.status == BookingStatus::Cancelled {
                info!(transaction_id = %id, "booking already cancelled");
                return Ok(tx);
            }
            if tx.status.is_terminal() {
                return Err(invalid_transition(tx.status, BookingStatus::Cancelled));
            }

            tx = self.compensate_for_cancel(tx).await?;

            let change = StatusChange::new(tx.status, BookingStatus::Cancelled, ACTOR_API)
                .reason(reason.clone())
                .rollback_required(false);
            match self.apply(id, change).await? {
                TransitionOutcome::Applied(cancelled) => {
                    info!(transaction_id = %id, attempt, "booking cancelled");
                    self.hooks.notify(
                        &cancelled,
                        NotificationType::BookingCancelled,
                        format!("Booking {} was cancelled", cancelled.booking_reference),
                    );
                    return Ok(cancelled);
                }
                TransitionOutcome::Conflict { current } => {
                    warn!(
                        transaction_id = %id,
                        attempt,
                        expected = %tx.status,
                        current = %current,
                        "cancel lost a race, re-reading"
                    );
                    tx = self.status(id).await?;
                }
                TransitionOutcome::NotFound => return Err(AppError::not_found(id)),
            }
        }

        Err(AppError::new(AppErrorKind::Domain(DomainError::StateConflict {
            transaction_id: id.to_string(),
            expected: tx.status.to_string(),
            actual: "changing".to_string(),
        })))
    }

    async fn compensate_for_cancel(&self, tx: BookingTransaction) -> AppResult<BookingTransaction> {
        let tx = self.settle_uncertain_handle(tx).await?;
        let mut tx = self.settle_uncertain_debit(tx).await?;

        if let Some(handle_id) = tx.external_payment_ref.clone() {
            let captured = tx.status.has_capture();
            let pending = tx.status == BookingStatus::PaymentProcessing;

            if pending && !tx.flag(FLAG_HANDLE_VOIDED) && !tx.flag(FLAG_REFUND_ISSUED) {
                match bounded(
                    self.config.payment_timeout,
                    "cancel_handle",
                    self.payments.cancel_handle(&handle_id),
                )
                .await
                {
                    Ok(()) => {
                        tx = self
                            .set_flags(&tx, serde_json::json!({ FLAG_HANDLE_VOIDED: true }))
                            .await;
                    }
                    Err(e) => {
                        // Void refused: the handle was probably captured already
                        warn!(transaction_id = %tx.id, error = %e, "void refused, refunding instead");
                        tx = self.refund_card(tx, &handle_id).await?;
                    }
                }
            } else if captured && !tx.flag(FLAG_REFUND_ISSUED) {
                tx = self.refund_card(tx, &handle_id).await?;
            }
        }

        if tx.payment_method.uses_fund()
            && tx.flag(FLAG_FUND_DEBITED)
            && !tx.flag(FLAG_FUND_CREDITED)
        {
            self.credit_fund(&tx).await.map_err(AppError::from)?;
            tx = self
                .set_flags(&tx, serde_json::json!({ FLAG_FUND_CREDITED: true }))
                .await;
        }

        Ok(tx)
    }

    async fn refund_card(
        &self,
        tx: BookingTransaction,
        handle_id: &str,
    ) -> AppResult<BookingTransaction> {
        let receipt = bounded(
            self.config.payment_timeout,
            "refund",
            self.payments.refund(handle_id, &format!("refund:{}", tx.id)),
        )
        .await?;

        info!(transaction_id = %tx.id, refund_id = %receipt.refund_id, "card payment refunded");
        Ok(self
            .set_flags(
                &tx,
                serde_json::json!({ FLAG_REFUND_ISSUED: true, "refund_id": receipt.refund_id }),
            )
            .await)
    }

    // ------------------------------------------------------------------------
    // Payment-driven handlers (webhook processor)
    // ------------------------------------------------------------------------

    /// `payment_processing -> payment_confirmed`, then supplier confirmation.
    /// Unknown handles are deferred since the row may not be persisted yet.
    pub async fn handle_payment_succeeded(&self, handle_id: &str) -> AppResult<BookingTransaction> {
        let tx = self
            .bookings
            .find_by_payment_ref(handle_id)
            .await?
            .ok_or_else(|| deferred(format!("no booking for payment handle {}", handle_id)))?;

        let change = StatusChange::new(
            BookingStatus::PaymentProcessing,
            BookingStatus::PaymentConfirmed,
            ACTOR_WEBHOOK,
        );
        match self.apply(tx.id, change).await? {
            TransitionOutcome::Applied(confirmed) => {
                info!(transaction_id = %tx.id, handle_id = %handle_id, "payment confirmed");
                self.confirm_with_supplier(confirmed.id).await
            }
            TransitionOutcome::Conflict { current } => {
                info!(
                    transaction_id = %tx.id,
                    current = %current,
                    "payment success for booking not awaiting payment, ignoring"
                );
                self.status(tx.id).await
            }
            TransitionOutcome::NotFound => Err(deferred(format!("booking {} vanished", tx.id))),
        }
    }

    /// `payment_processing -> payment_failed`; no refund since nothing was
    /// captured, but a split payment's fund portion is credited back.
    pub async fn handle_payment_failed(
        &self,
        handle_id: &str,
        reason: &str,
    ) -> AppResult<BookingTransaction> {
        let tx = self
            .bookings
            .find_by_payment_ref(handle_id)
            .await?
            .ok_or_else(|| deferred(format!("no booking for payment handle {}", handle_id)))?;

        let change = StatusChange::new(
            BookingStatus::PaymentProcessing,
            BookingStatus::PaymentFailed,
            ACTOR_WEBHOOK,
        )
        .reason(reason);
        let failed = match self.apply(tx.id, change).await? {
            TransitionOutcome::Applied(failed) => failed,
            TransitionOutcome::Conflict { current } => {
                info!(
                    transaction_id = %tx.id,
                    current = %current,
                    "payment failure for booking not awaiting payment, ignoring"
                );
                return self.status(tx.id).await;
            }
            TransitionOutcome::NotFound => {
                return Err(deferred(format!("booking {} vanished", tx.id)))
            }
        };

        warn!(transaction_id = %tx.id, reason = %reason, "card payment failed");

        let failed = if failed.payment_method == PaymentMethod::Split
            && failed.flag(FLAG_FUND_DEBITED)
            && !failed.flag(FLAG_FUND_CREDITED)
        {
            match self.credit_fund(&failed).await {
                Ok(()) => {
                    self.set_flags(&failed, serde_json::json!({ FLAG_FUND_CREDITED: true }))
                        .await
                }
                Err(e) => {
                    error!(transaction_id = %tx.id, error = %e, "fund credit-back failed");
                    let annotation = BookingAnnotation {
                        rollback_required: Some(true),
                        ..Default::default()
                    };
                    if let Err(e) = self.bookings.annotate(tx.id, annotation).await {
                        error!(transaction_id = %tx.id, error = %e, "failed to flag rollback");
                    }
                    self.alerts
                        .raise_logged(
                            NewAlert::new(
                                AlertType::Manual,
                                AlertSeverity::Critical,
                                format!(
                                    "Card payment failed for booking {} and fund portion {} could not be credited back: {}",
                                    failed.booking_reference,
                                    self.fund_money(&failed),
                                    e
                                ),
                            )
                            .for_transaction(tx.id)
                            .manual_action()
                            .subject(format!("fund_credit:{}", tx.id)),
                        )
                        .await;
                    failed
                }
            }
        } else {
            failed
        };

        self.hooks.notify(
            &failed,
            NotificationType::BookingFailed,
            format!("Payment for booking {} failed: {}", failed.booking_reference, reason),
        );
        Ok(failed)
    }

    // ------------------------------------------------------------------------
    // expire (trigger engine remedy)
    // ------------------------------------------------------------------------

    /// Voids any payment handle and credits back any fund portion before
    /// moving the booking to `expired`. A failed void skips the expiry and
    /// escalates instead.
    pub async fn expire(&self, tx: &BookingTransaction) -> AppResult<ExpireOutcome> {
        if !tx.status.can_transition_to(BookingStatus::Expired) {
            return Ok(ExpireOutcome::Skipped {
                reason: format!("status {} cannot expire", tx.status),
            });
        }

        let tx = match self.settle_uncertain_handle(tx.clone()).await {
            Ok(tx) => tx,
            Err(e) => {
                return Ok(ExpireOutcome::Skipped {
                    reason: format!("orphaned handle void failed: {}", e),
                })
            }
        };
        let mut tx = match self.settle_uncertain_debit(tx).await {
            Ok(tx) => tx,
            Err(e) => {
                return Ok(ExpireOutcome::Skipped {
                    reason: format!("debit outcome unknown: {}", e),
                })
            }
        };

        if let Some(handle_id) = tx.external_payment_ref.clone() {
            if !tx.flag(FLAG_HANDLE_VOIDED) {
                if let Err(e) = bounded(
                    self.config.payment_timeout,
                    "cancel_handle",
                    self.payments.cancel_handle(&handle_id),
                )
                .await
                {
                    warn!(transaction_id = %tx.id, error = %e, "void failed, not expiring");
                    self.alerts
                        .raise_logged(
                            NewAlert::new(
                                AlertType::Manual,
                                AlertSeverity::High,
                                format!(
                                    "Stuck booking {} could not be expired: payment handle {} void failed: {}",
                                    tx.booking_reference, handle_id, e
                                ),
                            )
                            .for_transaction(tx.id)
                            .manual_action()
                            .subject(format!("expire:{}", tx.id)),
                        )
                        .await;
                    return Ok(ExpireOutcome::Skipped {
                        reason: format!("void failed: {}", e),
                    });
                }
                tx = self
                    .set_flags(&tx, serde_json::json!({ FLAG_HANDLE_VOIDED: true }))
                    .await;
            }
        }

        if tx.payment_method.uses_fund()
            && tx.flag(FLAG_FUND_DEBITED)
            && !tx.flag(FLAG_FUND_CREDITED)
        {
            if let Err(e) = self.credit_fund(&tx).await {
                warn!(transaction_id = %tx.id, error = %e, "fund credit-back failed, not expiring");
                self.escalate_fund_credit(&tx, &format!("credit-back during expiry failed: {}", e))
                    .await;
                return Ok(ExpireOutcome::Skipped {
                    reason: format!("credit-back failed: {}", e),
                });
            }
            tx = self
                .set_flags(&tx, serde_json::json!({ FLAG_FUND_CREDITED: true }))
                .await;
        }

        let change = StatusChange::new(tx.status, BookingStatus::Expired, ACTOR_TRIGGER_ENGINE)
            .reason("expired after stalling in a pre-capture state")
            .rollback_required(false);
        match self.apply(tx.id, change).await? {
            TransitionOutcome::Applied(expired) => {
                self.hooks.notify(
                    &expired,
                    NotificationType::BookingFailed,
                    format!("Booking {} expired before payment completed", expired.booking_reference),
                );
                Ok(ExpireOutcome::Expired(expired))
            }
            TransitionOutcome::Conflict { current } => Ok(ExpireOutcome::Skipped {
                reason: format!("status moved to {}", current),
            }),
            TransitionOutcome::NotFound => Ok(ExpireOutcome::Skipped {
                reason: "booking not found".to_string(),
            }),
        }
    }
}

/// Supplier failures are already escalated; callers treat them as handled
pub fn is_supplier_failure(err: &AppError) -> bool {
    matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::SupplierConfirmation { .. })
    )
}
