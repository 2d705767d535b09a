use crate::payments::error::PaymentResult;
use crate::payments::types::{Money, PaymentHandle, PaymentHandleRequest, RefundReceipt};
use async_trait::async_trait;

/// Card payment processor
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_payment_handle(
        &self,
        request: PaymentHandleRequest,
    ) -> PaymentResult<PaymentHandle>;

    /// Refund a captured handle. `idempotency_key` makes repeated calls safe.
    async fn refund(&self, handle_id: &str, idempotency_key: &str) -> PaymentResult<RefundReceipt>;

    /// Void a handle that has not been captured yet
    async fn cancel_handle(&self, handle_id: &str) -> PaymentResult<()>;
}

/// Stored-fund balance service
#[async_trait]
pub trait FundBalanceService: Send + Sync {
    /// Fails with `InsufficientFundsError` when the balance cannot cover `amount`
    async fn debit(&self, account_id: &str, amount: &Money, reference: &str) -> PaymentResult<()>;

    async fn credit(&self, account_id: &str, amount: &Money, reference: &str) -> PaymentResult<()>;
}
