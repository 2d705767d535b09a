//! Payment collaborators: card processor, fund balance and signed webhooks

pub mod error;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;
pub mod webhook;

pub use error::{PaymentError, PaymentResult};
pub use provider::{FundBalanceService, PaymentProvider};
pub use types::{Money, PaymentHandle, PaymentHandleRequest, PaymentMethod, RefundReceipt};
