pub mod fund_wallet;
pub mod gateway;

pub use fund_wallet::HttpFundWallet;
pub use gateway::HttpPaymentGateway;
