pub mod trigger_engine;
pub mod webhook_retry;
