//! Travel booking transaction lifecycle and payment-webhook reconciliation

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod suppliers;
pub mod workers;
