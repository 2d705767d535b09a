//! Travel supplier collaborators: confirmation clients, routing table and health feed

pub mod client;
pub mod error;
pub mod health;
pub mod registry;
pub mod types;

pub use client::{HttpSupplierClient, SupplierClient};
pub use error::{SupplierError, SupplierResult};
pub use health::{HttpProviderHealthSource, ProviderHealthSource};
pub use registry::{SupplierRegistry, SupplierRoute};
pub use types::{BookingType, ProviderHealthSample, ProviderHealthStatus, SupplierConfirmation};
