//! Supplier lookup table: booking type -> prioritized supplier clients

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::suppliers::client::SupplierClient;
use crate::suppliers::types::BookingType;

#[derive(Clone)]
pub struct SupplierRoute {
    pub supplier_id: String,
    pub priority: u32,
    pub client: Arc<dyn SupplierClient>,
}

#[derive(Clone, Default)]
pub struct SupplierRegistry {
    routes: HashMap<BookingType, Vec<SupplierRoute>>,
}

impl SupplierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, booking_type: BookingType, priority: u32, client: Arc<dyn SupplierClient>) {
        let routes = self.routes.entry(booking_type).or_default();
        routes.push(SupplierRoute {
            supplier_id: client.id().to_string(),
            priority,
            client,
        });
        routes.sort_by_key(|route| route.priority);
    }

    pub fn with(mut self, booking_type: BookingType, priority: u32, client: Arc<dyn SupplierClient>) -> Self {
        self.register(booking_type, priority, client);
        self
    }

    /// Best supplier for `booking_type`, skipping demoted ones unless every
    /// candidate is demoted.
    pub fn select(&self, booking_type: BookingType, demoted: &HashSet<String>) -> Option<&SupplierRoute> {
        let routes = self.routes.get(&booking_type)?;
        routes
            .iter()
            .find(|route| !demoted.contains(&route.supplier_id))
            .or_else(|| routes.first())
    }

    pub fn client(&self, supplier_id: &str) -> Option<Arc<dyn SupplierClient>> {
        self.routes
            .values()
            .flatten()
            .find(|route| route.supplier_id == supplier_id)
            .map(|route| route.client.clone())
    }

    pub fn supplier_ids(&self) -> HashSet<String> {
        self.routes
            .values()
            .flatten()
            .map(|route| route.supplier_id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
