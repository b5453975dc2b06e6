pub mod admin;
pub mod commerce;
pub mod common;
pub mod health;
pub mod payment_webhooks;

use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::repositories::CheckoutRepository;
use crate::services::{
    commerce::{CheckoutService, ProductCatalogService},
    orders::OrderService,
};
use crate::db::DbPool;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub product_catalog: Arc<ProductCatalogService>,
    pub checkout: Arc<CheckoutService>,
    pub order: Arc<OrderService>,
}

impl AppServices {
    /// Wire the SeaORM-backed collaborators around the given payment gateway.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        currency: &str,
    ) -> Self {
        let product_catalog = Arc::new(ProductCatalogService::new(db_pool.clone()));
        let order = Arc::new(OrderService::new(db_pool.clone()));
        let store = Arc::new(CheckoutRepository::new(db_pool));

        let checkout = Arc::new(CheckoutService::new(
            store,
            gateway,
            product_catalog.clone(),
            order.clone(),
            event_sender,
            currency,
        ));

        Self {
            product_catalog,
            checkout,
            order,
        }
    }
}
