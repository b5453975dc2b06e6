/// Commerce services module - checkout and catalog business logic
pub mod checkout_service;
pub mod checkout_state;
pub mod pricing;
pub mod product_catalog_service;

// Re-export services for convenience
pub use checkout_service::{
    CartLine, CheckoutService, CreateCheckoutInput, CreatedCheckout, NotificationOutcome,
    ReconcileReport,
};
pub use product_catalog_service::{
    CatalogEntry, CatalogLookup, CreateProductInput, ProductCatalogService,
};
