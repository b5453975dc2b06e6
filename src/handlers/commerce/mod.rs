/// Commerce API handlers module
pub mod checkout;

// Re-export route builders
pub use checkout::checkout_routes;
