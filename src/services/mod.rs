// Checkout orchestration, pricing and the product catalog
pub mod commerce;

// Order materialization
pub mod orders;
