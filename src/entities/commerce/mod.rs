/// Commerce entities module
pub mod checkout;

// Re-export entities
pub use checkout::{
    CheckoutLineItem, CheckoutStatus, Entity as Checkout, LineItems, Model as CheckoutModel,
};
