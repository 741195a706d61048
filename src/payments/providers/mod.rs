//! Payment gateway implementations
//!
//! Concrete implementations of the PaymentGateway trait.

pub mod mpesa;

pub use mpesa::{MpesaConfig, MpesaProvider};
