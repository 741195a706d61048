//! Payment gateway integration module
//!
//! Push-payment client (M-Pesa STK push), the attempt registry that tracks
//! each push until the gateway reports back, and the callback listener.

pub mod attempts;
pub mod errors;
pub mod listener;
pub mod providers;
pub mod traits;
pub mod types;

pub use attempts::{AttemptRegistry, SweepStats};
pub use errors::{PaymentError, PaymentResult};
pub use listener::{CallbackOutcome, ConfirmationListener};
pub use traits::PaymentGateway;
