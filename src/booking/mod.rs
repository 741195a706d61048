//! Booking workflow
//!
//! Reservation validation and the push → confirm → receipt sequence.

pub mod errors;
pub mod orchestrator;
pub mod types;
pub mod validation;

pub use errors::{BookingError, ValidationError};
pub use orchestrator::{BookingConfig, BookingOrchestrator};
pub use types::{BookingRequest, BookingResult, BookingState, ValidatedBooking};
