use thiserror::Error;

/// Rejected booking input. Never reaches the gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("{field} must be a date in YYYY-MM-DD format, got '{value}'")]
    InvalidDate { field: &'static str, value: String },

    #[error("check-out ({check_out}) must be after check-in ({check_in})")]
    DateOrder { check_in: String, check_out: String },

    #[error("at least one guest is required")]
    NoGuests,

    #[error("'{value}' is not a callable M-Pesa phone number")]
    InvalidPhone { value: String },

    #[error("'{value}' is not a valid email address")]
    InvalidEmail { value: String },

    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("total amount overflows")]
    AmountOverflow,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Invalid booking request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Payment attempt bookkeeping failed: {0}")]
    Attempt(#[from] crate::payments::attempts::AttemptError),
}
