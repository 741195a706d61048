use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reservation form as submitted by the booking UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    /// Opaque identity from whatever signed the customer in
    #[serde(default)]
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    /// Hotel or destination label shown on the receipt
    pub hotel: String,
    pub check_in: String,
    pub check_out: String,
    pub guests: u32,
    /// Rate per guest in whole currency units
    pub rate: u64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// A request that passed validation, with the derived fields filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBooking {
    pub booking_id: Uuid,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub email: String,
    /// Normalized `2547XXXXXXXX` / `2541XXXXXXXX`
    pub phone: String,
    pub hotel: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub total_amount: u64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    Submitted,
    PaymentPending,
    PaymentConfirmed,
    NotificationSent,
    PaymentFailed,
    PaymentTimedOut,
    /// Paid, but the receipt could not be sent
    NotifiedWithError,
}

impl BookingState {
    /// Forward moves of the booking state machine
    pub fn can_advance_to(&self, next: BookingState) -> bool {
        use BookingState::*;
        matches!(
            (self, next),
            (Submitted, PaymentPending)
                | (PaymentPending, PaymentConfirmed | PaymentFailed | PaymentTimedOut)
                | (PaymentConfirmed, NotificationSent | NotifiedWithError)
        )
    }

    /// The customer has paid in these states
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            Self::PaymentConfirmed | Self::NotificationSent | Self::NotifiedWithError
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResult {
    pub booking_id: Uuid,
    pub attempt_id: Option<Uuid>,
    pub state: BookingState,
    pub total_amount: u64,
    pub currency: String,
    /// Gateway transaction receipt once paid
    pub receipt_number: Option<String>,
    /// User-facing wording
    pub message: String,
}
