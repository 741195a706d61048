//! Booking workflow orchestrator
//!
//! Validates a reservation, pushes the payment prompt, waits (bounded) for
//! the gateway's verdict and sends the receipt once paid. This is the only
//! place that decides what the customer is told.

use crate::booking::errors::BookingError;
use crate::booking::types::{BookingRequest, BookingResult, BookingState, ValidatedBooking};
use crate::notifications::BookingReceipt;
use crate::payments::errors::PaymentError;
use crate::payments::listener::{ConfirmationListener, PendingConfirmation};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{PaymentStatus, StkPushRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const TRANSACTION_DESCRIPTION: &str = "Hotel booking";

#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// How long a booking waits for the payer to answer the prompt
    pub confirmation_timeout: Duration,
    /// Extra pushes after a transport failure, each with a new attempt id
    pub push_retries: u32,
    pub currency: String,
    /// How long settled attempts stay visible to status polling
    pub attempt_retention: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(90),
            push_retries: 0,
            currency: "KES".to_string(),
            attempt_retention: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone)]
pub struct BookingOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    listener: ConfirmationListener,
    config: BookingConfig,
}

impl BookingOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        listener: ConfirmationListener,
        config: BookingConfig,
    ) -> Self {
        Self {
            gateway,
            listener,
            config,
        }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Run one booking from submission to its final state.
    ///
    /// Only invalid input is an `Err`; every payment outcome, including
    /// failures, comes back as a `BookingResult`.
    pub async fn submit_booking(&self, request: BookingRequest) -> Result<BookingResult, BookingError> {
        let booking = request.validate(&self.config.currency).map_err(|e| {
            info!("Booking rejected: {}", e);
            e
        })?;

        info!(
            "Booking submitted: booking={}, hotel={}, guests={}, total={} {}",
            booking.booking_id, booking.hotel, booking.guests, booking.total_amount, booking.currency
        );

        let mut state = BookingState::Submitted;
        let receipt = receipt_for(&booking);
        let mut retries_left = self.config.push_retries;

        loop {
            let push = StkPushRequest::new(
                booking.phone.clone(),
                booking.total_amount,
                account_reference(booking.booking_id),
                TRANSACTION_DESCRIPTION,
            );
            let attempt_id = push.attempt_id;
            let mut pending = self.listener.track(
                &push,
                Some(booking.booking_id),
                Some((booking.email.clone(), receipt.clone())),
            )?;

            advance(&booking, &mut state, BookingState::PaymentPending);
            info!(
                "Booking {} payment pending: attempt={}",
                booking.booking_id, attempt_id
            );

            match self.gateway.initiate_push(push).await {
                Ok(ack) if ack.acknowledged => {
                    self.listener.acknowledge(&ack)?;
                    let status = pending.wait(self.config.confirmation_timeout).await;
                    return Ok(self.conclude(&booking, &mut state, &pending, status).await);
                }
                Ok(ack) => {
                    let reason = ack
                        .response_description
                        .unwrap_or_else(|| "push request not accepted".to_string());
                    if let Some(status) = self.listener.fail(attempt_id, reason.clone())? {
                        return Ok(self.conclude(&booking, &mut state, &pending, status).await);
                    }
                    warn!(
                        "Booking {} push not acknowledged: {}",
                        booking.booking_id, reason
                    );
                    return Ok(self.finish(
                        &booking,
                        &mut state,
                        Some(attempt_id),
                        BookingState::PaymentFailed,
                        None,
                        format!(
                            "The payment request was not accepted: {}. No payment was taken.",
                            reason
                        ),
                    ));
                }
                Err(e) => {
                    // The prompt got through if the payer already answered it.
                    if let Some(status) = self.listener.fail(attempt_id, e.to_string())? {
                        warn!(
                            "Booking {} push reported '{}' after the payer answered, not retrying",
                            booking.booking_id, e
                        );
                        return Ok(self.conclude(&booking, &mut state, &pending, status).await);
                    }
                    if e.is_retryable() && retries_left > 0 {
                        retries_left -= 1;
                        warn!(
                            "Booking {} push failed ({}), retrying with a new attempt ({} left)",
                            booking.booking_id, e, retries_left
                        );
                        continue;
                    }
                    error!("Booking {} push failed: {}", booking.booking_id, e);
                    return Ok(self.finish(
                        &booking,
                        &mut state,
                        Some(attempt_id),
                        BookingState::PaymentFailed,
                        None,
                        push_failure_message(&e),
                    ));
                }
            }
        }
    }

    /// Turn the attempt's final payment status into the booking result,
    /// sending the receipt when paid.
    async fn conclude(
        &self,
        booking: &ValidatedBooking,
        state: &mut BookingState,
        pending: &PendingConfirmation,
        status: PaymentStatus,
    ) -> BookingResult {
        let attempt_id = pending.attempt_id();

        match status {
            PaymentStatus::Confirmed { receipt_number } => {
                info!(
                    "Booking {} paid: attempt={}, receipt={:?}",
                    booking.booking_id, attempt_id, receipt_number
                );
                let Some(job) = pending.claim_receipt() else {
                    return self.finish(
                        booking,
                        state,
                        Some(attempt_id),
                        BookingState::PaymentConfirmed,
                        receipt_number,
                        format!(
                            "Payment received. Your booking at {} is confirmed.",
                            booking.hotel
                        ),
                    );
                };
                advance(booking, state, BookingState::PaymentConfirmed);

                // Spawned so an abandoned request cannot cut the send short.
                let listener = self.listener.clone();
                let delivery = tokio::spawn(async move { listener.deliver_receipt(job).await });
                let sent = match delivery.await {
                    Ok((_, result)) => result.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };

                match sent {
                    Ok(()) => self.finish(
                        booking,
                        state,
                        Some(attempt_id),
                        BookingState::NotificationSent,
                        receipt_number,
                        format!(
                            "Payment received. Your booking at {} is confirmed and a receipt was sent to {}.",
                            booking.hotel, booking.email
                        ),
                    ),
                    Err(reason) => {
                        warn!(
                            "Booking {} paid but receipt failed: {}",
                            booking.booking_id, reason
                        );
                        self.finish(
                            booking,
                            state,
                            Some(attempt_id),
                            BookingState::NotifiedWithError,
                            receipt_number,
                            format!(
                                "Payment received and your booking at {} is confirmed, but we could not email your receipt. Please keep your M-Pesa confirmation message.",
                                booking.hotel
                            ),
                        )
                    }
                }
            }
            PaymentStatus::Failed { reason } => self.finish(
                booking,
                state,
                Some(attempt_id),
                BookingState::PaymentFailed,
                None,
                format!("Payment was not completed: {}.", reason),
            ),
            PaymentStatus::TimedOut => self.finish(
                booking,
                state,
                Some(attempt_id),
                BookingState::PaymentTimedOut,
                None,
                "We did not receive a payment confirmation in time. If you approved the payment, contact us with your M-Pesa message before trying again.".to_string(),
            ),
            PaymentStatus::Initiated | PaymentStatus::AwaitingConfirmation => self.finish(
                booking,
                state,
                Some(attempt_id),
                BookingState::PaymentPending,
                None,
                "Your payment is still being processed.".to_string(),
            ),
        }
    }

    fn finish(
        &self,
        booking: &ValidatedBooking,
        state: &mut BookingState,
        attempt_id: Option<Uuid>,
        last: BookingState,
        receipt_number: Option<String>,
        message: String,
    ) -> BookingResult {
        advance(booking, state, last);
        info!(
            "Booking {} finished in {:?}",
            booking.booking_id, state
        );
        BookingResult {
            booking_id: booking.booking_id,
            attempt_id,
            state: *state,
            total_amount: booking.total_amount,
            currency: booking.currency.clone(),
            receipt_number,
            message,
        }
    }
}

fn advance(booking: &ValidatedBooking, state: &mut BookingState, next: BookingState) {
    if *state == next {
        return;
    }
    if !state.can_advance_to(next) {
        warn!(
            "Booking {} jumped from {:?} to {:?}",
            booking.booking_id, state, next
        );
    }
    debug!("Booking {} {:?} -> {:?}", booking.booking_id, state, next);
    *state = next;
}

fn receipt_for(booking: &ValidatedBooking) -> BookingReceipt {
    BookingReceipt {
        booking_id: booking.booking_id,
        customer_name: booking.customer_name.clone(),
        hotel: booking.hotel.clone(),
        check_in: booking.check_in,
        check_out: booking.check_out,
        guests: booking.guests,
        total_amount: booking.total_amount,
        currency: booking.currency.clone(),
        phone: booking.phone.clone(),
        payment_reference: None,
    }
}

/// The gateway caps account references at 12 characters.
pub fn account_reference(booking_id: Uuid) -> String {
    let simple = booking_id.simple().to_string();
    format!("BK{}", simple[..8].to_ascii_uppercase())
}

fn push_failure_message(error: &PaymentError) -> String {
    match error {
        PaymentError::GatewayRejected { message, .. } => format!(
            "The payment request was declined: {}. Please check your phone number and try again.",
            message
        ),
        PaymentError::NetworkError { .. } => {
            "We could not reach the payment service. No payment was taken, please try again.".to_string()
        }
        PaymentError::AuthError { .. } | PaymentError::ConfigError { .. } => {
            "Payments are temporarily unavailable. Please try again shortly.".to_string()
        }
    }
}
