//! Payment confirmation listener
//!
//! Turns the gateway's asynchronous callbacks into attempt state changes and
//! makes sure a confirmed payment gets exactly one receipt attempt, whether
//! or not a booking is still waiting for it.

use crate::notifications::{BookingReceipt, DispatchResult, NotificationRecord, ReceiptDispatcher};
use crate::payments::attempts::{
    AttemptError, AttemptRegistry, AttemptSnapshot, ReceiptJob, Resolution,
};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{
    PaymentStatus, PushAcknowledgement, StkCallbackEnvelope, StkPushRequest,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Query parameters appended to the callback URL by the gateway client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(rename = "ref")]
    pub attempt_ref: Option<String>,
    #[serde(rename = "sig")]
    pub signature: Option<String>,
}

/// What the listener did with a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Confirmed { attempt_id: Uuid },
    Failed { attempt_id: Uuid, reason: String },
    /// Replay for an attempt that was already Confirmed or Failed
    Duplicate { attempt_id: Uuid },
    /// Arrived after the booking gave up waiting
    DiscardedAfterTimeout { attempt_id: Uuid },
    /// Arrived before the push acknowledgement was recorded; held until it is
    Premature { attempt_id: Uuid },
    UnknownAttempt,
    Unauthenticated,
    Malformed,
}

#[derive(Clone)]
pub struct ConfirmationListener {
    registry: AttemptRegistry,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: ReceiptDispatcher,
}

impl ConfirmationListener {
    pub fn new(
        registry: AttemptRegistry,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: ReceiptDispatcher,
    ) -> Self {
        Self {
            registry,
            gateway,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &AttemptRegistry {
        &self.registry
    }

    /// Register an attempt and start waiting on it.
    ///
    /// Dropping the returned guard before the attempt resolves abandons the
    /// wait but not the payment: a later confirmation still sends the receipt.
    pub fn track(
        &self,
        request: &StkPushRequest,
        booking_id: Option<Uuid>,
        receipt: Option<(String, BookingReceipt)>,
    ) -> Result<PendingConfirmation, AttemptError> {
        self.registry.register(request, booking_id, receipt)?;
        let rx = self.registry.watch(request.attempt_id)?;
        Ok(PendingConfirmation {
            attempt_id: request.attempt_id,
            rx,
            listener: self.clone(),
        })
    }

    pub fn acknowledge(&self, ack: &PushAcknowledgement) -> Result<(), AttemptError> {
        self.registry.mark_awaiting(ack)
    }

    /// Fail an unacknowledged attempt. Returns the callback's outcome instead
    /// when the gateway already answered for it.
    pub fn fail(
        &self,
        attempt_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<Option<PaymentStatus>, AttemptError> {
        self.registry.mark_failed(attempt_id, reason)
    }

    pub fn attempt(&self, attempt_id: Uuid) -> Option<AttemptSnapshot> {
        self.registry.get(attempt_id)
    }

    /// Handle one gateway callback body. Never fails; every outcome is logged.
    pub fn on_callback(&self, body: &[u8], query: &CallbackQuery) -> CallbackOutcome {
        let envelope: StkCallbackEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Discarding malformed payment callback: {}", e);
                return CallbackOutcome::Malformed;
            }
        };
        let callback = envelope.body.stk_callback;

        let attempt_ref = query.attempt_ref.as_deref().unwrap_or_default();
        if !self
            .gateway
            .validate_callback_signature(attempt_ref, query.signature.as_deref())
        {
            warn!(
                "Discarding payment callback with bad signature: ref={:?}, checkout={:?}",
                query.attempt_ref, callback.checkout_request_id
            );
            return CallbackOutcome::Unauthenticated;
        }

        let by_checkout = callback
            .checkout_request_id
            .as_deref()
            .and_then(|id| self.registry.find_by_checkout(id));
        let by_ref = Uuid::parse_str(attempt_ref).ok();

        let attempt_id = match (by_checkout, by_ref) {
            (Some(a), Some(b)) if a != b => {
                warn!(
                    "Callback ref {} does not match checkout {:?}, discarding",
                    b, callback.checkout_request_id
                );
                return CallbackOutcome::Unauthenticated;
            }
            (Some(id), _) | (None, Some(id)) => id,
            (None, None) => {
                warn!(
                    "Callback for unknown checkout request {:?}",
                    callback.checkout_request_id
                );
                return CallbackOutcome::UnknownAttempt;
            }
        };

        let result = callback.result();
        match self.registry.resolve(attempt_id, &result) {
            Resolution::Applied {
                status,
                receipt_job,
            } => {
                if let Some(job) = receipt_job {
                    info!(
                        "Attempt {} confirmed with nobody waiting, sending receipt from listener",
                        attempt_id
                    );
                    self.spawn_receipt(job);
                }
                match status {
                    PaymentStatus::Confirmed { receipt_number } => {
                        info!(
                            "Payment confirmed: attempt={}, receipt={:?}",
                            attempt_id, receipt_number
                        );
                        CallbackOutcome::Confirmed { attempt_id }
                    }
                    PaymentStatus::Failed { reason } => {
                        info!("Payment failed: attempt={}, reason={}", attempt_id, reason);
                        CallbackOutcome::Failed { attempt_id, reason }
                    }
                    _ => CallbackOutcome::Premature { attempt_id },
                }
            }
            Resolution::AlreadyTerminal(PaymentStatus::TimedOut) => {
                warn!(
                    "Late callback for timed out attempt {} discarded: {:?}",
                    attempt_id, result
                );
                CallbackOutcome::DiscardedAfterTimeout { attempt_id }
            }
            Resolution::AlreadyTerminal(status) => {
                info!(
                    "Duplicate callback for attempt {} ignored (already {})",
                    attempt_id,
                    status.label()
                );
                CallbackOutcome::Duplicate { attempt_id }
            }
            Resolution::Deferred => {
                info!(
                    "Callback for attempt {} arrived before its acknowledgement, holding it",
                    attempt_id
                );
                CallbackOutcome::Premature { attempt_id }
            }
            Resolution::NotFound => CallbackOutcome::UnknownAttempt,
        }
    }

    /// Send a claimed receipt and attach the record to its attempt.
    pub async fn deliver_receipt(&self, job: ReceiptJob) -> (NotificationRecord, DispatchResult<()>) {
        let (record, result) = self
            .dispatcher
            .send_receipt(&job.recipient, &job.receipt)
            .await;
        self.registry.record_notification(job.attempt_id, record.clone());
        (record, result)
    }

    fn spawn_receipt(&self, job: ReceiptJob) {
        let listener = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    listener.deliver_receipt(job).await;
                });
            }
            Err(_) => error!(
                "No runtime to send receipt for attempt {}, receipt lost",
                job.attempt_id
            ),
        }
    }
}

/// A booking's wait on one attempt
pub struct PendingConfirmation {
    attempt_id: Uuid,
    rx: watch::Receiver<PaymentStatus>,
    listener: ConfirmationListener,
}

impl PendingConfirmation {
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Wait for a terminal status; on timeout the attempt becomes `TimedOut`
    /// unless a callback got there first.
    pub async fn wait(&mut self, timeout: Duration) -> PaymentStatus {
        let waited = tokio::time::timeout(timeout, self.rx.wait_for(PaymentStatus::is_terminal)).await;
        match waited {
            Ok(Ok(status)) => (*status).clone(),
            Ok(Err(_)) => self
                .listener
                .registry
                .status(self.attempt_id)
                .unwrap_or(PaymentStatus::TimedOut),
            Err(_) => {
                info!(
                    "No callback for attempt {} within {}s",
                    self.attempt_id,
                    timeout.as_secs()
                );
                self.listener
                    .registry
                    .expire(self.attempt_id)
                    .unwrap_or(PaymentStatus::TimedOut)
            }
        }
    }

    /// Take over the receipt once confirmed. `None` if already taken.
    pub fn claim_receipt(&self) -> Option<ReceiptJob> {
        self.listener.registry.claim_receipt(self.attempt_id)
    }
}

impl Drop for PendingConfirmation {
    fn drop(&mut self) {
        if let Some(job) = self.listener.registry.unwatch(self.attempt_id) {
            info!(
                "Attempt {} confirmed after its booking stopped waiting, sending receipt",
                self.attempt_id
            );
            self.listener.spawn_receipt(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_query_parses_ref_and_sig() {
        let query: CallbackQuery =
            serde_json::from_str(r#"{"ref":"abc","sig":"0f"}"#).unwrap();
        assert_eq!(query.attempt_ref.as_deref(), Some("abc"));
        assert_eq!(query.signature.as_deref(), Some("0f"));
    }
}
