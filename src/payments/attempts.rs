//! In-memory registry of payment attempts
//!
//! Holds every attempt from registration until its terminal state, indexes
//! them by the gateway's checkout request id, and broadcasts status changes
//! through a `watch` channel per attempt. All mutations go through short,
//! non-async critical sections on one mutex so that "who sends the receipt"
//! is decided atomically.

use crate::notifications::{BookingReceipt, NotificationRecord};
use crate::payments::types::{
    CallbackResult, PaymentAttempt, PaymentStatus, PushAcknowledgement, StkPushRequest,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error("Payment attempt {0} already registered")]
    Duplicate(Uuid),

    #[error("Payment attempt {0} not found")]
    NotFound(Uuid),

    #[error("Payment attempt {attempt_id} cannot move from {from} to {to}")]
    InvalidTransition {
        attempt_id: Uuid,
        from: &'static str,
        to: &'static str,
    },
}

/// A receipt that somebody now owns the duty to send
#[derive(Debug, Clone)]
pub struct ReceiptJob {
    pub attempt_id: Uuid,
    pub recipient: String,
    pub receipt: BookingReceipt,
}

/// Attempt plus its notification, as exposed to status polling
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSnapshot {
    #[serde(flatten)]
    pub attempt: PaymentAttempt,
    pub notification: Option<NotificationRecord>,
}

/// What applying a callback did
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Status moved to the reported terminal state
    Applied {
        status: PaymentStatus,
        /// Set when nobody is waiting on the attempt any more
        receipt_job: Option<ReceiptJob>,
    },
    /// Attempt was already terminal; nothing changed
    AlreadyTerminal(PaymentStatus),
    /// Callback arrived before the acknowledgement was recorded; it is
    /// applied as soon as it is
    Deferred,
    NotFound,
}

/// What one `sweep` pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Unwatched attempts moved to `TimedOut`
    pub expired: usize,
    /// Settled attempts dropped from memory
    pub removed: usize,
}

struct ReceiptDuty {
    recipient: String,
    receipt: BookingReceipt,
    claimed: bool,
}

struct AttemptEntry {
    attempt: PaymentAttempt,
    status_tx: watch::Sender<PaymentStatus>,
    watchers: usize,
    receipt: Option<ReceiptDuty>,
    notification: Option<NotificationRecord>,
    early_result: Option<CallbackResult>,
}

impl AttemptEntry {
    fn transition(&mut self, next: PaymentStatus) -> Result<(), AttemptError> {
        if !self.attempt.status.can_transition_to(&next) {
            return Err(AttemptError::InvalidTransition {
                attempt_id: self.attempt.attempt_id,
                from: self.attempt.status.label(),
                to: next.label(),
            });
        }
        debug!(
            "Attempt {} {} -> {}",
            self.attempt.attempt_id,
            self.attempt.status.label(),
            next.label()
        );
        self.attempt.status = next.clone();
        self.attempt.updated_at = Utc::now();
        self.status_tx.send_replace(next);
        Ok(())
    }

    fn claim_receipt(&mut self) -> Option<ReceiptJob> {
        let receipt_number = match &self.attempt.status {
            PaymentStatus::Confirmed { receipt_number } => receipt_number.clone(),
            _ => return None,
        };
        let duty = self.receipt.as_mut().filter(|d| !d.claimed)?;
        duty.claimed = true;

        let mut receipt = duty.receipt.clone();
        receipt.payment_reference = receipt_number;
        Some(ReceiptJob {
            attempt_id: self.attempt.attempt_id,
            recipient: duty.recipient.clone(),
            receipt,
        })
    }

    /// Apply a callback that arrived while the push was still in flight.
    fn settle_early_result(&mut self) -> Result<bool, AttemptError> {
        let Some(result) = self.early_result.take() else {
            return Ok(false);
        };
        if self.attempt.status == PaymentStatus::Initiated {
            self.transition(PaymentStatus::AwaitingConfirmation)?;
        }
        self.transition(terminal_status(&result))?;
        Ok(true)
    }

    /// Terminal, unwatched, and the receipt (if any) is sent or failed
    fn is_settled(&self) -> bool {
        if !self.attempt.status.is_terminal() || self.watchers > 0 {
            return false;
        }
        match (&self.attempt.status, &self.receipt) {
            (PaymentStatus::Confirmed { .. }, Some(duty)) => {
                duty.claimed && self.notification.is_some()
            }
            _ => true,
        }
    }
}

fn terminal_status(result: &CallbackResult) -> PaymentStatus {
    match result {
        CallbackResult::Success { receipt_number, .. } => PaymentStatus::Confirmed {
            receipt_number: receipt_number.clone(),
        },
        CallbackResult::Failure { reason, .. } => PaymentStatus::Failed {
            reason: reason.clone(),
        },
    }
}

#[derive(Default)]
struct RegistryState {
    attempts: HashMap<Uuid, AttemptEntry>,
    by_checkout: HashMap<String, Uuid>,
}

/// Thread-safe in-memory attempt registry
#[derive(Clone, Default)]
pub struct AttemptRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl AttemptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new attempt in `Initiated`.
    ///
    /// `receipt` is the receipt to send once the attempt is confirmed;
    /// attempts without one never produce a notification.
    pub fn register(
        &self,
        request: &StkPushRequest,
        booking_id: Option<Uuid>,
        receipt: Option<(String, BookingReceipt)>,
    ) -> Result<PaymentAttempt, AttemptError> {
        let mut state = self.lock();
        if state.attempts.contains_key(&request.attempt_id) {
            return Err(AttemptError::Duplicate(request.attempt_id));
        }

        let now = Utc::now();
        let attempt = PaymentAttempt {
            attempt_id: request.attempt_id,
            booking_id,
            amount: request.amount,
            phone: request.phone.clone(),
            account_reference: request.account_reference.clone(),
            merchant_request_id: None,
            checkout_request_id: None,
            status: PaymentStatus::Initiated,
            created_at: now,
            updated_at: now,
        };
        let (status_tx, _) = watch::channel(PaymentStatus::Initiated);

        state.attempts.insert(
            request.attempt_id,
            AttemptEntry {
                attempt: attempt.clone(),
                status_tx,
                watchers: 0,
                receipt: receipt.map(|(recipient, receipt)| ReceiptDuty {
                    recipient,
                    receipt,
                    claimed: false,
                }),
                notification: None,
                early_result: None,
            },
        );
        Ok(attempt)
    }

    /// Start watching an attempt's status.
    ///
    /// Every `watch` must be paired with one `unwatch`.
    pub fn watch(&self, attempt_id: Uuid) -> Result<watch::Receiver<PaymentStatus>, AttemptError> {
        let mut state = self.lock();
        let entry = state
            .attempts
            .get_mut(&attempt_id)
            .ok_or(AttemptError::NotFound(attempt_id))?;
        entry.watchers += 1;
        Ok(entry.status_tx.subscribe())
    }

    /// Stop watching. Returns the receipt job if the attempt is confirmed
    /// and the receipt is still unclaimed with no watchers left.
    pub fn unwatch(&self, attempt_id: Uuid) -> Option<ReceiptJob> {
        let mut state = self.lock();
        let entry = state.attempts.get_mut(&attempt_id)?;
        entry.watchers = entry.watchers.saturating_sub(1);
        if entry.watchers > 0 {
            return None;
        }

        // Abandoned mid-push: the payer may already have the prompt.
        if entry.attempt.status == PaymentStatus::Initiated {
            let settled = entry
                .transition(PaymentStatus::AwaitingConfirmation)
                .and_then(|_| entry.settle_early_result());
            if let Err(e) = settled {
                warn!("Abandoned attempt {} left as is: {}", attempt_id, e);
            }
        }
        entry.claim_receipt()
    }

    /// Record the gateway's acknowledgement and move to `AwaitingConfirmation`.
    pub fn mark_awaiting(&self, ack: &PushAcknowledgement) -> Result<(), AttemptError> {
        let mut state = self.lock();
        let state = &mut *state;
        let entry = state
            .attempts
            .get_mut(&ack.attempt_id)
            .ok_or(AttemptError::NotFound(ack.attempt_id))?;

        entry.attempt.merchant_request_id = ack.merchant_request_id.clone();
        entry.attempt.checkout_request_id = ack.checkout_request_id.clone();
        if let Some(checkout_id) = &ack.checkout_request_id {
            state.by_checkout.insert(checkout_id.clone(), ack.attempt_id);
        }
        entry.transition(PaymentStatus::AwaitingConfirmation)?;

        if entry.settle_early_result()? {
            debug!("Applied early callback for attempt {}", ack.attempt_id);
        }
        Ok(())
    }

    /// Fail an attempt that never got past the synchronous push.
    ///
    /// If the gateway already called back for it, the push reached the payer
    /// after all: the callback's outcome is applied instead and returned.
    pub fn mark_failed(
        &self,
        attempt_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<Option<PaymentStatus>, AttemptError> {
        let mut state = self.lock();
        let entry = state
            .attempts
            .get_mut(&attempt_id)
            .ok_or(AttemptError::NotFound(attempt_id))?;
        let reason = reason.into();

        if entry.settle_early_result()? {
            warn!(
                "Push for attempt {} reported '{}' but the gateway already called back, keeping {}",
                attempt_id,
                reason,
                entry.attempt.status.label()
            );
            return Ok(Some(entry.attempt.status.clone()));
        }
        entry.transition(PaymentStatus::Failed { reason })?;
        Ok(None)
    }

    /// Give up waiting. Returns the status the attempt ends up in, which is
    /// not `TimedOut` if a callback won the race.
    pub fn expire(&self, attempt_id: Uuid) -> Result<PaymentStatus, AttemptError> {
        let mut state = self.lock();
        let entry = state
            .attempts
            .get_mut(&attempt_id)
            .ok_or(AttemptError::NotFound(attempt_id))?;
        if entry.attempt.status == PaymentStatus::AwaitingConfirmation {
            entry.transition(PaymentStatus::TimedOut)?;
        }
        Ok(entry.attempt.status.clone())
    }

    /// Apply a callback outcome. Terminal attempts are never changed.
    pub fn resolve(&self, attempt_id: Uuid, result: &CallbackResult) -> Resolution {
        let mut state = self.lock();
        let Some(entry) = state.attempts.get_mut(&attempt_id) else {
            return Resolution::NotFound;
        };

        let current = entry.attempt.status.clone();
        if current.is_terminal() {
            return Resolution::AlreadyTerminal(current);
        }
        if current == PaymentStatus::Initiated {
            if entry.watchers > 0 {
                if entry.early_result.is_none() {
                    entry.early_result = Some(result.clone());
                }
                return Resolution::Deferred;
            }
            // Nobody is left to record the acknowledgement.
            if let Err(e) = entry.transition(PaymentStatus::AwaitingConfirmation) {
                warn!("Callback could not be applied: {}", e);
                return Resolution::AlreadyTerminal(current);
            }
        }

        let next = terminal_status(result);
        if let Err(e) = entry.transition(next.clone()) {
            warn!("Callback could not be applied: {}", e);
            return Resolution::AlreadyTerminal(current);
        }

        let receipt_job = if entry.watchers == 0 {
            entry.claim_receipt()
        } else {
            None
        };
        Resolution::Applied {
            status: next,
            receipt_job,
        }
    }

    /// Take over the receipt for a confirmed attempt, at most once.
    pub fn claim_receipt(&self, attempt_id: Uuid) -> Option<ReceiptJob> {
        let mut state = self.lock();
        state.attempts.get_mut(&attempt_id)?.claim_receipt()
    }

    /// Attach the notification outcome. Write-once; later records are dropped.
    pub fn record_notification(&self, attempt_id: Uuid, record: NotificationRecord) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.attempts.get_mut(&attempt_id) else {
            return false;
        };
        if entry.notification.is_some() {
            warn!("Notification for attempt {} already recorded", attempt_id);
            return false;
        }
        entry.notification = Some(record);
        true
    }

    pub fn find_by_checkout(&self, checkout_request_id: &str) -> Option<Uuid> {
        self.lock().by_checkout.get(checkout_request_id).copied()
    }

    pub fn get(&self, attempt_id: Uuid) -> Option<AttemptSnapshot> {
        self.lock().attempts.get(&attempt_id).map(|entry| AttemptSnapshot {
            attempt: entry.attempt.clone(),
            notification: entry.notification.clone(),
        })
    }

    pub fn status(&self, attempt_id: Uuid) -> Option<PaymentStatus> {
        self.lock()
            .attempts
            .get(&attempt_id)
            .map(|entry| entry.attempt.status.clone())
    }
    /// Time out attempts nobody waits on any more and forget settled ones.
    ///
    /// An unwatched attempt that is still open after `stale_after` becomes
    /// `TimedOut`; a settled attempt untouched for `retain_for` is removed.
    pub fn sweep(&self, now: DateTime<Utc>, stale_after: Duration, retain_for: Duration) -> SweepStats {
        let stale_after = chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX);
        let retain_for = chrono::Duration::from_std(retain_for).unwrap_or(chrono::Duration::MAX);
        let mut state = self.lock();
        let RegistryState {
            attempts,
            by_checkout,
        } = &mut *state;
        let mut stats = SweepStats::default();

        for entry in attempts.values_mut() {
            let idle = now - entry.attempt.updated_at;
            if entry.watchers > 0
                || entry.attempt.status.is_terminal()
                || entry.early_result.is_some()
                || idle < stale_after
            {
                continue;
            }
            if entry.attempt.status == PaymentStatus::Initiated {
                if let Err(e) = entry.transition(PaymentStatus::AwaitingConfirmation) {
                    warn!("Stale attempt {} left as is: {}", entry.attempt.attempt_id, e);
                    continue;
                }
            }
            match entry.transition(PaymentStatus::TimedOut) {
                Ok(()) => stats.expired += 1,
                Err(e) => warn!("Stale attempt {} left as is: {}", entry.attempt.attempt_id, e),
            }
        }

        let before = attempts.len();
        attempts.retain(|_, entry| !(entry.is_settled() && now - entry.attempt.updated_at >= retain_for));
        stats.removed = before - attempts.len();
        if stats.removed > 0 {
            by_checkout.retain(|_, attempt_id| attempts.contains_key(attempt_id));
        }
        stats
    }

    /// Run `sweep` every `every` on the current runtime.
    pub fn spawn_sweeper(&self, every: Duration, stale_after: Duration, retain_for: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let stats = registry.sweep(Utc::now(), stale_after, retain_for);
                if stats != SweepStats::default() {
                    info!(
                        "Attempt sweep: expired={}, removed={}",
                        stats.expired, stats.removed
                    );
                }
            }
        })
    }
}
