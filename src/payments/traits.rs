//! Payment gateway trait definitions
//!
//! Defines the interface the booking orchestrator and the HTTP layer use to
//! reach a push-payment gateway.

use crate::payments::errors::PaymentResult;
use crate::payments::types::{PushAcknowledgement, StkPushRequest};
use async_trait::async_trait;

/// Trait for push-payment gateway implementations
///
/// Implementations own their credential handling; callers only ever see the
/// acknowledgement or a typed failure.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &'static str;

    /// Submit a push request to the payer's phone
    ///
    /// # Arguments
    /// * `request` - Phone, amount, account reference and a fresh attempt id
    ///
    /// # Returns
    /// * `PushAcknowledgement` - Whether the gateway accepted the request and
    ///   the ids it assigned for correlating the later callback
    async fn initiate_push(&self, request: StkPushRequest) -> PaymentResult<PushAcknowledgement>;

    /// Callback URL for a given attempt, as sent to the gateway
    fn callback_url_for(&self, request: &StkPushRequest) -> String;

    /// Verify the signature carried on an inbound callback
    ///
    /// # Arguments
    /// * `attempt_ref` - The `ref` query parameter of the callback URL
    /// * `signature` - The `sig` query parameter, if any
    ///
    /// # Returns
    /// * `bool` - True if the callback is authentic or signing is disabled
    fn validate_callback_signature(&self, attempt_ref: &str, signature: Option<&str>) -> bool;
}
