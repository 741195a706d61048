//! Payment types and data structures
//!
//! Requests, acknowledgements, attempt records and the gateway's callback
//! body shared by the gateway client, the confirmation listener and the
//! booking orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// STK push request for a single payment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkPushRequest {
    /// Fresh id per push; never reused across bookings or retries
    pub attempt_id: Uuid,
    /// Payer MSISDN in `2547XXXXXXXX` form
    pub phone: String,
    /// Whole units of the gateway currency (KES has no minor unit on M-Pesa)
    pub amount: u64,
    /// Shown to the payer on the prompt, max 12 chars on the gateway side
    pub account_reference: String,
    pub description: String,
}

impl StkPushRequest {
    pub fn new(
        phone: impl Into<String>,
        amount: u64,
        account_reference: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            phone: phone.into(),
            amount,
            account_reference: account_reference.into(),
            description: description.into(),
        }
    }
}

/// Synchronous answer of the gateway to a push request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushAcknowledgement {
    pub attempt_id: Uuid,
    /// True when the gateway accepted the request and prompted the phone
    pub acknowledged: bool,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub response_description: Option<String>,
    pub customer_message: Option<String>,
}

/// Bearer token issued by the gateway's OAuth endpoint.
///
/// Only the gateway client reads the token itself.
#[derive(Clone)]
pub struct AccessCredential {
    token: String,
    expires_at: Instant,
}

impl AccessCredential {
    pub(crate) fn new(token: String, expires_at: Instant) -> Self {
        Self { token, expires_at }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Lifecycle of a payment attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Attempt registered, push not yet acknowledged
    Initiated,
    /// Gateway acknowledged, waiting for the payer
    AwaitingConfirmation,
    /// Payer approved the prompt
    Confirmed { receipt_number: Option<String> },
    /// Push rejected, declined, cancelled or unreachable
    Failed { reason: String },
    /// No callback within the confirmation window
    TimedOut,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed { .. } | Self::Failed { .. } | Self::TimedOut
        )
    }

    /// Forward-only transition table.
    pub fn can_transition_to(&self, next: &PaymentStatus) -> bool {
        match (self, next) {
            (Self::Initiated, Self::AwaitingConfirmation) => true,
            (Self::Initiated, Self::Failed { .. }) => true,
            (Self::AwaitingConfirmation, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Confirmed { .. } => "confirmed",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Snapshot of a payment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttempt {
    pub attempt_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub amount: u64,
    pub phone: String,
    pub account_reference: String,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body the gateway POSTs to the callback URL
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", deserialize_with = "deserialize_result_code")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

/// Outcome reported by a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Success {
        receipt_number: Option<String>,
        amount: Option<u64>,
        phone: Option<String>,
    },
    Failure {
        code: i64,
        reason: String,
    },
}

impl StkCallback {
    pub fn result(&self) -> CallbackResult {
        if self.result_code == 0 {
            CallbackResult::Success {
                receipt_number: self.metadata_string("MpesaReceiptNumber"),
                amount: self
                    .metadata_value("Amount")
                    .and_then(|v| v.as_f64())
                    .map(|v| v.round() as u64),
                phone: self.metadata_string("PhoneNumber"),
            }
        } else {
            CallbackResult::Failure {
                code: self.result_code,
                reason: self
                    .result_desc
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| format!("gateway result code {}", self.result_code)),
            }
        }
    }

    fn metadata_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }

    fn metadata_string(&self, name: &str) -> Option<String> {
        match self.metadata_value(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

// The gateway documents ResultCode as a number but some sandboxes send a string.
fn deserialize_result_code<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Num(i64),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Num(n) => Ok(n),
        Code::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
