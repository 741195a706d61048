//! M-Pesa (Daraja) STK push provider implementation
//!
//! Exchanges the consumer key/secret for a bearer token, signs and submits
//! "Lipa na M-Pesa Online" push requests, and signs the callback URL so the
//! confirmation listener can tell genuine callbacks apart.

use crate::payments::errors::{PaymentError, PaymentResult};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{AccessCredential, PushAcknowledgement, StkPushRequest};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";
/// Used when the token response carries no `expires_in`
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

type HmacSha256 = Hmac<Sha256>;

/// M-Pesa provider configuration
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    /// Daraja base URL (sandbox or production)
    pub base_url: String,
    /// Business shortcode (paybill / till) registered with the gateway
    pub shortcode: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Lipa na M-Pesa Online passkey
    pub passkey: String,
    /// Public URL of `/api/payment/callback`
    pub callback_url: String,
    /// When set, callback URLs carry an HMAC of the attempt id
    pub callback_secret: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            shortcode: String::new(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            passkey: String::new(),
            callback_url: String::new(),
            callback_secret: None,
            timeout_secs: 30,
        }
    }
}

/// M-Pesa STK push provider
pub struct MpesaProvider {
    config: MpesaConfig,
    client: Client,
    credential: RwLock<Option<AccessCredential>>,
    refresh_lock: Mutex<()>,
}

impl MpesaProvider {
    /// Create a new M-Pesa provider instance
    pub fn new(config: MpesaConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("mpesa-booking-backend/1.0")
            .build()
            .map_err(|e| PaymentError::config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "M-Pesa provider initialized: base_url={}, shortcode={}",
            config.base_url, config.shortcode
        );

        Ok(Self {
            config,
            client,
            credential: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &MpesaConfig {
        &self.config
    }

    /// Exchange the consumer key/secret for a bearer token and cache it.
    ///
    /// Callers normally go through the cached path; this always hits the
    /// gateway.
    pub async fn authenticate(&self) -> PaymentResult<AccessCredential> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        debug!("Requesting M-Pesa access token");

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, format!("Basic {}", self.basic_credentials()))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!("M-Pesa token request failed: HTTP {}", status);
            return Err(PaymentError::auth(format!("HTTP {}: {}", status, body)));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse M-Pesa token response: {}", e);
            PaymentError::auth(format!("Invalid token response: {}", e))
        })?;

        if token.access_token.trim().is_empty() {
            return Err(PaymentError::auth("Token response carried an empty access_token"));
        }

        let lifetime = token.lifetime().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let usable = lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN).max(lifetime / 2);
        let credential = AccessCredential::new(token.access_token, Instant::now() + usable);

        *self.credential.write().await = Some(credential.clone());
        info!("M-Pesa access token refreshed, valid for {}s", usable.as_secs());

        Ok(credential)
    }

    /// Cached bearer token, refreshed at most once per expiry window even
    /// under concurrent callers.
    async fn bearer_token(&self) -> PaymentResult<String> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let credential = self.authenticate().await?;
        Ok(credential.token().to_string())
    }

    async fn cached_token(&self) -> Option<String> {
        self.credential
            .read()
            .await
            .as_ref()
            .filter(|c| c.is_valid())
            .map(|c| c.token().to_string())
    }

    async fn invalidate_credential(&self) {
        *self.credential.write().await = None;
    }

    fn basic_credentials(&self) -> String {
        STANDARD.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ))
    }

    fn sign_attempt(&self, attempt_ref: &str) -> Option<String> {
        let secret = self.config.callback_secret.as_deref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(attempt_ref.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl PaymentGateway for MpesaProvider {
    fn name(&self) -> &'static str {
        "mpesa"
    }

    async fn initiate_push(&self, request: StkPushRequest) -> PaymentResult<PushAcknowledgement> {
        info!(
            "Initiating M-Pesa STK push: attempt={}, amount={}, reference={}",
            request.attempt_id, request.amount, request.account_reference
        );

        let token = self.bearer_token().await?;
        let timestamp = gateway_timestamp(Utc::now());
        let payload = StkPushPayload {
            business_short_code: &self.config.shortcode,
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE,
            amount: request.amount,
            party_a: &request.phone,
            party_b: &self.config.shortcode,
            phone_number: &request.phone,
            call_back_url: self.callback_url_for(&request),
            account_reference: &request.account_reference,
            transaction_desc: &request.description,
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                warn!("M-Pesa push transport error: attempt={}: {}", request.attempt_id, e);
                PaymentError::from(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(PaymentError::from)?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("M-Pesa rejected bearer token, dropping cached credential");
            self.invalidate_credential().await;
            return Err(PaymentError::auth(format!("HTTP {}: {}", status, body)));
        }

        if status.is_server_error() {
            error!("M-Pesa push server error: HTTP {}", status);
            return Err(PaymentError::network(format!("HTTP {}: {}", status, body)));
        }

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<MpesaErrorResponse>(&body) {
                Ok(err) => (err.error_code, err.error_message.unwrap_or_else(|| body.clone())),
                Err(_) => (None, format!("HTTP {}: {}", status, body)),
            };
            warn!(
                "M-Pesa push rejected: attempt={}, code={:?}, message={}",
                request.attempt_id, code, message
            );
            return Err(PaymentError::rejected(code, message));
        }

        let push: MpesaPushResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse M-Pesa push response: {}", e);
            PaymentError::rejected(None, format!("Invalid response format: {}", e))
        })?;

        let acknowledged = push.is_accepted();
        info!(
            "M-Pesa push answered: attempt={}, acknowledged={}, checkout_request_id={:?}",
            request.attempt_id, acknowledged, push.checkout_request_id
        );

        Ok(PushAcknowledgement {
            attempt_id: request.attempt_id,
            acknowledged,
            merchant_request_id: push.merchant_request_id,
            checkout_request_id: push.checkout_request_id,
            response_description: push.response_description,
            customer_message: push.customer_message,
        })
    }

    fn callback_url_for(&self, request: &StkPushRequest) -> String {
        let attempt_ref = request.attempt_id.to_string();
        let separator = if self.config.callback_url.contains('?') {
            '&'
        } else {
            '?'
        };
        let mut url = format!(
            "{}{}ref={}",
            self.config.callback_url, separator, attempt_ref
        );
        if let Some(sig) = self.sign_attempt(&attempt_ref) {
            url.push_str("&sig=");
            url.push_str(&sig);
        }
        url
    }

    fn validate_callback_signature(&self, attempt_ref: &str, signature: Option<&str>) -> bool {
        let Some(expected) = self.sign_attempt(attempt_ref) else {
            // signing disabled
            return self.config.callback_secret.is_none();
        };
        let Some(provided) = signature.map(str::trim) else {
            return false;
        };

        if expected.len() != provided.len() {
            return false;
        }

        expected
            .as_bytes()
            .iter()
            .zip(provided.as_bytes().iter())
            .fold(0, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// `YYYYMMDDHHmmss` in East Africa Time, as the gateway expects.
pub fn gateway_timestamp(now: DateTime<Utc>) -> String {
    (now + chrono::Duration::hours(3))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// `base64(shortcode ‖ passkey ‖ timestamp)`
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

// STK push request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushPayload<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'a str,
    amount: u64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: String,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn lifetime(&self) -> Option<Duration> {
        let secs = match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64()?,
            serde_json::Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

// STK push synchronous response
#[derive(Debug, Deserialize)]
struct MpesaPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode", default)]
    response_code: Option<serde_json::Value>,
    #[serde(rename = "ResponseDescription", default)]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
}

impl MpesaPushResponse {
    fn is_accepted(&self) -> bool {
        match &self.response_code {
            Some(serde_json::Value::String(code)) => code.trim() == "0",
            Some(serde_json::Value::Number(code)) => code.as_i64() == Some(0),
            _ => false,
        }
    }
}

// Error body returned with 4xx responses
#[derive(Debug, Deserialize)]
struct MpesaErrorResponse {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_provider(secret: Option<&str>) -> MpesaProvider {
        let config = MpesaConfig {
            shortcode: "174379".to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://example.com/api/payment/callback".to_string(),
            callback_secret: secret.map(str::to_string),
            ..Default::default()
        };
        MpesaProvider::new(config).unwrap()
    }

    #[test]
    fn test_timestamp_is_east_africa_time() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 22, 5, 9).unwrap();
        assert_eq!(gateway_timestamp(now), "20250101010509");
    }

    #[test]
    fn test_password_is_base64_of_concatenation() {
        let password = stk_password("174379", "passkey", "20240101120000");
        let decoded = STANDARD.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240101120000");
    }

    #[test]
    fn test_basic_credentials_encoding() {
        let provider = create_test_provider(None);
        assert_eq!(provider.basic_credentials(), STANDARD.encode("key:secret"));
    }

    #[test]
    fn test_callback_url_unsigned() {
        let provider = create_test_provider(None);
        let request = StkPushRequest::new("254712345678", 10, "Booking", "Hotel stay");
        let url = provider.callback_url_for(&request);
        assert_eq!(
            url,
            format!(
                "https://example.com/api/payment/callback?ref={}",
                request.attempt_id
            )
        );
        assert!(provider.validate_callback_signature(&request.attempt_id.to_string(), None));
    }

    #[test]
    fn test_callback_signature_round_trip() {
        let provider = create_test_provider(Some("cb-secret"));
        let request = StkPushRequest::new("254712345678", 10, "Booking", "Hotel stay");
        let url = provider.callback_url_for(&request);
        let sig = url.split("&sig=").nth(1).unwrap().to_string();
        let attempt_ref = request.attempt_id.to_string();

        assert!(provider.validate_callback_signature(&attempt_ref, Some(&sig)));
        assert!(!provider.validate_callback_signature(&attempt_ref, None));
        assert!(!provider.validate_callback_signature(&attempt_ref, Some("deadbeef")));
        assert!(!provider.validate_callback_signature("other-attempt", Some(&sig)));
    }

    #[test]
    fn test_token_lifetime_parsing() {
        let as_string: TokenResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":"3599"}"#).unwrap();
        assert_eq!(as_string.lifetime(), Some(Duration::from_secs(3599)));

        let missing: TokenResponse = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        assert_eq!(missing.lifetime(), None);
    }

    #[test]
    fn test_push_response_code_variants() {
        let accepted: MpesaPushResponse =
            serde_json::from_str(r#"{"ResponseCode":"0","CheckoutRequestID":"ws_1"}"#).unwrap();
        assert!(accepted.is_accepted());

        let refused: MpesaPushResponse =
            serde_json::from_str(r#"{"ResponseCode":"1","ResponseDescription":"Rejected"}"#)
                .unwrap();
        assert!(!refused.is_accepted());
    }

    #[test]
    fn test_mpesa_config_default() {
        let config = MpesaConfig::default();
        assert_eq!(config.base_url, "https://sandbox.safaricom.co.ke");
        assert_eq!(config.timeout_secs, 30);
        assert!(config.callback_secret.is_none());
    }
}
