#![allow(dead_code)]

use async_trait::async_trait;
use mpesa_booking_backend::booking::{BookingConfig, BookingOrchestrator, BookingRequest};
use mpesa_booking_backend::config::{Config, ServerConfig};
use mpesa_booking_backend::notifications::{
    DispatchError, DispatchResult, MailConfig, Mailer, OutboundEmail, ReceiptDispatcher,
};
use mpesa_booking_backend::payments::listener::CallbackQuery;
use mpesa_booking_backend::payments::providers::MpesaConfig;
use mpesa_booking_backend::payments::types::{PaymentStatus, PushAcknowledgement, StkPushRequest};
use mpesa_booking_backend::payments::{
    AttemptRegistry, ConfirmationListener, PaymentError, PaymentGateway, PaymentResult,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How the fake gateway answers the next push
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Ack,
    Decline,
    Network,
    Rejected,
    /// Ack that only returns after `SLOW_PUSH`
    SlowAck,
    /// Transport failure reported after `SLOW_PUSH`
    SlowNetwork,
}

/// How long a slow push keeps the caller waiting after the prompt went out
pub const SLOW_PUSH: Duration = Duration::from_secs(5);

pub struct FakeGateway {
    script: Mutex<VecDeque<Scripted>>,
    pushes: mpsc::UnboundedSender<StkPushRequest>,
    calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new(script: Vec<Scripted>) -> (Arc<Self>, mpsc::UnboundedReceiver<StkPushRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            script: Mutex::new(script.into()),
            pushes: tx,
            calls: AtomicUsize::new(0),
        });
        (gateway, rx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn checkout_id(attempt_id: Uuid) -> String {
    format!("ws_CO_{}", attempt_id.simple())
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn initiate_push(&self, request: StkPushRequest) -> PaymentResult<PushAcknowledgement> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Ack);
        let attempt_id = request.attempt_id;
        let _ = self.pushes.send(request);

        if matches!(next, Scripted::SlowAck | Scripted::SlowNetwork) {
            tokio::time::sleep(SLOW_PUSH).await;
        }

        match next {
            Scripted::Ack | Scripted::SlowAck => Ok(PushAcknowledgement {
                attempt_id,
                acknowledged: true,
                merchant_request_id: Some("29115-34620561-1".to_string()),
                checkout_request_id: Some(checkout_id(attempt_id)),
                response_description: Some("Success. Request accepted for processing".to_string()),
                customer_message: Some("Success. Request accepted for processing".to_string()),
            }),
            Scripted::Decline => Ok(PushAcknowledgement {
                attempt_id,
                acknowledged: false,
                merchant_request_id: None,
                checkout_request_id: None,
                response_description: Some("Unable to lock subscriber".to_string()),
                customer_message: None,
            }),
            Scripted::Network | Scripted::SlowNetwork => Err(PaymentError::network("connection reset by peer")),
            Scripted::Rejected => Err(PaymentError::rejected(
                Some("400.002.02".to_string()),
                "Bad Request - Invalid Amount",
            )),
        }
    }

    fn callback_url_for(&self, request: &StkPushRequest) -> String {
        format!("https://bookings.test/api/payment/callback?ref={}", request.attempt_id)
    }

    fn validate_callback_signature(&self, _attempt_ref: &str, _signature: Option<&str>) -> bool {
        true
    }
}

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    fail: AtomicBool,
}

impl FakeMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: OutboundEmail) -> DispatchResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::transport("535 5.7.8 authentication failed"));
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub mailer: Arc<FakeMailer>,
    pub dispatcher: ReceiptDispatcher,
    pub listener: ConfirmationListener,
    pub orchestrator: BookingOrchestrator,
    pub pushes: mpsc::UnboundedReceiver<StkPushRequest>,
}

pub fn harness(script: Vec<Scripted>, mailer: FakeMailer, config: BookingConfig) -> Harness {
    let (gateway, pushes) = FakeGateway::new(script);
    let mailer = Arc::new(mailer);
    let dispatcher = ReceiptDispatcher::new(mailer.clone());
    let listener = ConfirmationListener::new(AttemptRegistry::new(), gateway.clone(), dispatcher.clone());
    let orchestrator = BookingOrchestrator::new(gateway.clone(), listener.clone(), config);
    Harness {
        gateway,
        mailer,
        dispatcher,
        listener,
        orchestrator,
        pushes,
    }
}

pub fn booking_config() -> BookingConfig {
    BookingConfig {
        confirmation_timeout: Duration::from_secs(90),
        push_retries: 0,
        currency: "KES".to_string(),
        attempt_retention: Duration::from_secs(3600),
    }
}

/// 2 guests at 6000, so the total is 12000
pub fn booking_request() -> BookingRequest {
    BookingRequest {
        customer_id: Some("user-42".to_string()),
        customer_name: "Amina Wanjiru".to_string(),
        email: "amina@example.com".to_string(),
        phone: "254712345678".to_string(),
        hotel: "Diani Reef Beach Resort".to_string(),
        check_in: "2025-04-10".to_string(),
        check_out: "2025-04-13".to_string(),
        guests: 2,
        rate: 6000,
        currency: None,
    }
}

pub fn success_callback(attempt_id: Uuid, receipt: &str) -> Vec<u8> {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_id(attempt_id),
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": 12000.00 },
                        { "Name": "MpesaReceiptNumber", "Value": receipt },
                        { "Name": "TransactionDate", "Value": 20250410102115u64 },
                        { "Name": "PhoneNumber", "Value": 254712345678u64 }
                    ]
                }
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn failure_callback(attempt_id: Uuid, code: i64, desc: &str) -> Vec<u8> {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_id(attempt_id),
                "ResultCode": code,
                "ResultDesc": desc
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn query_for(attempt_id: Uuid) -> CallbackQuery {
    CallbackQuery {
        attempt_ref: Some(attempt_id.to_string()),
        signature: None,
    }
}

/// Yield until the attempt has left `Initiated`
pub async fn until_acknowledged(listener: &ConfirmationListener, attempt_id: Uuid) {
    loop {
        match listener.registry().status(attempt_id) {
            Some(PaymentStatus::Initiated) | None => tokio::task::yield_now().await,
            Some(_) => return,
        }
    }
}

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "development".to_string(),
        },
        mpesa: MpesaConfig {
            shortcode: "174379".to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://bookings.test/api/payment/callback".to_string(),
            ..MpesaConfig::default()
        },
        mail: MailConfig {
            user: "bookings@example.com".to_string(),
            password: "app-password".to_string(),
            ..MailConfig::default()
        },
        booking: booking_config(),
    }
}
