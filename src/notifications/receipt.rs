//! Booking receipts
//!
//! Formats the confirmation message for a paid booking and hands it to the
//! configured `Mailer`, recording the outcome.

use crate::notifications::errors::DispatchResult;
use crate::notifications::mailer::{Mailer, OutboundEmail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything the receipt needs to say about a booking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub booking_id: Uuid,
    pub customer_name: String,
    pub hotel: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub total_amount: u64,
    pub currency: String,
    pub phone: String,
    /// Gateway transaction receipt, known once the payment is confirmed
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    Failed { reason: String },
}

/// Write-once record of a receipt send
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub recipient: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    #[serde(flatten)]
    pub outcome: SendOutcome,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn is_sent(&self) -> bool {
        self.outcome == SendOutcome::Sent
    }
}

/// Sends booking receipts and ad-hoc messages through a `Mailer`
#[derive(Clone)]
pub struct ReceiptDispatcher {
    mailer: Arc<dyn Mailer>,
}

impl ReceiptDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Format and send the receipt for a confirmed booking.
    ///
    /// The returned record carries the outcome either way; the error is
    /// returned alongside so callers can word a partial success.
    pub async fn send_receipt(
        &self,
        recipient: &str,
        receipt: &BookingReceipt,
    ) -> (NotificationRecord, DispatchResult<()>) {
        let subject = receipt_subject(receipt);
        let text = render_text(receipt);
        let html = render_html(receipt);

        let result = self
            .mailer
            .send(OutboundEmail {
                to: recipient.to_string(),
                subject: subject.clone(),
                text: text.clone(),
                html: Some(html.clone()),
            })
            .await;

        let outcome = match &result {
            Ok(()) => {
                info!(
                    "Receipt sent: booking={}, recipient={}",
                    receipt.booking_id, recipient
                );
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(
                    "Receipt not sent: booking={}, recipient={}: {}",
                    receipt.booking_id, recipient, e
                );
                SendOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let record = NotificationRecord {
            recipient: recipient.to_string(),
            subject,
            text,
            html,
            outcome,
            created_at: Utc::now(),
        };

        (record, result)
    }

    /// Send a caller-composed message
    pub async fn send_message(&self, email: OutboundEmail) -> DispatchResult<()> {
        let to = email.to.clone();
        self.mailer.send(email).await.map_err(|e| {
            warn!("Message to {} not sent: {}", to, e);
            e
        })
    }
}

pub fn receipt_subject(receipt: &BookingReceipt) -> String {
    format!("Booking confirmed: {}", receipt.hotel)
}

pub fn render_text(receipt: &BookingReceipt) -> String {
    let nights = (receipt.check_out - receipt.check_in).num_days();
    let mut text = format!(
        "Hello {name},\n\n\
         Your payment has been received and your booking is confirmed.\n\n\
         Booking reference: {booking}\n\
         Hotel: {hotel}\n\
         Check-in: {check_in}\n\
         Check-out: {check_out} ({nights} night(s))\n\
         Guests: {guests}\n\
         Total paid: {currency} {total}\n",
        name = receipt.customer_name,
        booking = receipt.booking_id,
        hotel = receipt.hotel,
        check_in = receipt.check_in,
        check_out = receipt.check_out,
        nights = nights,
        guests = receipt.guests,
        currency = receipt.currency,
        total = receipt.total_amount,
    );
    if let Some(reference) = &receipt.payment_reference {
        text.push_str(&format!("M-Pesa receipt: {}\n", reference));
    }
    text.push_str("\nThank you for booking with us.\n");
    text
}

pub fn render_html(receipt: &BookingReceipt) -> String {
    let payment_row = receipt
        .payment_reference
        .as_deref()
        .map(|r| format!("<tr><td>M-Pesa receipt</td><td>{}</td></tr>", escape_html(r)))
        .unwrap_or_default();

    format!(
        "<html><body>\
         <h2>Booking confirmed</h2>\
         <p>Hello {name}, your payment has been received and your booking is confirmed.</p>\
         <table>\
         <tr><td>Booking reference</td><td>{booking}</td></tr>\
         <tr><td>Hotel</td><td>{hotel}</td></tr>\
         <tr><td>Check-in</td><td>{check_in}</td></tr>\
         <tr><td>Check-out</td><td>{check_out}</td></tr>\
         <tr><td>Guests</td><td>{guests}</td></tr>\
         <tr><td>Total paid</td><td>{currency} {total}</td></tr>\
         {payment_row}\
         </table>\
         <p>Thank you for booking with us.</p>\
         </body></html>",
        name = escape_html(&receipt.customer_name),
        booking = receipt.booking_id,
        hotel = escape_html(&receipt.hotel),
        check_in = receipt.check_in,
        check_out = receipt.check_out,
        guests = receipt.guests,
        currency = escape_html(&receipt.currency),
        total = receipt.total_amount,
        payment_row = payment_row,
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::errors::DispatchError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingMailer {
        sent: Mutex<Vec<OutboundEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OutboundEmail) -> DispatchResult<()> {
            if self.fail {
                return Err(DispatchError::transport("535 authentication failed"));
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }

    fn sample_receipt() -> BookingReceipt {
        BookingReceipt {
            booking_id: Uuid::new_v4(),
            customer_name: "Amina <Wanjiru>".to_string(),
            hotel: "Diani Reef & Spa".to_string(),
            check_in: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            guests: 2,
            total_amount: 12000,
            currency: "KES".to_string(),
            phone: "254712345678".to_string(),
            payment_reference: Some("NLJ7RT61SV".to_string()),
        }
    }

    #[test]
    fn test_text_receipt_contents() {
        let text = render_text(&sample_receipt());
        assert!(text.contains("Total paid: KES 12000"));
        assert!(text.contains("(3 night(s))"));
        assert!(text.contains("M-Pesa receipt: NLJ7RT61SV"));
    }

    #[test]
    fn test_html_receipt_escapes_user_content() {
        let html = render_html(&sample_receipt());
        assert!(html.contains("Amina &lt;Wanjiru&gt;"));
        assert!(html.contains("Diani Reef &amp; Spa"));
        assert!(!html.contains("<Wanjiru>"));
    }

    #[tokio::test]
    async fn test_send_receipt_records_sent() {
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
            fail: false,
        });
        let dispatcher = ReceiptDispatcher::new(mailer.clone());

        let (record, result) = dispatcher
            .send_receipt("amina@example.com", &sample_receipt())
            .await;

        assert!(result.is_ok());
        assert!(record.is_sent());
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Booking confirmed: Diani Reef & Spa");
        assert!(sent[0].html.is_some());
    }

    #[tokio::test]
    async fn test_send_receipt_records_failure() {
        let dispatcher = ReceiptDispatcher::new(Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }));

        let (record, result) = dispatcher
            .send_receipt("amina@example.com", &sample_receipt())
            .await;

        assert!(matches!(result, Err(DispatchError::Transport { .. })));
        assert!(!record.is_sent());
    }
}
