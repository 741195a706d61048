//! Customer notifications
//!
//! Receipt formatting and outbound mail delivery.

pub mod errors;
pub mod mailer;
pub mod receipt;

pub use errors::{DispatchError, DispatchResult};
pub use mailer::{MailConfig, Mailer, OutboundEmail, SmtpMailer};
pub use receipt::{BookingReceipt, NotificationRecord, ReceiptDispatcher, SendOutcome};
