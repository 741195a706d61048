//! Outbound mail transport
//!
//! The `Mailer` trait is the seam between receipt formatting and delivery;
//! `SmtpMailer` delivers through an authenticated SMTP relay.

use crate::notifications::errors::{DispatchError, DispatchResult};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// A message ready to hand to a transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> DispatchResult<()>;
}

/// SMTP service-account configuration
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Well-known provider name (`gmail`, `outlook`, ...), used when `host` is unset
    pub service: String,
    pub host: Option<String>,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Sender mailbox; falls back to `user`
    pub from: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            service: "gmail".to_string(),
            host: None,
            port: 587,
            user: String::new(),
            password: String::new(),
            from: None,
        }
    }
}

impl MailConfig {
    /// SMTP host, either explicit or derived from the service name
    pub fn resolved_host(&self) -> Option<String> {
        if let Some(host) = self.host.as_ref().filter(|h| !h.trim().is_empty()) {
            return Some(host.trim().to_string());
        }

        let host = match self.service.trim().to_ascii_lowercase().as_str() {
            "gmail" => "smtp.gmail.com",
            "outlook" | "hotmail" | "live" => "smtp-mail.outlook.com",
            "office365" => "smtp.office365.com",
            "yahoo" => "smtp.mail.yahoo.com",
            "zoho" => "smtp.zoho.com",
            "sendgrid" => "smtp.sendgrid.net",
            "mailgun" => "smtp.mailgun.org",
            _ => return None,
        };
        Some(host.to_string())
    }

    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.user)
    }
}

/// Delivers mail through an authenticated SMTP relay
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> DispatchResult<Self> {
        let host = config.resolved_host().ok_or_else(|| DispatchError::Config {
            message: format!("Unknown mail service '{}' and no MAIL_HOST", config.service),
        })?;

        let from: Mailbox = config
            .sender()
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                DispatchError::invalid_address(config.sender(), e.to_string())
            })?;

        // 465 is implicit TLS, everything else negotiates STARTTLS
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
        }
        .map_err(|e| DispatchError::Config {
            message: format!("Invalid SMTP relay '{}': {}", host, e),
        })?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .build();

        info!("SMTP mailer initialized: host={}, port={}", host, config.port);

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutboundEmail) -> DispatchResult<()> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                DispatchError::invalid_address(&email.to, e.to_string())
            })?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone());

        let message = match email.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(email.text, html)),
            None => builder.header(ContentType::TEXT_PLAIN).body(email.text),
        }
        .map_err(|e| DispatchError::Message {
            message: e.to_string(),
        })?;

        self.transport.send(message).await.map_err(|e| {
            error!("SMTP delivery to {} failed: {}", email.to, e);
            DispatchError::transport(e.to_string())
        })?;

        debug!("Mail delivered to {}", email.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_resolves_to_relay_host() {
        let config = MailConfig::default();
        assert_eq!(config.resolved_host().as_deref(), Some("smtp.gmail.com"));

        let outlook = MailConfig {
            service: "Outlook".to_string(),
            ..Default::default()
        };
        assert_eq!(
            outlook.resolved_host().as_deref(),
            Some("smtp-mail.outlook.com")
        );
    }

    #[test]
    fn test_explicit_host_wins() {
        let config = MailConfig {
            service: "unknown".to_string(),
            host: Some("mail.example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolved_host().as_deref(), Some("mail.example.com"));
    }

    #[test]
    fn test_unknown_service_without_host() {
        let config = MailConfig {
            service: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(config.resolved_host().is_none());
    }

    #[test]
    fn test_sender_falls_back_to_user() {
        let config = MailConfig {
            user: "bookings@example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(config.sender(), "bookings@example.com");
    }
}
