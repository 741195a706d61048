use crate::booking::BookingConfig;
use crate::notifications::MailConfig;
use crate::payments::providers::MpesaConfig;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub mpesa: MpesaConfig,
    pub mail: MailConfig,
    pub booking: BookingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).with_context(|| format!("{} not set", key))
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: required("PORT")?
                .parse()
                .context("PORT must be a valid number")?,
            environment: optional("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
        };

        let mpesa = MpesaConfig {
            base_url: optional("MPESA_BASE_URL").unwrap_or_else(|| SANDBOX_BASE_URL.to_string()),
            shortcode: required("MPESA_SHORTCODE")?,
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            passkey: required("MPESA_PASSKEY")?,
            callback_url: required("MPESA_CALLBACK_URL")?,
            callback_secret: optional("MPESA_CALLBACK_SECRET"),
            timeout_secs: parsed("MPESA_TIMEOUT_SECS", 30)?,
        };

        let mail = MailConfig {
            service: optional("MAIL_SERVICE").unwrap_or_else(|| "gmail".to_string()),
            host: optional("MAIL_HOST"),
            port: parsed("MAIL_PORT", 587)?,
            user: required("MAIL_USER")?,
            password: required("MAIL_PASS")?,
            from: optional("MAIL_FROM"),
        };

        let booking = BookingConfig {
            confirmation_timeout: Duration::from_secs(parsed(
                "BOOKING_CONFIRMATION_TIMEOUT_SECS",
                90u64,
            )?),
            push_retries: parsed("BOOKING_PUSH_RETRIES", 0)?,
            currency: optional("BOOKING_CURRENCY")
                .unwrap_or_else(|| "KES".to_string())
                .to_ascii_uppercase(),
            attempt_retention: Duration::from_secs(parsed(
                "BOOKING_ATTEMPT_RETENTION_SECS",
                3600u64,
            )?),
        };

        let config = Config {
            server,
            mpesa,
            mail,
            booking,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        for (name, url) in [
            ("MPESA_BASE_URL", &self.mpesa.base_url),
            ("MPESA_CALLBACK_URL", &self.mpesa.callback_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(anyhow!("{} must be an http(s) URL, got {}", name, url));
            }
        }

        if self.mpesa.shortcode.chars().any(|c| !c.is_ascii_digit()) {
            return Err(anyhow!(
                "MPESA_SHORTCODE must be numeric, got {}",
                self.mpesa.shortcode
            ));
        }

        if self.mpesa.timeout_secs == 0 {
            return Err(anyhow!("MPESA_TIMEOUT_SECS must be greater than 0"));
        }

        if self.mail.resolved_host().is_none() {
            return Err(anyhow!(
                "Unknown MAIL_SERVICE '{}' and no MAIL_HOST set",
                self.mail.service
            ));
        }

        let timeout = self.booking.confirmation_timeout.as_secs();
        if !(10..=600).contains(&timeout) {
            return Err(anyhow!(
                "BOOKING_CONFIRMATION_TIMEOUT_SECS must be between 10 and 600, got {}",
                timeout
            ));
        }

        if self.booking.push_retries > 3 {
            return Err(anyhow!(
                "BOOKING_PUSH_RETRIES must be at most 3, got {}",
                self.booking.push_retries
            ));
        }

        if self.booking.attempt_retention < Duration::from_secs(60) {
            return Err(anyhow!(
                "BOOKING_ATTEMPT_RETENTION_SECS must be at least 60, got {}",
                self.booking.attempt_retention.as_secs()
            ));
        }

        if self.booking.currency.len() != 3 {
            return Err(anyhow!(
                "BOOKING_CURRENCY must be a 3-letter code, got {}",
                self.booking.currency
            ));
        }

        Ok(())
    }

    pub fn mpesa_configured(&self) -> bool {
        !self.mpesa.consumer_key.is_empty()
            && !self.mpesa.consumer_secret.is_empty()
            && !self.mpesa.passkey.is_empty()
    }

    pub fn mail_configured(&self) -> bool {
        !self.mail.user.is_empty() && !self.mail.password.is_empty()
    }
}
