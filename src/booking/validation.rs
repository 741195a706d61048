//! Reservation form validation
//!
//! Everything here runs before any network call.

use crate::booking::errors::ValidationError;
use crate::booking::types::{BookingRequest, ValidatedBooking};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:254|0)?([17]\d{8})$").expect("phone pattern is a valid regex")
    })
}

/// Normalize a Kenyan mobile number to the `254XXXXXXXXX` form the gateway
/// dials. Accepts `07..`, `01..`, `+254..`, `254..` and the bare 9 digits,
/// ignoring spaces and dashes.
pub fn normalize_phone(raw: &str) -> Result<String, ValidationError> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    phone_pattern()
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .map(|subscriber| format!("254{}", subscriber.as_str()))
        .ok_or_else(|| ValidationError::InvalidPhone {
            value: raw.to_string(),
        })
}

pub fn validate_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim();
    email
        .parse::<lettre::Address>()
        .map(|_| email.to_string())
        .map_err(|_| ValidationError::InvalidEmail {
            value: raw.to_string(),
        })
}

fn required(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    Ok(value.to_string())
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ValidationError> {
    let value = required(field, value)?;
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate { field, value })
}

impl BookingRequest {
    /// Check every field and compute the total (rate × guests).
    pub fn validate(&self, default_currency: &str) -> Result<ValidatedBooking, ValidationError> {
        let customer_name = required("customerName", &self.customer_name)?;
        let email = validate_email(&required("email", &self.email)?)?;
        let phone = normalize_phone(&required("phone", &self.phone)?)?;
        let hotel = required("hotel", &self.hotel)?;

        let check_in = parse_date("checkIn", &self.check_in)?;
        let check_out = parse_date("checkOut", &self.check_out)?;
        if check_in >= check_out {
            return Err(ValidationError::DateOrder {
                check_in: check_in.to_string(),
                check_out: check_out.to_string(),
            });
        }

        if self.guests < 1 {
            return Err(ValidationError::NoGuests);
        }
        if self.rate == 0 {
            return Err(ValidationError::InvalidAmount);
        }
        let total_amount = self
            .rate
            .checked_mul(u64::from(self.guests))
            .ok_or(ValidationError::AmountOverflow)?;

        let currency = self
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(default_currency)
            .to_ascii_uppercase();

        Ok(ValidatedBooking {
            booking_id: Uuid::new_v4(),
            customer_id: self.customer_id.clone(),
            customer_name,
            email,
            phone,
            hotel,
            check_in,
            check_out,
            guests: self.guests,
            total_amount,
            currency,
        })
    }
}
