//! M-Pesa booking payment backend
//!
//! STK push → callback → email receipt workflow behind an axum API.

pub mod api;
pub mod booking;
pub mod config;
pub mod notifications;
pub mod payments;
