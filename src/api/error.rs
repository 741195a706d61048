use crate::booking::{BookingError, ValidationError};
use crate::notifications::DispatchError;
use crate::payments::PaymentError;
use http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(e) => Self::Validation(e),
            BookingError::Attempt(e) => Self::Internal(e.to_string()),
        }
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Payment(PaymentError::AuthError { .. }) => {
                (StatusCode::BAD_GATEWAY, "GATEWAY_AUTH_ERROR")
            }
            Self::Payment(PaymentError::GatewayRejected { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "GATEWAY_REJECTED")
            }
            Self::Payment(PaymentError::NetworkError { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "GATEWAY_UNAVAILABLE")
            }
            Self::Payment(PaymentError::ConfigError { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "GATEWAY_MISCONFIGURED")
            }
            Self::Dispatch(DispatchError::InvalidAddress { .. }) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            Self::Dispatch(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DISPATCH_ERROR"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::Payment(PaymentError::GatewayRejected { code, .. }) => code.clone(),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let body = ErrorEnvelope {
            error: ErrorPayload {
                code: code.to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}
