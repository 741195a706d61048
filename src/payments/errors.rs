use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Failures of a single gateway interaction.
///
/// Every variant is terminal for the attempt that produced it. Whether to
/// try again (with a fresh attempt id) is the orchestrator's decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Gateway authentication failed: {message}")]
    AuthError { message: String },

    #[error("Gateway rejected the push request: {message}")]
    GatewayRejected {
        code: Option<String>,
        message: String,
    },

    #[error("Network error talking to gateway: {message}")]
    NetworkError { message: String },

    #[error("Gateway configuration error: {message}")]
    ConfigError { message: String },
}

impl PaymentError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    pub fn rejected(code: Option<String>, message: impl Into<String>) -> Self {
        Self::GatewayRejected {
            code,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Only transport-level failures are worth a caller-initiated retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError { .. })
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("request timed out: {}", e))
        } else {
            Self::network(e.to_string())
        }
    }
}
