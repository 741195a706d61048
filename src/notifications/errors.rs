use thiserror::Error;

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Mail could not be handed to the transport.
///
/// Never rolls back a captured payment; the orchestrator reports it as a
/// partial success.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Invalid mail address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Failed to build mail message: {message}")]
    Message { message: String },

    #[error("Mail transport error: {message}")]
    Transport { message: String },

    #[error("Mail configuration error: {message}")]
    Config { message: String },
}

impl DispatchError {
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}
