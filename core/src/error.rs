/// Error types for the chat sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ChatError {
    /// Whether the error came from the network path (socket or HTTP) rather than bad input
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            ChatError::Delivery(_)
                | ChatError::Transport(_)
                | ChatError::Http { .. }
                | ChatError::Timeout(_)
                | ChatError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
