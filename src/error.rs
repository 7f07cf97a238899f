//! Error types for linechat.

use thiserror::Error;

/// Common error type for linechat.
#[derive(Error, Debug)]
pub enum ChatError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error for configuration or user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The line stream reported a transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The line stream delivered a break/interrupt signal.
    #[error("connection interrupted")]
    Interrupted,

    /// `Session::join` was called on a session that already has a name.
    #[error("session already joined, rejected name {0:?}")]
    AlreadyJoined(String),
}

/// Result type alias for linechat operations.
pub type Result<T> = std::result::Result<T, ChatError>;
