use thiserror::Error;

/// Errors produced by the chat protocol and the client built on it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Socket or timeout failure on either channel
    #[error("Network error: {0}")]
    Network(String),

    /// A received payload could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A well-formed server reply with the wrong shape or marker
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A second arrival at a sequence that is already buffered
    #[error("Duplicate sequence {0}")]
    DuplicateSequence(u64),

    /// Operation not allowed in the current connection state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(err.to_string())
    }
}
