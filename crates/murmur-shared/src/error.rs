use thiserror::Error;

/// Failures reported by the remote collaborators and the wire codec.
#[derive(Error, Debug)]
pub enum MurmurError {
    /// Bad credentials. Terminal: never retried automatically.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Transient transport failure.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MediaError {
    #[error("Not an image: {0}")]
    NotAnImage(String),

    #[error("Image is empty")]
    Empty,

    #[error("Image too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}
