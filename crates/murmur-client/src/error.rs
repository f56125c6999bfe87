use thiserror::Error;

use murmur_net::NetError;
use murmur_shared::{LocalId, MediaError, MurmurError};
use murmur_store::StoreError;

/// Coarse failure classes a host reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credentials refused. Never retried automatically.
    AuthRejected,
    /// Transient transport failure, timeouts included.
    Network,
    /// The credential check ended without a verdict; prior state is kept.
    ValidationUnknown,
    /// One outbound message failed and sits in the log as `failed`.
    SendFailed,
    /// The caller asked for something the current state does not allow.
    Usage,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Session validation inconclusive: {0}")]
    ValidationUnknown(String),

    #[error("Send failed for message {local_id}: {reason}")]
    SendFailed { local_id: LocalId, reason: String },

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("No active session")]
    NoSession,

    #[error("Sign-in superseded by a later sign-in or sign-out")]
    Superseded,

    #[error("No conversation selected")]
    NoConversation,

    #[error("Unknown message {0}")]
    UnknownMessage(LocalId),

    #[error("Message {0} is not in the failed state")]
    NotRetryable(LocalId),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Net(#[from] NetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::AuthRejected(_) => ErrorKind::AuthRejected,
            ClientError::Network(_) | ClientError::Timeout(_) | ClientError::Net(_) => {
                ErrorKind::Network
            }
            ClientError::ValidationUnknown(_) => ErrorKind::ValidationUnknown,
            ClientError::SendFailed { .. } => ErrorKind::SendFailed,
            ClientError::NoSession
            | ClientError::Superseded
            | ClientError::NoConversation
            | ClientError::UnknownMessage(_)
            | ClientError::NotRetryable(_)
            | ClientError::InvalidPayload(_)
            | ClientError::Protocol(_)
            | ClientError::Media(_)
            | ClientError::Store(_)
            | ClientError::Io(_) => ErrorKind::Usage,
        }
    }
}

impl From<MurmurError> for ClientError {
    fn from(err: MurmurError) -> Self {
        match err {
            MurmurError::AuthRejected(msg) => ClientError::AuthRejected(msg),
            MurmurError::Network(msg) => ClientError::Network(msg),
            MurmurError::InvalidPayload(msg) => ClientError::InvalidPayload(msg),
            MurmurError::Protocol(msg) | MurmurError::Serialization(msg) => {
                ClientError::Protocol(msg)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
