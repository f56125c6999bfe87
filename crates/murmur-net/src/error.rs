use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
