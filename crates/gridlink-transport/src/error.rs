//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("no tokio runtime available to drive the endpoint")]
    NoRuntime,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("endpoint stopped")]
    Stopped,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for gridlink_core::Error {
    fn from(e: TransportError) -> Self {
        gridlink_core::Error::Send(e.to_string())
    }
}
