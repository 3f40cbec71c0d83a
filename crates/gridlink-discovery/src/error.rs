//! Discovery error types

use gridlink_transport::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("already tracking serialosc device changes")]
    AlreadyTracking,

    #[error("not tracking serialosc device changes")]
    NotTracking,

    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error(transparent)]
    Core(#[from] gridlink_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DiscoveryError> for gridlink_core::Error {
    fn from(e: DiscoveryError) -> Self {
        match e {
            DiscoveryError::Core(inner) => inner,
            other => gridlink_core::Error::Send(other.to_string()),
        }
    }
}
