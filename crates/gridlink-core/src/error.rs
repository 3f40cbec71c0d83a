//! Error types for gridlink

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Rotation outside {0, 90, 180, 270}
    #[error("invalid rotation: {0}")]
    InvalidRotation(i32),

    /// A device of one kind was used where the other kind is required
    #[error("{device} is not a {expected}")]
    WrongKind {
        device: String,
        expected: crate::DeviceKind,
    },

    /// Address without a leading device prefix
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Inbound event arguments could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Outbound message could not be handed to the transport
    #[error("send failed: {0}")]
    Send(String),
}
