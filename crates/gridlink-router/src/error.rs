//! Router error types

use gridlink_core::DeviceKind;
use gridlink_discovery::DiscoveryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("context has not been initialized")]
    NotInitialized,

    #[error("client {client} does not use a {kind}")]
    Incompatible { client: String, kind: DeviceKind },

    #[error("{device} is not a {expected}")]
    WrongKind { device: String, expected: DeviceKind },

    #[error("{0} is not in the device list")]
    UnknownDevice(String),

    #[error("{0} is not connected")]
    DeviceNotConnected(String),

    #[error("no default {0}")]
    NoDefault(DeviceKind),

    #[error("device task failed: {0}")]
    Task(String),

    #[error("client {0} has been freed")]
    ClientFreed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] gridlink_core::Error),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for RouterError {
    fn from(e: toml::de::Error) -> Self {
        RouterError::Config(e.to_string())
    }
}
