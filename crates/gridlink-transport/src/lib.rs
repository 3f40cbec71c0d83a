//! gridlink transport
//!
//! A UDP endpoint that carries OSC packets. Inbound packets are decoded and
//! handed to every registered handler whose [`AddressPattern`] matches; bundles
//! are flattened and their messages stamped with the bundle's time tag.

pub mod endpoint;
pub mod error;

pub use endpoint::{AddressPattern, EndpointConfig, MessageHandler, OscEndpoint};
pub use error::{Result, TransportError};
