//! gridlink discovery
//!
//! Talks to the serialosc daemon: lists attached devices, queries a single
//! device's `/sys` attributes, tracks attach/detach notifications and sends the
//! fire-and-forget `/sys/*` control messages.
//!
//! The daemon protocol carries no request ids, so list and info queries are
//! answered by opening a collection window: every matching reply that arrives
//! within the timeout belongs to the caller holding the window. One window of
//! each kind can be open at a time.

pub mod config;
pub mod error;
pub mod serialosc;

pub use config::SerialOscConfig;
pub use error::{DiscoveryError, Result};
pub use serialosc::{DeviceAttributes, EventHandler, IdCallback, SerialOsc};
