//! gridlink core
//!
//! Shared types for driving monome-style control surfaces over serialosc.
//!
//! This crate provides:
//! - Device handles and output capabilities ([`Device`], [`Grid`], [`Encoder`])
//! - Client device requirements ([`GridSpec`], [`EncSpec`])
//! - Inbound event kinds and decoding ([`Event`], [`EventKind`])
//! - Ordered persistent listener chains ([`Chain`])
//! - A subject/observer notification bus ([`Dependants`])

pub mod address;
pub mod chain;
pub mod dependants;
pub mod device;
pub mod error;
pub mod event;
pub mod spec;

pub use chain::{callback, isolate, same_callback, Callback, Chain};
pub use dependants::{Dependants, Observer, ObserverRef};
pub use device::{
    encoder_model_rings, grid_model_dimensions, Device, DeviceEntry, DeviceKind, DeviceSink,
    Encoder, Grid, OutputsLeds, OutputsRings, Rotation, MAX_RINGS, RING_LEDS,
};
pub use error::{Error, Result};
pub use event::{EncDelta, EncKey, Event, EventKind, GridKey, Tilt};
pub use spec::{EncSpec, GridSpec, Spec};

/// Port the serialosc daemon listens on
pub const DEFAULT_SERIALOSC_PORT: u16 = 12002;

/// Local port gridlink receives on unless configured otherwise
pub const DEFAULT_LISTEN_PORT: u16 = 8001;
