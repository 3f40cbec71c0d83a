//! gridlink router
//!
//! Keeps the set of attached serialosc devices, hands them to clients and
//! delivers their events.
//!
//! This crate provides:
//! - A device registry reconciled against discovery responses ([`Registry`])
//! - Strict/loose allocation and default device policy ([`allocation`])
//! - Clients with per-kind device specs and callbacks ([`Client`])
//! - Constraint-filtered event responders ([`ResponderRegistry`])
//! - Lifecycle notifications ([`Notification`], [`NotificationController`])
//! - The [`Context`] tying these together
//!
//! # Example
//!
//! ```no_run
//! use gridlink_router::{ClientBuilder, Context, RouterConfig};
//! use gridlink_core::OutputsLeds;
//!
//! # async fn run() -> gridlink_router::Result<()> {
//! let context = Context::new(RouterConfig::default());
//! context.init().await?;
//!
//! let client = context.add_client(
//!     ClientBuilder::grid("echo").on_key(|client, key| {
//!         let _ = client.led_set(key.x, key.y, key.state);
//!     }),
//! )?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

pub mod allocation;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod notification;
pub mod registry;
pub mod responder;

pub use client::{Client, ClientBuilder, ClientId};
pub use config::RouterConfig;
pub use context::Context;
pub use error::{Result, RouterError};
pub use notification::{Notification, NotificationBus, NotificationController, Subject, Topic};
pub use registry::{ReconcilePlan, Registry, RegistryEntry};
pub use responder::{
    DeviceConstraint, DeviceEvent, EncDeltaFilter, EncKeyFilter, GridKeyFilter, Responder,
    ResponderRegistry, TiltFilter,
};
