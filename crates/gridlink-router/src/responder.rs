//! Event responders
//!
//! Each event kind has one slot holding a [`Chain`]. Registering or freeing a
//! responder swaps the slot for a new chain; dispatch clones the current chain
//! and walks it, so responders added or freed by a callback take effect on
//! the next event.

use gridlink_core::{
    callback, Callback, Chain, Device, EncDelta, EncKey, Event, EventKind, GridKey, Tilt,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::debug;

use crate::client::ClientId;

/// An inbound event together with its routing context
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    /// Source device
    pub device: Device,
    pub event: Event,
    /// Bundle time tag, or arrival time
    pub time: SystemTime,
    /// Client the device is routed to at dispatch time
    pub owner: Option<ClientId>,
    /// Source is the default device of its kind
    pub is_default: bool,
}

/// Which source devices a responder accepts
#[derive(Debug, Clone, Default)]
pub enum DeviceConstraint {
    #[default]
    Any,
    /// This exact device instance
    Device(Device),
    /// Whatever the default device of the event's kind is
    Default,
    Id(String),
    Model(String),
    Port(u16),
    /// Devices routed to this client
    Client(ClientId),
}

impl DeviceConstraint {
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        if event.device.kind() != event.event.kind().device_kind() {
            return false;
        }
        match self {
            DeviceConstraint::Any => true,
            DeviceConstraint::Device(device) => device.ptr_eq(&event.device),
            DeviceConstraint::Default => event.is_default,
            DeviceConstraint::Id(id) => event.device.id() == id,
            DeviceConstraint::Model(model) => event.device.model() == model,
            DeviceConstraint::Port(port) => event.device.port() == *port,
            DeviceConstraint::Client(client) => event.owner == Some(*client),
        }
    }
}

fn accepts(filter: Option<i32>, value: i32) -> bool {
    filter.map_or(true, |wanted| wanted == value)
}

/// Field filters for key events; `None` accepts any value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridKeyFilter {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub state: Option<i32>,
}

impl GridKeyFilter {
    pub fn any() -> Self {
        Self::default()
    }

    /// Key down events only
    pub fn press() -> Self {
        Self {
            state: Some(1),
            ..Self::default()
        }
    }

    /// Key up events only
    pub fn release() -> Self {
        Self {
            state: Some(0),
            ..Self::default()
        }
    }

    /// Restrict to one button
    pub fn at(self, x: i32, y: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..self
        }
    }

    pub fn accepts(&self, key: &GridKey) -> bool {
        accepts(self.x, key.x) && accepts(self.y, key.y) && accepts(self.state, key.state)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TiltFilter {
    pub sensor: Option<i32>,
}

impl TiltFilter {
    pub fn accepts(&self, tilt: &Tilt) -> bool {
        accepts(self.sensor, tilt.sensor)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncDeltaFilter {
    pub ring: Option<i32>,
}

impl EncDeltaFilter {
    pub fn ring(ring: i32) -> Self {
        Self { ring: Some(ring) }
    }

    pub fn accepts(&self, delta: &EncDelta) -> bool {
        accepts(self.ring, delta.ring)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncKeyFilter {
    pub ring: Option<i32>,
    pub state: Option<i32>,
}

impl EncKeyFilter {
    pub fn press() -> Self {
        Self {
            ring: None,
            state: Some(1),
        }
    }

    pub fn release() -> Self {
        Self {
            ring: None,
            state: Some(0),
        }
    }

    pub fn accepts(&self, key: &EncKey) -> bool {
        accepts(self.ring, key.ring) && accepts(self.state, key.state)
    }
}

struct ResponderInner {
    kind: EventKind,
    constraint: DeviceConstraint,
    callback: Callback<DeviceEvent>,
    registry: Weak<ResponderRegistry>,
    freed: AtomicBool,
}

/// Handle to a registered listener
#[derive(Clone)]
pub struct Responder {
    inner: Arc<ResponderInner>,
}

impl Responder {
    pub fn kind(&self) -> EventKind {
        self.inner.kind
    }

    pub fn constraint(&self) -> &DeviceConstraint {
        &self.inner.constraint
    }

    pub fn is_freed(&self) -> bool {
        self.inner.freed.load(Ordering::SeqCst)
    }

    /// Remove from the kind's chain. Freeing twice is a no-op.
    pub fn free(&self) {
        if self.inner.freed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(self);
        }
    }

    fn ptr_eq(&self, other: &Responder) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("kind", &self.inner.kind)
            .field("constraint", &self.inner.constraint)
            .field("freed", &self.is_freed())
            .finish()
    }
}

/// Ordered responders for every event kind
pub struct ResponderRegistry {
    chains: [RwLock<Chain<DeviceEvent>>; 4],
    live: Mutex<Vec<Responder>>,
}

fn slot(kind: EventKind) -> usize {
    match kind {
        EventKind::GridKey => 0,
        EventKind::Tilt => 1,
        EventKind::EncDelta => 2,
        EventKind::EncKey => 3,
    }
}

impl ResponderRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chains: Default::default(),
            live: Mutex::new(Vec::new()),
        })
    }

    /// Append a responder for `kind`. The action runs for every event of the
    /// kind whose device satisfies `constraint`.
    pub fn register<F>(self: &Arc<Self>, kind: EventKind, constraint: DeviceConstraint, action: F) -> Responder
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        let filter = constraint.clone();
        let callback = callback(move |event: &DeviceEvent| {
            if filter.matches(event) {
                action(event)
            }
        });
        let responder = Responder {
            inner: Arc::new(ResponderInner {
                kind,
                constraint,
                callback: callback.clone(),
                registry: Arc::downgrade(self),
                freed: AtomicBool::new(false),
            }),
        };

        {
            let mut chain = self.chains[slot(kind)].write();
            *chain = chain.add(callback);
        }
        self.live.lock().push(responder.clone());
        debug!("responder added for {:?} ({:?})", kind, responder.constraint());
        responder
    }

    pub fn on_grid_key<F>(self: &Arc<Self>, filter: GridKeyFilter, constraint: DeviceConstraint, f: F) -> Responder
    where
        F: Fn(&GridKey, &DeviceEvent) + Send + Sync + 'static,
    {
        self.register(EventKind::GridKey, constraint, move |event| {
            if let Event::GridKey(key) = &event.event {
                if filter.accepts(key) {
                    f(key, event)
                }
            }
        })
    }

    pub fn on_tilt<F>(self: &Arc<Self>, filter: TiltFilter, constraint: DeviceConstraint, f: F) -> Responder
    where
        F: Fn(&Tilt, &DeviceEvent) + Send + Sync + 'static,
    {
        self.register(EventKind::Tilt, constraint, move |event| {
            if let Event::Tilt(tilt) = &event.event {
                if filter.accepts(tilt) {
                    f(tilt, event)
                }
            }
        })
    }

    pub fn on_enc_delta<F>(self: &Arc<Self>, filter: EncDeltaFilter, constraint: DeviceConstraint, f: F) -> Responder
    where
        F: Fn(&EncDelta, &DeviceEvent) + Send + Sync + 'static,
    {
        self.register(EventKind::EncDelta, constraint, move |event| {
            if let Event::EncDelta(delta) = &event.event {
                if filter.accepts(delta) {
                    f(delta, event)
                }
            }
        })
    }

    pub fn on_enc_key<F>(self: &Arc<Self>, filter: EncKeyFilter, constraint: DeviceConstraint, f: F) -> Responder
    where
        F: Fn(&EncKey, &DeviceEvent) + Send + Sync + 'static,
    {
        self.register(EventKind::EncKey, constraint, move |event| {
            if let Event::EncKey(key) = &event.event {
                if filter.accepts(key) {
                    f(key, event)
                }
            }
        })
    }

    fn remove(&self, responder: &Responder) {
        {
            let mut chain = self.chains[slot(responder.kind())].write();
            *chain = chain.remove(&responder.inner.callback);
        }
        self.live.lock().retain(|r| !r.ptr_eq(responder));
        debug!("responder removed for {:?}", responder.kind());
    }

    /// Run the chain of the event's kind, in registration order
    pub fn dispatch(&self, event: &DeviceEvent) {
        let chain = self.chains[slot(event.event.kind())].read().clone();
        chain.call(event);
    }

    /// Current chain for `kind`
    pub fn chain(&self, kind: EventKind) -> Chain<DeviceEvent> {
        self.chains[slot(kind)].read().clone()
    }

    /// Live responders of `kind`, oldest first
    pub fn responders(&self, kind: EventKind) -> Vec<Responder> {
        self.live
            .lock()
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    /// Free every responder of `kind`, or of every kind with `None`
    pub fn free_all(&self, kind: Option<EventKind>) {
        let doomed: Vec<Responder> = self
            .live
            .lock()
            .iter()
            .filter(|r| kind.map_or(true, |k| r.kind() == k))
            .cloned()
            .collect();
        for responder in doomed {
            responder.free();
        }
    }
}
