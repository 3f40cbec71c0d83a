//! Clients
//!
//! A client declares what it needs ([`GridSpec`], [`EncSpec`]) and receives at
//! most one grid and one encoder from the context. Routed devices are reached
//! through the client itself: its output methods act on whatever is routed and
//! do nothing otherwise.

use gridlink_core::{
    isolate, Device, DeviceKind, EncDelta, EncKey, EncSpec, Encoder, Event, Grid, GridKey,
    GridSpec, OutputsLeds, OutputsRings, Result as CoreResult, Spec, Tilt,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::context::{Context, ContextInner};
use crate::error::{Result, RouterError};
use crate::responder::{DeviceEvent, Responder};

/// Opaque client identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type GridHook = Arc<dyn Fn(&Client, &Grid) + Send + Sync>;
type EncHook = Arc<dyn Fn(&Client, &Encoder) + Send + Sync>;
type ClientHook = Arc<dyn Fn(&Client) + Send + Sync>;
type Action<E> = Arc<dyn Fn(&Client, &E) + Send + Sync>;

#[derive(Default, Clone)]
struct Hooks {
    grid_routed: Option<GridHook>,
    grid_unrouted: Option<GridHook>,
    grid_refresh: Option<GridHook>,
    enc_routed: Option<EncHook>,
    enc_unrouted: Option<EncHook>,
    enc_refresh: Option<EncHook>,
    key: Option<Action<GridKey>>,
    tilt: Option<Action<Tilt>>,
    delta: Option<Action<EncDelta>>,
    enc_key: Option<Action<EncKey>>,
    will_free: Option<ClientHook>,
    on_free: Option<ClientHook>,
}

/// Routed devices and the responders feeding the client from them
#[derive(Default)]
pub(crate) struct Routing {
    pub(crate) grid: Option<(Grid, Vec<Responder>)>,
    pub(crate) enc: Option<(Encoder, Vec<Responder>)>,
}

pub(crate) struct ClientInner {
    id: ClientId,
    name: String,
    grid_spec: GridSpec,
    enc_spec: EncSpec,
    autoroute: bool,
    active: AtomicBool,
    hooks: RwLock<Hooks>,
    pub(crate) routing: RwLock<Routing>,
    context: Weak<ContextInner>,
}

/// Builder for [`Client`]; hand it to [`Context::add_client`]
pub struct ClientBuilder {
    name: String,
    grid_spec: GridSpec,
    enc_spec: EncSpec,
    autoroute: bool,
    hooks: Hooks,
    setup: Option<Box<dyn FnOnce(&Client) + Send>>,
}

impl ClientBuilder {
    /// Client using any grid and any encoder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            grid_spec: GridSpec::Any,
            enc_spec: EncSpec::Any,
            autoroute: true,
            hooks: Hooks::default(),
            setup: None,
        }
    }

    /// Grid-only client
    pub fn grid(name: impl Into<String>) -> Self {
        Self::new(name).enc_spec(EncSpec::None)
    }

    /// Encoder-only client
    pub fn enc(name: impl Into<String>) -> Self {
        Self::new(name).grid_spec(GridSpec::None)
    }

    pub fn grid_enc(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    pub fn grid_spec(mut self, spec: GridSpec) -> Self {
        self.grid_spec = spec;
        self
    }

    pub fn enc_spec(mut self, spec: EncSpec) -> Self {
        self.enc_spec = spec;
        self
    }

    /// Take part in automatic allocation (default true)
    pub fn autoroute(mut self, autoroute: bool) -> Self {
        self.autoroute = autoroute;
        self
    }

    pub fn on_grid_routed(mut self, f: impl Fn(&Client, &Grid) + Send + Sync + 'static) -> Self {
        self.hooks.grid_routed = Some(Arc::new(f));
        self
    }

    pub fn on_grid_unrouted(mut self, f: impl Fn(&Client, &Grid) + Send + Sync + 'static) -> Self {
        self.hooks.grid_unrouted = Some(Arc::new(f));
        self
    }

    /// Redraw the grid from scratch; called after routing and rotation changes
    pub fn on_grid_refresh(mut self, f: impl Fn(&Client, &Grid) + Send + Sync + 'static) -> Self {
        self.hooks.grid_refresh = Some(Arc::new(f));
        self
    }

    pub fn on_enc_routed(mut self, f: impl Fn(&Client, &Encoder) + Send + Sync + 'static) -> Self {
        self.hooks.enc_routed = Some(Arc::new(f));
        self
    }

    pub fn on_enc_unrouted(mut self, f: impl Fn(&Client, &Encoder) + Send + Sync + 'static) -> Self {
        self.hooks.enc_unrouted = Some(Arc::new(f));
        self
    }

    pub fn on_enc_refresh(mut self, f: impl Fn(&Client, &Encoder) + Send + Sync + 'static) -> Self {
        self.hooks.enc_refresh = Some(Arc::new(f));
        self
    }

    /// Key events from the routed grid
    pub fn on_key(mut self, f: impl Fn(&Client, &GridKey) + Send + Sync + 'static) -> Self {
        self.hooks.key = Some(Arc::new(f));
        self
    }

    pub fn on_tilt(mut self, f: impl Fn(&Client, &Tilt) + Send + Sync + 'static) -> Self {
        self.hooks.tilt = Some(Arc::new(f));
        self
    }

    /// Ring turns from the routed encoder
    pub fn on_delta(mut self, f: impl Fn(&Client, &EncDelta) + Send + Sync + 'static) -> Self {
        self.hooks.delta = Some(Arc::new(f));
        self
    }

    pub fn on_enc_key(mut self, f: impl Fn(&Client, &EncKey) + Send + Sync + 'static) -> Self {
        self.hooks.enc_key = Some(Arc::new(f));
        self
    }

    pub fn on_will_free(mut self, f: impl Fn(&Client) + Send + Sync + 'static) -> Self {
        self.hooks.will_free = Some(Arc::new(f));
        self
    }

    pub fn on_free(mut self, f: impl Fn(&Client) + Send + Sync + 'static) -> Self {
        self.hooks.on_free = Some(Arc::new(f));
        self
    }

    /// Runs once with the new client, before it is offered any device
    pub fn setup(mut self, f: impl FnOnce(&Client) + Send + 'static) -> Self {
        self.setup = Some(Box::new(f));
        self
    }

    pub(crate) fn build(
        self,
        id: ClientId,
        context: Weak<ContextInner>,
    ) -> (Client, Option<Box<dyn FnOnce(&Client) + Send>>) {
        let client = Client {
            inner: Arc::new(ClientInner {
                id,
                name: self.name,
                grid_spec: self.grid_spec,
                enc_spec: self.enc_spec,
                autoroute: self.autoroute,
                active: AtomicBool::new(true),
                hooks: RwLock::new(self.hooks),
                routing: RwLock::new(Routing::default()),
                context,
            }),
        };
        (client, self.setup)
    }
}

/// Handle to a registered client
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn grid_spec(&self) -> GridSpec {
        self.inner.grid_spec
    }

    pub fn enc_spec(&self) -> EncSpec {
        self.inner.enc_spec
    }

    /// Spec for `kind` as a trait object
    pub fn spec(&self, kind: DeviceKind) -> &dyn Spec {
        match kind {
            DeviceKind::Grid => &self.inner.grid_spec,
            DeviceKind::Encoder => &self.inner.enc_spec,
        }
    }

    pub fn uses(&self, kind: DeviceKind) -> bool {
        self.spec(kind).uses_device()
    }

    pub fn autoroute(&self) -> bool {
        self.inner.autoroute
    }

    /// False once freed
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub(crate) fn deactivate(&self) -> bool {
        self.inner.active.swap(false, Ordering::SeqCst)
    }

    pub fn grid(&self) -> Option<Grid> {
        self.inner.routing.read().grid.as_ref().map(|(grid, _)| grid.clone())
    }

    pub fn enc(&self) -> Option<Encoder> {
        self.inner.routing.read().enc.as_ref().map(|(enc, _)| enc.clone())
    }

    /// Routed device of `kind`
    pub fn device(&self, kind: DeviceKind) -> Option<Device> {
        match kind {
            DeviceKind::Grid => self.grid().map(Device::Grid),
            DeviceKind::Encoder => self.enc().map(Device::Encoder),
        }
    }

    pub fn ptr_eq(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn context(&self) -> Result<Context> {
        self.inner
            .context
            .upgrade()
            .map(Context::from_inner)
            .ok_or(RouterError::NotInitialized)
    }

    /// Route `device` to this client, displacing its current owner
    pub fn route(&self, device: &Device) -> Result<()> {
        self.context()?.route(device, self)
    }

    pub fn unroute_grid(&self) -> Result<()> {
        self.context()?.unroute(self, DeviceKind::Grid)
    }

    pub fn unroute_enc(&self) -> Result<()> {
        self.context()?.unroute(self, DeviceKind::Encoder)
    }

    /// Route the first connected grid and encoder to this client, for the
    /// kinds it uses
    pub fn grab_devices(&self) -> Result<()> {
        let context = self.context()?;
        for kind in [DeviceKind::Grid, DeviceKind::Encoder] {
            if !self.uses(kind) {
                continue;
            }
            if let Some(device) = context.connected(kind).into_iter().next() {
                context.route(&device, self)?;
            }
        }
        Ok(())
    }

    /// Leave the context. Freeing twice is a no-op.
    pub fn free(&self) -> Result<()> {
        match self.inner.context.upgrade() {
            Some(inner) => Context::from_inner(inner).free_client(self),
            None => {
                self.deactivate();
                Ok(())
            }
        }
    }

    /// Ask the client to redraw its routed devices
    pub fn refresh(&self) {
        if let Some(grid) = self.grid() {
            self.run_refresh(DeviceKind::Grid, &Device::Grid(grid));
        }
        if let Some(enc) = self.enc() {
            self.run_refresh(DeviceKind::Encoder, &Device::Encoder(enc));
        }
    }

    /// Switch routed outputs off, then refresh
    pub fn clear_and_refresh(&self) -> CoreResult<()> {
        if let Some(grid) = self.grid() {
            grid.clear_leds()?;
        }
        if let Some(enc) = self.enc() {
            enc.clear_rings()?;
        }
        self.refresh();
        Ok(())
    }

    fn hooks(&self) -> Hooks {
        self.inner.hooks.read().clone()
    }

    pub(crate) fn run_refresh(&self, kind: DeviceKind, device: &Device) {
        let hooks = self.hooks();
        match (kind, device) {
            (DeviceKind::Grid, Device::Grid(grid)) => {
                if let Some(hook) = hooks.grid_refresh {
                    isolate("grid refresh", || hook(self, grid));
                }
            }
            (DeviceKind::Encoder, Device::Encoder(enc)) => {
                if let Some(hook) = hooks.enc_refresh {
                    isolate("encoder refresh", || hook(self, enc));
                }
            }
            _ => {}
        }
    }

    pub(crate) fn run_routed(&self, device: &Device) {
        let hooks = self.hooks();
        match device {
            Device::Grid(grid) => {
                if let Some(hook) = hooks.grid_routed {
                    isolate("grid routed", || hook(self, grid));
                }
            }
            Device::Encoder(enc) => {
                if let Some(hook) = hooks.enc_routed {
                    isolate("encoder routed", || hook(self, enc));
                }
            }
        }
    }

    pub(crate) fn run_unrouted(&self, device: &Device) {
        let hooks = self.hooks();
        match device {
            Device::Grid(grid) => {
                if let Some(hook) = hooks.grid_unrouted {
                    isolate("grid unrouted", || hook(self, grid));
                }
            }
            Device::Encoder(enc) => {
                if let Some(hook) = hooks.enc_unrouted {
                    isolate("encoder unrouted", || hook(self, enc));
                }
            }
        }
    }

    pub(crate) fn run_will_free(&self) {
        if let Some(hook) = self.hooks().will_free {
            isolate("will free", || hook(self));
        }
    }

    pub(crate) fn run_on_free(&self) {
        if let Some(hook) = self.hooks().on_free {
            isolate("on free", || hook(self));
        }
    }

    /// Feed an event from a routed device to the matching action
    pub(crate) fn handle_event(&self, event: &DeviceEvent) {
        let hooks = self.hooks();
        match &event.event {
            Event::GridKey(key) => {
                if let Some(action) = hooks.key {
                    action(self, key)
                }
            }
            Event::Tilt(tilt) => {
                if let Some(action) = hooks.tilt {
                    action(self, tilt)
                }
            }
            Event::EncDelta(delta) => {
                if let Some(action) = hooks.delta {
                    action(self, delta)
                }
            }
            Event::EncKey(key) => {
                if let Some(action) = hooks.enc_key {
                    action(self, key)
                }
            }
        }
    }

    /// Closure for responders; holds the client weakly
    pub(crate) fn event_sink(&self) -> impl Fn(&DeviceEvent) + Send + Sync + 'static {
        let weak = Arc::downgrade(&self.inner);
        move |event: &DeviceEvent| {
            if let Some(inner) = weak.upgrade() {
                Client { inner }.handle_event(event)
            }
        }
    }

    fn with_grid(&self, f: impl FnOnce(&Grid) -> CoreResult<()>) -> CoreResult<()> {
        match self.grid() {
            Some(grid) => f(&grid),
            None => {
                debug!("client {} has no grid, output dropped", self.id());
                Ok(())
            }
        }
    }

    fn with_enc(&self, f: impl FnOnce(&Encoder) -> CoreResult<()>) -> CoreResult<()> {
        match self.enc() {
            Some(enc) => f(&enc),
            None => {
                debug!("client {} has no encoder, output dropped", self.id());
                Ok(())
            }
        }
    }
}

impl OutputsLeds for Client {
    fn led_set(&self, x: i32, y: i32, state: i32) -> CoreResult<()> {
        self.with_grid(|g| g.led_set(x, y, state))
    }

    fn led_all(&self, state: i32) -> CoreResult<()> {
        self.with_grid(|g| g.led_all(state))
    }

    fn led_map(&self, x_offset: i32, y_offset: i32, bitmasks: &[i32]) -> CoreResult<()> {
        self.with_grid(|g| g.led_map(x_offset, y_offset, bitmasks))
    }

    fn led_row(&self, x_offset: i32, y: i32, bitmasks: &[i32]) -> CoreResult<()> {
        self.with_grid(|g| g.led_row(x_offset, y, bitmasks))
    }

    fn led_col(&self, x: i32, y_offset: i32, bitmasks: &[i32]) -> CoreResult<()> {
        self.with_grid(|g| g.led_col(x, y_offset, bitmasks))
    }

    fn led_intensity(&self, intensity: i32) -> CoreResult<()> {
        self.with_grid(|g| g.led_intensity(intensity))
    }

    fn led_level_set(&self, x: i32, y: i32, level: i32) -> CoreResult<()> {
        self.with_grid(|g| g.led_level_set(x, y, level))
    }

    fn led_level_all(&self, level: i32) -> CoreResult<()> {
        self.with_grid(|g| g.led_level_all(level))
    }

    fn led_level_map(&self, x_offset: i32, y_offset: i32, levels: &[i32]) -> CoreResult<()> {
        self.with_grid(|g| g.led_level_map(x_offset, y_offset, levels))
    }

    fn led_level_row(&self, x_offset: i32, y: i32, levels: &[i32]) -> CoreResult<()> {
        self.with_grid(|g| g.led_level_row(x_offset, y, levels))
    }

    fn led_level_col(&self, x: i32, y_offset: i32, levels: &[i32]) -> CoreResult<()> {
        self.with_grid(|g| g.led_level_col(x, y_offset, levels))
    }

    fn tilt_set(&self, sensor: i32, active: bool) -> CoreResult<()> {
        self.with_grid(|g| g.tilt_set(sensor, active))
    }
}

impl OutputsRings for Client {
    fn ring_set(&self, ring: i32, x: i32, level: i32) -> CoreResult<()> {
        self.with_enc(|e| e.ring_set(ring, x, level))
    }

    fn ring_all(&self, ring: i32, level: i32) -> CoreResult<()> {
        self.with_enc(|e| e.ring_all(ring, level))
    }

    fn ring_map(&self, ring: i32, levels: &[i32]) -> CoreResult<()> {
        self.with_enc(|e| e.ring_map(ring, levels))
    }

    fn ring_range(&self, ring: i32, x1: i32, x2: i32, level: f32) -> CoreResult<()> {
        self.with_enc(|e| e.ring_range(ring, x1, x2, level))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("grid_spec", &self.grid_spec())
            .field("enc_spec", &self.enc_spec())
            .field("active", &self.is_active())
            .finish()
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlink_core::{DeviceEntry, DeviceSink};
    use gridlink_test_utils::{Collector, RecordingSink};

    fn detached(builder: ClientBuilder) -> Client {
        builder.build(ClientId(1), Weak::new()).0
    }

    #[test]
    fn test_builder_specs() {
        let grid_only = detached(ClientBuilder::grid("g"));
        assert!(grid_only.uses(DeviceKind::Grid));
        assert!(!grid_only.uses(DeviceKind::Encoder));

        let enc_only = detached(ClientBuilder::enc("e").enc_spec(EncSpec::exact(4)));
        assert!(!enc_only.uses(DeviceKind::Grid));
        assert_eq!(enc_only.enc_spec(), EncSpec::exact(4));
        assert!(enc_only.spec(DeviceKind::Encoder).is_exact());

        let both = detached(ClientBuilder::grid_enc("b").autoroute(false));
        assert!(both.uses(DeviceKind::Grid) && both.uses(DeviceKind::Encoder));
        assert!(!both.autoroute());
        assert_eq!(both.to_string(), "b (1)");
    }

    #[test]
    fn test_output_without_routed_device_is_noop() {
        let client = detached(ClientBuilder::new("c"));
        assert!(client.led_set(0, 0, 1).is_ok());
        assert!(client.ring_all(0, 15).is_ok());
        assert!(client.clear_and_refresh().is_ok());
    }

    #[test]
    fn test_output_reaches_routed_grid() {
        let sink = RecordingSink::new();
        let dyn_sink: Arc<dyn DeviceSink> = sink.clone();
        let device = Device::from_entry(&DeviceEntry::new("m1", "monome 64", 15000), dyn_sink);
        let client = detached(ClientBuilder::grid("c"));
        client.inner.routing.write().grid = Some((device.as_grid().unwrap().clone(), Vec::new()));

        client.led_row(0, 2, &[255]).unwrap();
        assert_eq!(sink.addresses_for(15000), vec!["/m1/grid/led/row"]);
    }

    #[test]
    fn test_free_without_context_deactivates() {
        let client = detached(ClientBuilder::new("c"));
        assert!(client.route(&Device::from_entry(
            &DeviceEntry::new("m1", "monome 64", 1),
            RecordingSink::new()
        ))
        .is_err());
        client.free().unwrap();
        client.free().unwrap();
        assert!(!client.is_active());
    }

    #[test]
    fn test_event_sink_dispatches_to_actions() {
        let keys: Collector<(i32, i32, i32)> = Collector::new();
        let k = keys.clone();
        let client = detached(ClientBuilder::grid("c").on_key(move |_, key| k.push((key.x, key.y, key.state))));
        let sink = client.event_sink();

        let device = Device::from_entry(&DeviceEntry::new("m1", "monome 64", 1), RecordingSink::new());
        sink(&DeviceEvent {
            device,
            event: Event::GridKey(GridKey { x: 2, y: 5, state: 1 }),
            time: std::time::SystemTime::now(),
            owner: Some(ClientId(1)),
            is_default: true,
        });

        assert_eq!(keys.values(), vec![(2, 5, 1)]);
    }
}
