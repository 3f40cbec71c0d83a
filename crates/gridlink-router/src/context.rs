//! Process-scoped router state
//!
//! A [`Context`] owns the device registry, the client list, the default
//! device pointers, the responder registry and the notification bus.
//!
//! State changes happen under one lock and produce a list of effects
//! (notifications, output clears, client callbacks, device configuration).
//! Effects run after the lock is released, in the order they were produced,
//! so callbacks may call back into the context.
//!
//! Reconciliation is additionally serialized by an async guard held across
//! the discovery query, so attach and detach handling cannot interleave.

use gridlink_core::{
    address, isolate, Device, DeviceEntry, DeviceKind, DeviceSink, EncDelta, EncKey, Encoder,
    Event, EventKind, Grid, GridKey, ObserverRef, Rotation, Tilt,
};
use gridlink_discovery::SerialOsc;
use parking_lot::Mutex;
use rosc::OscMessage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::allocation;
use crate::client::{Client, ClientBuilder, ClientId};
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::notification::{Notification, NotificationBus, Subject};
use crate::registry::{ReconcilePlan, Registry};
use crate::responder::{
    DeviceConstraint, DeviceEvent, EncDeltaFilter, EncKeyFilter, GridKeyFilter, Responder,
    ResponderRegistry, TiltFilter,
};

const KINDS: [DeviceKind; 2] = [DeviceKind::Grid, DeviceKind::Encoder];

#[derive(Default)]
struct RoutingState {
    registry: Registry,
    default_grid: Option<Device>,
    default_enc: Option<Device>,
    clients: Vec<Client>,
}

impl RoutingState {
    fn default_device(&self, kind: DeviceKind) -> Option<&Device> {
        match kind {
            DeviceKind::Grid => self.default_grid.as_ref(),
            DeviceKind::Encoder => self.default_enc.as_ref(),
        }
    }

    fn set_default(&mut self, kind: DeviceKind, device: Option<Device>) {
        match kind {
            DeviceKind::Grid => self.default_grid = device,
            DeviceKind::Encoder => self.default_enc = device,
        }
    }

    fn is_default(&self, device: &Device) -> bool {
        self.default_device(device.kind())
            .map_or(false, |d| d.ptr_eq(device))
    }

    fn client(&self, id: ClientId) -> Option<Client> {
        self.clients.iter().find(|c| c.id() == id).cloned()
    }
}

/// Deferred work produced while the state lock is held
enum Effect {
    Notify(Notification),
    /// Point the device's prefix and destination port at us
    Configure(Device),
    ClearOutput(Device),
    Refresh(Client, Device),
    Routed(Client, Device),
    Unrouted(Client, Device),
}

pub(crate) struct ContextInner {
    config: RouterConfig,
    serialosc: Arc<SerialOsc>,
    sink: Arc<dyn DeviceSink>,
    state: Mutex<RoutingState>,
    reconcile: tokio::sync::Mutex<()>,
    responders: Arc<ResponderRegistry>,
    bus: NotificationBus,
    initialized: AtomicBool,
    next_client: AtomicU64,
}

/// Router context
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(config: RouterConfig) -> Self {
        let serialosc = Arc::new(SerialOsc::new(config.serialosc.clone()));
        let sink: Arc<dyn DeviceSink> = serialosc.clone();
        Self {
            inner: Arc::new(ContextInner {
                config,
                serialosc,
                sink,
                state: Mutex::new(RoutingState::default()),
                reconcile: tokio::sync::Mutex::new(()),
                responders: ResponderRegistry::new(),
                bus: NotificationBus::new(),
                initialized: AtomicBool::new(false),
                next_client: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn serialosc(&self) -> &Arc<SerialOsc> {
        &self.inner.serialosc
    }

    /// Port device events arrive on, once initialized
    pub fn local_port(&self) -> Option<u16> {
        self.inner.serialosc.local_port()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(RouterError::NotInitialized)
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the endpoint, subscribe to attach/detach notifications and load
    /// the device list. Calling it again is a no-op.
    pub async fn init(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let endpoint = self.inner.serialosc.start()?;
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .serialosc
            .set_event_handler(Some(Arc::new(move |msg: &OscMessage, time: SystemTime| {
                if let Some(inner) = weak.upgrade() {
                    Context::from_inner(inner).handle_message(msg, time);
                }
            })));

        if self.inner.config.autodiscover && !self.inner.serialosc.is_tracking() {
            let on_added = Arc::downgrade(&self.inner);
            let on_removed = Arc::downgrade(&self.inner);
            self.inner.serialosc.start_tracking(
                move |id: &str| {
                    let Some(inner) = on_added.upgrade() else {
                        return;
                    };
                    let id = id.to_string();
                    tokio::spawn(async move {
                        if let Err(e) = Context::from_inner(inner).device_added(&id).await {
                            warn!("handling attach of {} failed: {}", id, e);
                        }
                    });
                },
                move |id: &str| {
                    let Some(inner) = on_removed.upgrade() else {
                        return;
                    };
                    let id = id.to_string();
                    tokio::spawn(async move {
                        Context::from_inner(inner).device_removed(&id).await;
                    });
                },
            )?;
        }

        self.inner.initialized.store(true, Ordering::SeqCst);
        info!("router initialized, receiving on port {}", endpoint.port());
        self.refresh_devices().await
    }

    /// Free every client and responder, forget all devices and close the
    /// endpoint. [`Context::init`] may be called again afterwards.
    pub fn shutdown(&self) {
        if !self.inner.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        for client in self.clients() {
            if let Err(e) = self.free_client(&client) {
                warn!("freeing client {} failed: {}", client, e);
            }
        }
        self.inner.responders.free_all(None);
        {
            let mut state = self.inner.state.lock();
            state.registry.clear();
            state.default_grid = None;
            state.default_enc = None;
            state.clients.clear();
        }
        self.inner.serialosc.set_event_handler(None);
        self.inner.serialosc.stop();
        info!("router shut down");
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Re-list devices from the daemon and sync the registry with the result
    pub async fn refresh_devices(&self) -> Result<()> {
        self.ensure_initialized()?;
        let _guard = self.inner.reconcile.lock().await;
        let entries = self.inner.serialosc.request_device_list(None).await?;
        self.sync(|registry| registry.plan(&entries));
        Ok(())
    }

    /// Sync the registry with a caller-supplied device list
    pub async fn apply_device_list(&self, entries: &[DeviceEntry]) -> Result<()> {
        self.ensure_initialized()?;
        let _guard = self.inner.reconcile.lock().await;
        self.sync(|registry| registry.plan(entries));
        Ok(())
    }

    async fn device_added(&self, id: &str) -> Result<()> {
        debug!("serialosc reports {} attached", id);
        self.refresh_devices().await
    }

    async fn device_removed(&self, id: &str) {
        debug!("serialosc reports {} detached", id);
        let _guard = self.inner.reconcile.lock().await;
        self.sync(|registry| registry.plan_removal(id));
    }

    fn sync(&self, plan: impl FnOnce(&Registry) -> ReconcilePlan) {
        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let plan = plan(&state.registry);
            self.sync_locked(&mut state, plan, &mut fx);
        }
        self.run(fx);
    }

    /// Disconnect and drop removed devices, add new ones, connect them when
    /// autoconnecting, then update defaults and autoroute once for the batch
    fn sync_locked(&self, state: &mut RoutingState, plan: ReconcilePlan, fx: &mut Vec<Effect>) {
        if plan.is_empty() {
            return;
        }
        for device in &plan.removed {
            self.disconnect_locked(state, device, fx);
        }

        let (added, removed) = state.registry.apply(plan, &self.inner.sink);
        fx.extend(removed.into_iter().map(|d| Effect::Notify(Notification::Detached(d))));
        fx.extend(added.iter().map(|d| Effect::Notify(Notification::Attached(d.clone()))));

        let newly: Vec<Device> = if self.inner.config.autoconnect {
            added
                .into_iter()
                .filter(|device| self.connect_locked(state, device, fx))
                .collect()
        } else {
            Vec::new()
        };

        self.update_defaults(state, &newly, fx);
        if !newly.is_empty() {
            let clients = state.clients.clone();
            self.autoroute_locked(state, &clients, &[true, false], fx);
        }
    }

    fn connect_locked(&self, state: &mut RoutingState, device: &Device, fx: &mut Vec<Effect>) -> bool {
        match state.registry.entry_mut(device) {
            Some(entry) if !entry.connected => entry.connected = true,
            _ => return false,
        }
        fx.push(Effect::Configure(device.clone()));
        fx.push(Effect::Notify(Notification::Connected(device.clone())));
        true
    }

    fn disconnect_locked(&self, state: &mut RoutingState, device: &Device, fx: &mut Vec<Effect>) -> bool {
        if let Some(owner) = state.registry.owner(device) {
            match state.client(owner) {
                Some(client) => {
                    self.unroute_locked(state, &client, device.kind(), fx);
                }
                None => {
                    if let Some(entry) = state.registry.entry_mut(device) {
                        entry.owner = None;
                    }
                }
            }
        }
        match state.registry.entry_mut(device) {
            Some(entry) if entry.connected => entry.connected = false,
            _ => return false,
        }
        fx.push(Effect::Notify(Notification::Disconnected(device.clone())));
        true
    }

    fn update_defaults(&self, state: &mut RoutingState, newly: &[Device], fx: &mut Vec<Effect>) {
        for kind in KINDS {
            let current = state.default_device(kind).cloned();
            let next = allocation::choose_default(&state.registry, kind, current.as_ref(), newly);
            if !same_device(current.as_ref(), next.as_ref()) {
                state.set_default(kind, next.clone());
                fx.push(Effect::Notify(Notification::DefaultChanged { kind, device: next }));
            }
        }
    }

    /// Offer free devices to `clients`, one pass per entry of `passes`
    /// (`true` = strict)
    fn autoroute_locked(
        &self,
        state: &mut RoutingState,
        clients: &[Client],
        passes: &[bool],
        fx: &mut Vec<Effect>,
    ) {
        for &strict in passes {
            for client in clients {
                if !client.autoroute() || !client.is_active() {
                    continue;
                }
                for kind in KINDS {
                    if !client.uses(kind) || client.device(kind).is_some() {
                        continue;
                    }
                    let candidate = allocation::find_candidate(
                        &state.registry,
                        client.spec(kind),
                        state.default_device(kind),
                        strict,
                    );
                    let Some(device) = candidate else {
                        continue;
                    };
                    debug!(
                        "autorouting {} to {} ({} pass)",
                        device,
                        client,
                        if strict { "strict" } else { "loose" }
                    );
                    if let Err(e) = self.route_locked(state, &device, client, fx) {
                        warn!("autoroute of {} to {} failed: {}", device, client, e);
                    }
                }
            }
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Configure a registered device to talk to us and offer it to clients
    pub fn connect(&self, device: &Device) -> Result<()> {
        self.ensure_initialized()?;
        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if !state.registry.contains(device) {
                return Err(RouterError::UnknownDevice(device.id().to_string()));
            }
            if self.connect_locked(&mut state, device, &mut fx) {
                self.update_defaults(&mut state, std::slice::from_ref(device), &mut fx);
                let clients = state.clients.clone();
                self.autoroute_locked(&mut state, &clients, &[true, false], &mut fx);
            }
        }
        self.run(fx);
        Ok(())
    }

    /// Unroute a device and stop accepting its events
    pub fn disconnect(&self, device: &Device) -> Result<()> {
        self.ensure_initialized()?;
        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if !state.registry.contains(device) {
                return Err(RouterError::UnknownDevice(device.id().to_string()));
            }
            if self.disconnect_locked(&mut state, device, &mut fx) {
                self.update_defaults(&mut state, &[], &mut fx);
            }
        }
        self.run(fx);
        Ok(())
    }

    pub fn connect_all(&self) -> Result<()> {
        self.ensure_initialized()?;
        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let devices: Vec<Device> = state.registry.entries().iter().map(|e| e.device.clone()).collect();
            let newly: Vec<Device> = devices
                .into_iter()
                .filter(|device| self.connect_locked(&mut state, device, &mut fx))
                .collect();
            self.update_defaults(&mut state, &newly, &mut fx);
            if !newly.is_empty() {
                let clients = state.clients.clone();
                self.autoroute_locked(&mut state, &clients, &[true, false], &mut fx);
            }
        }
        self.run(fx);
        Ok(())
    }

    pub fn disconnect_all(&self) -> Result<()> {
        self.ensure_initialized()?;
        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let devices: Vec<Device> = state.registry.entries().iter().map(|e| e.device.clone()).collect();
            for device in &devices {
                self.disconnect_locked(&mut state, device, &mut fx);
            }
            self.update_defaults(&mut state, &[], &mut fx);
        }
        self.run(fx);
        Ok(())
    }

    // ========================================================================
    // Clients and routing
    // ========================================================================

    /// Register a client and offer it free devices
    pub fn add_client(&self, builder: ClientBuilder) -> Result<Client> {
        self.ensure_initialized()?;
        let id = ClientId(self.inner.next_client.fetch_add(1, Ordering::SeqCst));
        let (client, setup) = builder.build(id, Arc::downgrade(&self.inner));
        if let Some(setup) = setup {
            isolate("client setup", || setup(&client));
        }

        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.clients.push(client.clone());
            self.autoroute_locked(&mut state, std::slice::from_ref(&client), &[false], &mut fx);
        }
        self.run(fx);
        debug!("client {} added", client);
        Ok(client)
    }

    pub(crate) fn free_client(&self, client: &Client) -> Result<()> {
        if !client.deactivate() {
            return Ok(());
        }
        client.run_will_free();

        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            for kind in KINDS {
                self.unroute_locked(&mut state, client, kind, &mut fx);
            }
            state.clients.retain(|c| !c.ptr_eq(client));
        }
        self.run(fx);

        client.run_on_free();
        debug!("client {} freed", client);
        Ok(())
    }

    /// Free every client
    pub fn free_all(&self) {
        for client in self.clients() {
            if let Err(e) = self.free_client(&client) {
                warn!("freeing client {} failed: {}", client, e);
            }
        }
    }

    /// Route `device` to `client`.
    ///
    /// The client's current device of that kind and the device's current
    /// owner are unrouted first.
    pub fn route(&self, device: &Device, client: &Client) -> Result<()> {
        self.ensure_initialized()?;
        let mut fx = Vec::new();
        let result = {
            let mut state = self.inner.state.lock();
            self.route_locked(&mut state, device, client, &mut fx)
        };
        self.run(fx);
        result
    }

    /// Unroute the client's device of `kind`, if any
    pub fn unroute(&self, client: &Client, kind: DeviceKind) -> Result<()> {
        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            self.unroute_locked(&mut state, client, kind, &mut fx);
        }
        self.run(fx);
        Ok(())
    }

    fn route_locked(
        &self,
        state: &mut RoutingState,
        device: &Device,
        client: &Client,
        fx: &mut Vec<Effect>,
    ) -> Result<()> {
        let kind = device.kind();
        if !client.uses(kind) {
            return Err(RouterError::Incompatible {
                client: client.name().to_string(),
                kind,
            });
        }
        if !client.is_active() {
            return Err(RouterError::ClientFreed(client.name().to_string()));
        }
        match state.registry.entry(device) {
            None => return Err(RouterError::UnknownDevice(device.id().to_string())),
            Some(entry) if !entry.connected => {
                return Err(RouterError::DeviceNotConnected(device.id().to_string()))
            }
            Some(_) => {}
        }

        if client.device(kind).is_some() {
            self.unroute_locked(state, client, kind, fx);
        }
        if let Some(owner) = state.registry.owner(device) {
            match state.client(owner) {
                Some(previous) => {
                    self.unroute_locked(state, &previous, kind, fx);
                }
                None => {
                    if let Some(entry) = state.registry.entry_mut(device) {
                        entry.owner = None;
                    }
                }
            }
        }
        if let Some(entry) = state.registry.entry_mut(device) {
            entry.owner = Some(client.id());
        }

        let event_kinds: &[EventKind] = match kind {
            DeviceKind::Grid => &[EventKind::GridKey, EventKind::Tilt],
            DeviceKind::Encoder => &[EventKind::EncDelta, EventKind::EncKey],
        };
        let responders: Vec<Responder> = event_kinds
            .iter()
            .map(|&event_kind| {
                self.inner.responders.register(
                    event_kind,
                    DeviceConstraint::Client(client.id()),
                    client.event_sink(),
                )
            })
            .collect();
        {
            let mut routing = client.inner.routing.write();
            match device {
                Device::Grid(grid) => routing.grid = Some((grid.clone(), responders)),
                Device::Encoder(enc) => routing.enc = Some((enc.clone(), responders)),
            }
        }

        if !client.spec(kind).matches(device) {
            warn!(
                "{} does not match {} spec {} of client {}",
                device,
                kind,
                client.spec(kind),
                client
            );
        }
        debug!("routed {} to {}", device, client);

        fx.push(Effect::ClearOutput(device.clone()));
        fx.push(Effect::Refresh(client.clone(), device.clone()));
        fx.push(Effect::Routed(client.clone(), device.clone()));
        fx.push(Effect::Notify(Notification::Routed {
            device: device.clone(),
            client: client.id(),
        }));
        Ok(())
    }

    fn unroute_locked(
        &self,
        state: &mut RoutingState,
        client: &Client,
        kind: DeviceKind,
        fx: &mut Vec<Effect>,
    ) -> Option<Device> {
        let (device, responders) = {
            let mut routing = client.inner.routing.write();
            match kind {
                DeviceKind::Grid => routing.grid.take().map(|(g, r)| (Device::Grid(g), r)),
                DeviceKind::Encoder => routing.enc.take().map(|(e, r)| (Device::Encoder(e), r)),
            }
        }?;

        if let Some(entry) = state.registry.entry_mut(&device) {
            if entry.owner == Some(client.id()) {
                entry.owner = None;
            }
        }
        for responder in responders {
            responder.free();
        }
        debug!("unrouted {} from {}", device, client);

        fx.push(Effect::ClearOutput(device.clone()));
        fx.push(Effect::Unrouted(client.clone(), device.clone()));
        fx.push(Effect::Notify(Notification::Unrouted {
            device: device.clone(),
            client: client.id(),
        }));
        Some(device)
    }

    /// Make `device` the default of `kind`, or clear the default with `None`
    pub fn set_default(&self, kind: DeviceKind, device: Option<&Device>) -> Result<()> {
        let mut fx = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if let Some(device) = device {
                if device.kind() != kind {
                    return Err(RouterError::WrongKind {
                        device: device.id().to_string(),
                        expected: kind,
                    });
                }
                match state.registry.entry(device) {
                    None => return Err(RouterError::UnknownDevice(device.id().to_string())),
                    Some(entry) if !entry.connected => {
                        return Err(RouterError::DeviceNotConnected(device.id().to_string()))
                    }
                    Some(_) => {}
                }
            }
            if !same_device(state.default_device(kind), device) {
                state.set_default(kind, device.cloned());
                fx.push(Effect::Notify(Notification::DefaultChanged {
                    kind,
                    device: device.cloned(),
                }));
            }
        }
        self.run(fx);
        Ok(())
    }

    /// Rotate a grid. Its owner, if any, is cleared and refreshed.
    pub fn set_grid_rotation(&self, grid: &Grid, degrees: i32) -> Result<()> {
        let rotation = Rotation::try_from(degrees)?;
        let device = Device::Grid(grid.clone());
        let owner = {
            let state = self.inner.state.lock();
            if !state.registry.contains(&device) {
                return Err(RouterError::UnknownDevice(grid.id().to_string()));
            }
            state.registry.owner(&device).and_then(|id| state.client(id))
        };

        self.inner.serialosc.set_rotation(grid.port(), degrees)?;
        grid.store_rotation(rotation);

        let mut fx = vec![Effect::Notify(Notification::Rotation {
            device: device.clone(),
            rotation,
        })];
        if let Some(client) = owner {
            if !client.spec(DeviceKind::Grid).matches(&device) {
                warn!(
                    "{} no longer matches grid spec {} of client {}",
                    grid,
                    client.grid_spec(),
                    client
                );
            }
            fx.push(Effect::ClearOutput(device.clone()));
            fx.push(Effect::Refresh(client, device));
        }
        self.run(fx);
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn default_device(&self, kind: DeviceKind) -> Option<Device> {
        self.inner.state.lock().default_device(kind).cloned()
    }

    pub fn default_grid(&self) -> Option<Grid> {
        self.default_device(DeviceKind::Grid)
            .and_then(|d| d.as_grid().cloned())
    }

    pub fn default_encoder(&self) -> Option<Encoder> {
        self.default_device(DeviceKind::Encoder)
            .and_then(|d| d.as_encoder().cloned())
    }

    /// (columns, rows) of the default grid at its current rotation
    pub fn default_grid_dimensions(&self) -> Option<(u16, u16)> {
        self.default_grid().map(|g| (g.num_cols(), g.num_rows()))
    }

    pub fn default_num_rings(&self) -> Option<u16> {
        self.default_encoder().map(|e| e.num_rings())
    }

    /// Sweep every LED of the default grid on and off, pacing each step
    pub async fn test_default_grid(&self, step: Duration) -> Result<()> {
        let grid = self
            .default_grid()
            .ok_or(RouterError::NoDefault(DeviceKind::Grid))?;
        info!(grid = %grid, "running led test");
        tokio::task::spawn_blocking(move || grid.test_leds(step))
            .await
            .map_err(|e| RouterError::Task(e.to_string()))??;
        Ok(())
    }

    /// Sweep every ring LED of the default encoder on and off
    pub async fn test_default_encoder(&self, step: Duration) -> Result<()> {
        let enc = self
            .default_encoder()
            .ok_or(RouterError::NoDefault(DeviceKind::Encoder))?;
        info!(enc = %enc, "running ring test");
        tokio::task::spawn_blocking(move || enc.test_rings(step))
            .await
            .map_err(|e| RouterError::Task(e.to_string()))??;
        Ok(())
    }

    /// Registered devices of `kind`, in attach order
    pub fn devices(&self, kind: DeviceKind) -> Vec<Device> {
        self.inner.state.lock().registry.devices(kind)
    }

    pub fn connected(&self, kind: DeviceKind) -> Vec<Device> {
        self.inner.state.lock().registry.connected(kind)
    }

    pub fn unrouted(&self, kind: DeviceKind) -> Vec<Device> {
        self.inner.state.lock().registry.unrouted(kind)
    }

    pub fn grids(&self) -> Vec<Grid> {
        self.devices(DeviceKind::Grid)
            .iter()
            .filter_map(|d| d.as_grid().cloned())
            .collect()
    }

    pub fn encoders(&self) -> Vec<Encoder> {
        self.devices(DeviceKind::Encoder)
            .iter()
            .filter_map(|d| d.as_encoder().cloned())
            .collect()
    }

    pub fn clients(&self) -> Vec<Client> {
        self.inner.state.lock().clients.clone()
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<Device> {
        self.inner
            .state
            .lock()
            .registry
            .lookup_by_id(id)
            .map(|e| e.device.clone())
    }

    pub fn lookup_by_port(&self, port: u16) -> Option<Device> {
        self.inner
            .state
            .lock()
            .registry
            .lookup_by_port(port)
            .map(|e| e.device.clone())
    }

    pub fn is_connected(&self, device: &Device) -> bool {
        self.inner.state.lock().registry.is_connected(device)
    }

    /// Client the device is routed to
    pub fn owner(&self, device: &Device) -> Option<Client> {
        let state = self.inner.state.lock();
        state.registry.owner(device).and_then(|id| state.client(id))
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Feed a decoded event from `device` through the responders
    pub fn dispatch_event(&self, device: &Device, event: Event) -> Result<()> {
        self.dispatch_at(device, event, SystemTime::now())
    }

    fn dispatch_at(&self, device: &Device, event: Event, time: SystemTime) -> Result<()> {
        let device_event = {
            let state = self.inner.state.lock();
            let entry = state
                .registry
                .entry(device)
                .ok_or_else(|| RouterError::UnknownDevice(device.id().to_string()))?;
            if !entry.connected {
                return Err(RouterError::DeviceNotConnected(device.id().to_string()));
            }
            DeviceEvent {
                device: entry.device.clone(),
                event,
                time,
                owner: entry.owner,
                is_default: state.is_default(device),
            }
        };
        self.inner.responders.dispatch(&device_event);
        Ok(())
    }

    /// Inbound `/<id><suffix>` event message from the endpoint
    fn handle_message(&self, msg: &OscMessage, time: SystemTime) {
        let Some((prefix, suffix)) = address::split_prefix(&msg.addr) else {
            debug!("ignoring unprefixed {}", msg.addr);
            return;
        };
        let Some(kind) = EventKind::from_suffix(suffix) else {
            debug!("ignoring {}", msg.addr);
            return;
        };
        let device = {
            let state = self.inner.state.lock();
            state
                .registry
                .lookup_by_id(prefix)
                .filter(|e| e.connected)
                .map(|e| e.device.clone())
        };
        let Some(device) = device else {
            debug!("{} from unknown or disconnected device {}", suffix, prefix);
            return;
        };
        let event = match Event::decode(kind, &msg.args) {
            Ok(event) => event,
            Err(e) => {
                warn!("dropping {}: {}", msg.addr, e);
                return;
            }
        };
        if let Err(e) = self.dispatch_at(&device, event, time) {
            debug!("event from {} not dispatched: {}", prefix, e);
        }
    }

    pub fn responders(&self) -> &Arc<ResponderRegistry> {
        &self.inner.responders
    }

    pub fn on_grid_key<F>(&self, filter: GridKeyFilter, constraint: DeviceConstraint, f: F) -> Responder
    where
        F: Fn(&GridKey, &DeviceEvent) + Send + Sync + 'static,
    {
        self.inner.responders.on_grid_key(filter, constraint, f)
    }

    pub fn on_tilt<F>(&self, filter: TiltFilter, constraint: DeviceConstraint, f: F) -> Responder
    where
        F: Fn(&Tilt, &DeviceEvent) + Send + Sync + 'static,
    {
        self.inner.responders.on_tilt(filter, constraint, f)
    }

    pub fn on_enc_delta<F>(&self, filter: EncDeltaFilter, constraint: DeviceConstraint, f: F) -> Responder
    where
        F: Fn(&EncDelta, &DeviceEvent) + Send + Sync + 'static,
    {
        self.inner.responders.on_enc_delta(filter, constraint, f)
    }

    pub fn on_enc_key<F>(&self, filter: EncKeyFilter, constraint: DeviceConstraint, f: F) -> Responder
    where
        F: Fn(&EncKey, &DeviceEvent) + Send + Sync + 'static,
    {
        self.inner.responders.on_enc_key(filter, constraint, f)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    pub fn watch(&self, subject: Subject, observer: ObserverRef<Subject, Notification>) {
        self.inner.bus.add(subject, observer);
    }

    pub fn unwatch(&self, subject: &Subject, observer: &ObserverRef<Subject, Notification>) {
        self.inner.bus.remove(subject, observer);
    }

    fn publish(&self, notification: &Notification) {
        if self.inner.config.verbose {
            info!("{}", notification);
        }
        self.inner.bus.notify(&Subject::System, notification);
        let subject = notification.subject();
        if subject != Subject::System {
            self.inner.bus.notify(&subject, notification);
        }
    }

    fn configure(&self, device: &Device) {
        let Some(port) = self.local_port() else {
            warn!("cannot configure {}: endpoint not started", device);
            return;
        };
        let serialosc = &self.inner.serialosc;
        let prefix = address::prefixed(device.id(), "");
        if let Err(e) = serialosc.set_message_prefix(device.port(), &prefix) {
            warn!("setting prefix of {} failed: {}", device, e);
        }
        if let Err(e) = serialosc.set_destination_port(device.port(), port) {
            warn!("setting destination port of {} failed: {}", device, e);
        }
    }

    fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Notify(notification) => self.publish(&notification),
                Effect::Configure(device) => self.configure(&device),
                Effect::ClearOutput(device) => {
                    if let Err(e) = device.clear_output() {
                        warn!("clearing {} failed: {}", device, e);
                    }
                }
                Effect::Refresh(client, device) => {
                    // Skip if the device moved on before the effect ran
                    let current = client.device(device.kind());
                    if current.map_or(false, |d| d.ptr_eq(&device)) {
                        client.run_refresh(device.kind(), &device);
                    }
                }
                Effect::Routed(client, device) => client.run_routed(&device),
                Effect::Unrouted(client, device) => client.run_unrouted(&device),
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

fn same_device(a: Option<&Device>, b: Option<&Device>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}
