//! serialosc daemon protocol

use gridlink_core::{DeviceEntry, DeviceSink, EventKind, Rotation};
use gridlink_transport::{AddressPattern, OscEndpoint};
use parking_lot::{Mutex, RwLock};
use rosc::{OscMessage, OscType};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

use crate::config::SerialOscConfig;
use crate::error::{DiscoveryError, Result};

/// Attach/detach callback, receives the device id
pub type IdCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives every inbound device event message
pub type EventHandler = Arc<dyn Fn(&OscMessage, SystemTime) + Send + Sync>;

/// Reply to `/sys/info`; fields the device did not report stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAttributes {
    pub destination_port: Option<u16>,
    pub destination_host: Option<String>,
    pub id: Option<String>,
    pub prefix: Option<String>,
    pub rotation: Option<i32>,
    /// (x, y)
    pub size: Option<(i32, i32)>,
}

impl DeviceAttributes {
    pub fn is_empty(&self) -> bool {
        *self == DeviceAttributes::default()
    }

    fn record(&mut self, attribute: &str, args: &[OscType]) {
        match attribute {
            "port" => self.destination_port = int_arg(args, 0).and_then(|p| u16::try_from(p).ok()),
            "host" => self.destination_host = string_arg(args, 0),
            "id" => self.id = string_arg(args, 0),
            "prefix" => self.prefix = string_arg(args, 0),
            "rotation" => self.rotation = int_arg(args, 0),
            "size" => self.size = int_arg(args, 0).zip(int_arg(args, 1)),
            _ => {}
        }
    }
}

const SYS_ATTRIBUTES: [&str; 6] = ["port", "host", "id", "prefix", "rotation", "size"];

struct Tracking {
    on_added: IdCallback,
    on_removed: IdCallback,
}

/// State reached from the endpoint's handlers
#[derive(Default)]
struct Shared {
    /// Open while a list query is collecting
    device_window: Mutex<Option<Vec<DeviceEntry>>>,
    /// Open while an info query is collecting
    info_window: Mutex<Option<DeviceAttributes>>,
    tracking: RwLock<Option<Tracking>>,
    event_handler: RwLock<Option<EventHandler>>,
}

/// Clears a collection slot when dropped, so a cancelled query cannot leave
/// its window open for replies meant for the next caller
struct Window<'a, T> {
    slot: &'a Mutex<Option<T>>,
}

impl<'a, T: Default> Window<'a, T> {
    fn open(slot: &'a Mutex<Option<T>>) -> Self {
        *slot.lock() = Some(T::default());
        Self { slot }
    }

    fn close(self) -> T {
        self.slot.lock().take().unwrap_or_default()
    }
}

impl<T> Drop for Window<'_, T> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}

/// Client side of the serialosc daemon protocol
pub struct SerialOsc {
    config: SerialOscConfig,
    endpoint: Mutex<Option<Arc<OscEndpoint>>>,
    shared: Arc<Shared>,
    list_flight: tokio::sync::Mutex<()>,
    info_flight: tokio::sync::Mutex<()>,
}

impl SerialOsc {
    pub fn new(config: SerialOscConfig) -> Self {
        Self {
            config,
            endpoint: Mutex::new(None),
            shared: Arc::new(Shared::default()),
            list_flight: tokio::sync::Mutex::new(()),
            info_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SerialOscConfig {
        &self.config
    }

    /// Bind the receiving endpoint and register its handlers, once.
    ///
    /// Every other operation calls this first. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<Arc<OscEndpoint>> {
        let mut slot = self.endpoint.lock();
        if let Some(endpoint) = slot.as_ref() {
            return Ok(endpoint.clone());
        }

        let endpoint = Arc::new(OscEndpoint::bind(self.config.listen_addr.as_str())?);
        self.register_handlers(&endpoint)?;
        info!(
            "serialosc client listening on {}, daemon at {}:{}",
            endpoint.local_addr(),
            self.config.daemon_host,
            self.config.daemon_port
        );
        *slot = Some(endpoint.clone());
        Ok(endpoint)
    }

    pub fn is_started(&self) -> bool {
        self.endpoint.lock().is_some()
    }

    /// Port replies are received on, once started
    pub fn local_port(&self) -> Option<u16> {
        self.endpoint.lock().as_ref().map(|e| e.port())
    }

    /// Stop tracking and close the endpoint. A later call starts a fresh one.
    pub fn stop(&self) {
        self.shared.tracking.write().take();
        if let Some(endpoint) = self.endpoint.lock().take() {
            endpoint.stop();
        }
    }

    fn register_handlers(&self, endpoint: &Arc<OscEndpoint>) -> Result<()> {
        let shared = self.shared.clone();
        endpoint.add_method(AddressPattern::exact("/serialosc/device"), move |msg, _| {
            let entry = match (string_arg(&msg.args, 0), string_arg(&msg.args, 1), int_arg(&msg.args, 2)) {
                (Some(id), Some(model), Some(port)) => match u16::try_from(port) {
                    Ok(port) => DeviceEntry::new(id, model, port),
                    Err(_) => {
                        warn!("serialosc device with invalid port {}", port);
                        return;
                    }
                },
                _ => {
                    warn!("malformed /serialosc/device {:?}", msg.args);
                    return;
                }
            };
            trace!("received: /serialosc/device {} {} {}", entry.id, entry.model, entry.port);
            match shared.device_window.lock().as_mut() {
                Some(list) => list.push(entry),
                None => debug!("/serialosc/device outside a list query, ignored"),
            }
        });

        let notify = Rearm {
            endpoint: Arc::downgrade(endpoint),
            daemon: self.daemon_addr()?,
            reply_host: self.config.reply_host.clone(),
        };
        for (address, added) in [("/serialosc/add", true), ("/serialosc/remove", false)] {
            let shared = self.shared.clone();
            let notify = notify.clone();
            endpoint.add_method(AddressPattern::exact(address), move |msg, _| {
                let Some(id) = string_arg(&msg.args, 0) else {
                    warn!("malformed {} {:?}", msg.addr, msg.args);
                    return;
                };
                trace!("received: {} {}", msg.addr, id);
                let callback = shared.tracking.read().as_ref().map(|t| {
                    if added {
                        t.on_added.clone()
                    } else {
                        t.on_removed.clone()
                    }
                });
                let Some(callback) = callback else {
                    return;
                };
                gridlink_core::isolate(&msg.addr, || callback(id.as_str()));
                // The callback may have stopped tracking
                if shared.tracking.read().is_some() {
                    notify.send();
                }
            });
        }

        for attribute in SYS_ATTRIBUTES {
            let shared = self.shared.clone();
            endpoint.add_method(
                AddressPattern::exact(format!("/sys/{}", attribute)),
                move |msg, _| {
                    trace!("received: {} {:?}", msg.addr, msg.args);
                    if let Some(info) = shared.info_window.lock().as_mut() {
                        info.record(attribute, &msg.args);
                    }
                },
            );
        }

        for kind in EventKind::ALL {
            let shared = self.shared.clone();
            endpoint.add_method(AddressPattern::suffix(kind.suffix()), move |msg, time| {
                trace!("received: {} {:?}", msg.addr, msg.args);
                let handler = shared.event_handler.read().clone();
                if let Some(handler) = handler {
                    handler(msg, time);
                }
            });
        }
        Ok(())
    }

    fn daemon_addr(&self) -> Result<SocketAddr> {
        resolve(&self.config.daemon_host, self.config.daemon_port)
    }

    fn device_addr(&self, device_port: u16) -> Result<SocketAddr> {
        resolve(&self.config.daemon_host, device_port)
    }

    /// Arguments asking for replies to come back to this endpoint
    fn reply_args(&self, endpoint: &OscEndpoint) -> Vec<OscType> {
        vec![
            OscType::String(self.config.reply_host.clone()),
            OscType::Int(i32::from(endpoint.port())),
        ]
    }

    /// Ask the daemon for attached devices and collect replies for `timeout`.
    ///
    /// Concurrent callers queue behind the open window. Silence yields an
    /// empty list.
    pub async fn request_device_list(&self, timeout: Option<Duration>) -> Result<Vec<DeviceEntry>> {
        let endpoint = self.start()?;
        let daemon = self.daemon_addr()?;
        let _flight = self.list_flight.lock().await;

        let window = Window::open(&self.shared.device_window);
        let request = OscMessage {
            addr: "/serialosc/list".to_string(),
            args: self.reply_args(&endpoint),
        };
        endpoint.send_to(request, daemon).await?;

        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        debug!("waiting {:?} for serialosc device list replies", timeout);
        tokio::time::sleep(timeout).await;

        let devices = window.close();
        debug!("serialosc listed {} device(s)", devices.len());
        Ok(devices)
    }

    /// Ask one device for its `/sys` attributes and collect replies for `timeout`
    pub async fn request_device_info(
        &self,
        device_port: u16,
        timeout: Option<Duration>,
    ) -> Result<DeviceAttributes> {
        let endpoint = self.start()?;
        let target = self.device_addr(device_port)?;
        let _flight = self.info_flight.lock().await;

        let window = Window::open(&self.shared.info_window);
        let request = OscMessage {
            addr: "/sys/info".to_string(),
            args: self.reply_args(&endpoint),
        };
        endpoint.send_to(request, target).await?;

        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        debug!("waiting {:?} for device info replies from port {}", timeout, device_port);
        tokio::time::sleep(timeout).await;

        Ok(window.close())
    }

    /// Subscribe to attach/detach notifications.
    ///
    /// The daemon reports one change per `/serialosc/notify`, so each
    /// notification runs its callback and then asks for the next one.
    pub fn start_tracking<A, R>(&self, on_added: A, on_removed: R) -> Result<()>
    where
        A: Fn(&str) + Send + Sync + 'static,
        R: Fn(&str) + Send + Sync + 'static,
    {
        let endpoint = self.start()?;
        {
            let mut tracking = self.shared.tracking.write();
            if tracking.is_some() {
                return Err(DiscoveryError::AlreadyTracking);
            }
            *tracking = Some(Tracking {
                on_added: Arc::new(on_added),
                on_removed: Arc::new(on_removed),
            });
        }
        let request = OscMessage {
            addr: "/serialosc/notify".to_string(),
            args: self.reply_args(&endpoint),
        };
        let sent = self
            .daemon_addr()
            .and_then(|daemon| endpoint.try_send_to(request, daemon).map_err(DiscoveryError::from));
        if let Err(e) = sent {
            // Not subscribed; leave the slot free for a retry
            self.shared.tracking.write().take();
            return Err(e);
        }
        info!("tracking serialosc device changes");
        Ok(())
    }

    pub fn stop_tracking(&self) -> Result<()> {
        self.start()?;
        match self.shared.tracking.write().take() {
            Some(_) => {
                info!("stopped tracking serialosc device changes");
                Ok(())
            }
            None => Err(DiscoveryError::NotTracking),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.shared.tracking.read().is_some()
    }

    /// Install (or with `None` remove) the receiver of device event messages
    pub fn set_event_handler(&self, handler: Option<EventHandler>) {
        *self.shared.event_handler.write() = handler;
    }

    /// `/sys/port`: where the device sends its events
    pub fn set_destination_port(&self, device_port: u16, destination_port: u16) -> Result<()> {
        self.send_sys(device_port, "/sys/port", vec![OscType::Int(i32::from(destination_port))])
    }

    /// `/sys/host`: host the device sends its events to
    pub fn set_destination_host(&self, device_port: u16, host: &str) -> Result<()> {
        self.send_sys(device_port, "/sys/host", vec![OscType::String(host.to_string())])
    }

    /// `/sys/prefix`: address prefix of the device's events
    pub fn set_message_prefix(&self, device_port: u16, prefix: &str) -> Result<()> {
        self.send_sys(device_port, "/sys/prefix", vec![OscType::String(prefix.to_string())])
    }

    /// `/sys/rotation`, rejecting anything but 0, 90, 180 or 270
    pub fn set_rotation(&self, device_port: u16, degrees: i32) -> Result<()> {
        let rotation = Rotation::try_from(degrees)?;
        self.send_sys(device_port, "/sys/rotation", vec![OscType::Int(rotation.degrees())])
    }

    fn send_sys(&self, device_port: u16, addr: &str, args: Vec<OscType>) -> Result<()> {
        let endpoint = self.start()?;
        let target = self.device_addr(device_port)?;
        trace!("sent: {} {:?} to {}", addr, args, target);
        endpoint.try_send_to(
            OscMessage {
                addr: addr.to_string(),
                args,
            },
            target,
        )?;
        Ok(())
    }
}

impl DeviceSink for SerialOsc {
    fn send_to_device(&self, port: u16, message: OscMessage) -> gridlink_core::Result<()> {
        let endpoint = self.start()?;
        let target = self.device_addr(port)?;
        endpoint
            .try_send_to(message, target)
            .map_err(gridlink_core::Error::from)
    }
}

/// Resends `/serialosc/notify` from inside the endpoint's own handlers
#[derive(Clone)]
struct Rearm {
    endpoint: Weak<OscEndpoint>,
    daemon: SocketAddr,
    reply_host: String,
}

impl Rearm {
    fn send(&self) {
        let Some(endpoint) = self.endpoint.upgrade() else {
            return;
        };
        let request = OscMessage {
            addr: "/serialosc/notify".to_string(),
            args: vec![
                OscType::String(self.reply_host.clone()),
                OscType::Int(i32::from(endpoint.port())),
            ],
        };
        if let Err(e) = endpoint.try_send_to(request, self.daemon) {
            warn!("could not re-request serialosc notification: {}", e);
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| DiscoveryError::Resolve(format!("{}:{}", host, port)))
}

fn string_arg(args: &[OscType], idx: usize) -> Option<String> {
    match args.get(idx)? {
        OscType::String(s) => Some(s.clone()),
        OscType::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn int_arg(args: &[OscType], idx: usize) -> Option<i32> {
    match args.get(idx)? {
        OscType::Int(i) => Some(*i),
        OscType::Long(l) => i32::try_from(*l).ok(),
        OscType::Float(f) => Some(*f as i32),
        OscType::String(s) => s.parse().ok(),
        _ => None,
    }
}
