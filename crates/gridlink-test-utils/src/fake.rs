//! Fake serialosc daemon and devices on loopback UDP

use anyhow::{anyhow, Context as _};
use gridlink_transport::{AddressPattern, OscEndpoint};
use parking_lot::Mutex;
use rosc::{OscMessage, OscPacket, OscType};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

fn send(socket: &UdpSocket, target: SocketAddr, addr: &str, args: Vec<OscType>) {
    let packet = OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args,
    });
    match rosc::encoder::encode(&packet) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, target) {
                debug!("fake serialosc send to {} failed: {}", target, e);
            }
        }
        Err(e) => debug!("fake serialosc encode failed: {:?}", e),
    }
}

/// `host, port` reply arguments as sent by `/serialosc/list` and friends
fn reply_target(args: &[OscType]) -> Option<SocketAddr> {
    let host = match args.first()? {
        OscType::String(h) => h.clone(),
        _ => return None,
    };
    let port = match args.get(1)? {
        OscType::Int(p) => u16::try_from(*p).ok()?,
        _ => return None,
    };
    format!("{}:{}", host, port).parse().ok()
}

#[derive(Debug, Clone)]
struct DeviceState {
    prefix: String,
    destination_host: String,
    destination_port: Option<u16>,
    rotation: i32,
    received: Vec<OscMessage>,
}

/// A fake device listening on its own port
pub struct FakeDevice {
    id: String,
    model: String,
    endpoint: OscEndpoint,
    state: Arc<Mutex<DeviceState>>,
    out: Arc<UdpSocket>,
}

impl FakeDevice {
    fn start(id: &str, model: &str, out: Arc<UdpSocket>) -> anyhow::Result<Self> {
        let endpoint = OscEndpoint::bind("127.0.0.1:0")?;
        let state = Arc::new(Mutex::new(DeviceState {
            prefix: "/monome".to_string(),
            destination_host: "127.0.0.1".to_string(),
            destination_port: None,
            rotation: 0,
            received: Vec::new(),
        }));

        let (cols, rows) = gridlink_core::grid_model_dimensions(model);
        let info_id = id.to_string();
        {
            let state = state.clone();
            let out = out.clone();
            endpoint.add_method(AddressPattern::Any, move |msg, _| {
                let mut state = state.lock();
                state.received.push(msg.clone());
                let first_int = match msg.args.first() {
                    Some(OscType::Int(i)) => Some(*i),
                    _ => None,
                };
                let first_str = match msg.args.first() {
                    Some(OscType::String(s)) => Some(s.clone()),
                    _ => None,
                };
                match msg.addr.as_str() {
                    "/sys/port" => state.destination_port = first_int.and_then(|p| u16::try_from(p).ok()),
                    "/sys/host" => {
                        if let Some(host) = first_str {
                            state.destination_host = host;
                        }
                    }
                    "/sys/prefix" => {
                        if let Some(prefix) = first_str {
                            state.prefix = prefix;
                        }
                    }
                    "/sys/rotation" => {
                        if let Some(r) = first_int {
                            state.rotation = r;
                        }
                    }
                    "/sys/info" => {
                        if let Some(target) = reply_target(&msg.args) {
                            send(&out, target, "/sys/id", vec![OscType::String(info_id.clone())]);
                            send(
                                &out,
                                target,
                                "/sys/size",
                                vec![OscType::Int(i32::from(cols)), OscType::Int(i32::from(rows))],
                            );
                            send(
                                &out,
                                target,
                                "/sys/host",
                                vec![OscType::String(state.destination_host.clone())],
                            );
                            send(
                                &out,
                                target,
                                "/sys/port",
                                vec![OscType::Int(i32::from(state.destination_port.unwrap_or(0)))],
                            );
                            send(&out, target, "/sys/prefix", vec![OscType::String(state.prefix.clone())]);
                            send(&out, target, "/sys/rotation", vec![OscType::Int(state.rotation)]);
                        }
                    }
                    _ => {}
                }
            });
        }

        Ok(Self {
            id: id.to_string(),
            model: model.to_string(),
            endpoint,
            state,
            out,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn prefix(&self) -> String {
        self.state.lock().prefix.clone()
    }

    pub fn destination_port(&self) -> Option<u16> {
        self.state.lock().destination_port
    }

    pub fn rotation(&self) -> i32 {
        self.state.lock().rotation
    }

    /// Every message the device received, `/sys` ones included
    pub fn received(&self) -> Vec<OscMessage> {
        self.state.lock().received.clone()
    }

    /// Addresses of received messages, in arrival order
    pub fn received_addresses(&self) -> Vec<String> {
        self.state.lock().received.iter().map(|m| m.addr.clone()).collect()
    }

    pub fn clear_received(&self) {
        self.state.lock().received.clear();
    }

    /// Emit `<prefix><suffix>` to the configured destination
    pub fn emit(&self, suffix: &str, args: Vec<i32>) -> anyhow::Result<()> {
        let (addr, target) = {
            let state = self.state.lock();
            let port = state
                .destination_port
                .ok_or_else(|| anyhow!("{} has no destination port", self.id))?;
            let target: SocketAddr = format!("{}:{}", state.destination_host, port)
                .parse()
                .context("destination address")?;
            (format!("{}{}", state.prefix, suffix), target)
        };
        send(
            &self.out,
            target,
            &addr,
            args.into_iter().map(OscType::Int).collect(),
        );
        Ok(())
    }

    pub fn press(&self, x: i32, y: i32, state: i32) -> anyhow::Result<()> {
        self.emit("/grid/key", vec![x, y, state])
    }

    pub fn turn(&self, ring: i32, delta: i32) -> anyhow::Result<()> {
        self.emit("/enc/delta", vec![ring, delta])
    }

    pub fn push_ring(&self, ring: i32, state: i32) -> anyhow::Result<()> {
        self.emit("/enc/key", vec![ring, state])
    }

    pub fn tilt(&self, sensor: i32, x: i32, y: i32, z: i32) -> anyhow::Result<()> {
        self.emit("/tilt", vec![sensor, x, y, z])
    }
}

/// A serialosc daemon stand-in answering `/serialosc/list` and `/serialosc/notify`
pub struct FakeSerialosc {
    daemon: OscEndpoint,
    devices: Arc<Mutex<Vec<Arc<FakeDevice>>>>,
    subscribers: Arc<Mutex<Vec<SocketAddr>>>,
    list_requests: Arc<AtomicU32>,
    notify_requests: Arc<AtomicU32>,
    out: Arc<UdpSocket>,
}

impl FakeSerialosc {
    /// Start on an ephemeral port. Must run inside a tokio runtime.
    pub fn start() -> anyhow::Result<Self> {
        let daemon = OscEndpoint::bind("127.0.0.1:0")?;
        let out = Arc::new(UdpSocket::bind("127.0.0.1:0")?);
        let devices: Arc<Mutex<Vec<Arc<FakeDevice>>>> = Arc::default();
        let subscribers: Arc<Mutex<Vec<SocketAddr>>> = Arc::default();
        let list_requests = Arc::new(AtomicU32::new(0));
        let notify_requests = Arc::new(AtomicU32::new(0));

        {
            let devices = devices.clone();
            let out = out.clone();
            let list_requests = list_requests.clone();
            daemon.add_method(AddressPattern::exact("/serialosc/list"), move |msg, _| {
                // Counted once the replies are out
                let Some(target) = reply_target(&msg.args) else {
                    list_requests.fetch_add(1, Ordering::SeqCst);
                    return;
                };
                for device in devices.lock().iter() {
                    send(
                        &out,
                        target,
                        "/serialosc/device",
                        vec![
                            OscType::String(device.id.clone()),
                            OscType::String(device.model.clone()),
                            OscType::Int(i32::from(device.port())),
                        ],
                    );
                }
                list_requests.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let subscribers = subscribers.clone();
            let notify_requests = notify_requests.clone();
            daemon.add_method(AddressPattern::exact("/serialosc/notify"), move |msg, _| {
                notify_requests.fetch_add(1, Ordering::SeqCst);
                if let Some(target) = reply_target(&msg.args) {
                    let mut subscribers = subscribers.lock();
                    if !subscribers.contains(&target) {
                        subscribers.push(target);
                    }
                }
            });
        }

        Ok(Self {
            daemon,
            devices,
            subscribers,
            list_requests,
            notify_requests,
            out,
        })
    }

    /// Daemon port
    pub fn port(&self) -> u16 {
        self.daemon.port()
    }

    /// Plug in a device without notifying anyone, e.g. before the client starts
    pub fn plug(&self, id: &str, model: &str) -> anyhow::Result<Arc<FakeDevice>> {
        let device = Arc::new(FakeDevice::start(id, model, self.out.clone())?);
        self.devices.lock().push(device.clone());
        Ok(device)
    }

    /// Plug in a device and send `/serialosc/add` to pending subscribers
    pub fn attach(&self, id: &str, model: &str) -> anyhow::Result<Arc<FakeDevice>> {
        let device = self.plug(id, model)?;
        self.notify_subscribers("/serialosc/add", id);
        Ok(device)
    }

    /// Unplug a device and send `/serialosc/remove` to pending subscribers
    pub fn detach(&self, id: &str) -> anyhow::Result<()> {
        {
            let mut devices = self.devices.lock();
            let before = devices.len();
            devices.retain(|d| d.id != id);
            if devices.len() == before {
                return Err(anyhow!("no fake device {}", id));
            }
        }
        self.notify_subscribers("/serialosc/remove", id);
        Ok(())
    }

    /// Each subscription is good for exactly one notification
    fn notify_subscribers(&self, addr: &str, id: &str) {
        let targets: Vec<SocketAddr> = self.subscribers.lock().drain(..).collect();
        for target in targets {
            send(&self.out, target, addr, vec![OscType::String(id.to_string())]);
        }
    }

    pub fn device(&self, id: &str) -> Option<Arc<FakeDevice>> {
        self.devices.lock().iter().find(|d| d.id == id).cloned()
    }

    pub fn list_requests(&self) -> u32 {
        self.list_requests.load(Ordering::SeqCst)
    }

    pub fn notify_requests(&self) -> u32 {
        self.notify_requests.load(Ordering::SeqCst)
    }

    /// Subscribers waiting for the next add/remove
    pub fn pending_subscribers(&self) -> usize {
        self.subscribers.lock().len()
    }
}
