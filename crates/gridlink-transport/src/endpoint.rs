//! UDP endpoint carrying OSC packets

use gridlink_core::isolate;
use parking_lot::{Mutex, RwLock};
use rosc::{OscBundle, OscMessage, OscPacket, OscTime};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TransportError};

/// Seconds between the NTP epoch (1900) and the unix epoch
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Endpoint configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Receive buffer size, the largest datagram accepted
    pub max_packet_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 65507, // Max UDP payload
        }
    }
}

/// Which inbound addresses a handler receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressPattern {
    /// Whole address equals the string
    Exact(String),
    /// Address ends with the string, e.g. `/grid/key`
    Suffix(String),
    /// Every address
    Any,
}

impl AddressPattern {
    pub fn exact(address: impl Into<String>) -> Self {
        AddressPattern::Exact(address.into())
    }

    pub fn suffix(suffix: impl Into<String>) -> Self {
        AddressPattern::Suffix(suffix.into())
    }

    pub fn matches(&self, address: &str) -> bool {
        match self {
            AddressPattern::Exact(a) => address == a,
            AddressPattern::Suffix(s) => address.ends_with(s.as_str()),
            AddressPattern::Any => true,
        }
    }
}

/// Inbound message callback; the time is the bundle time tag or arrival time
pub type MessageHandler = Arc<dyn Fn(&OscMessage, SystemTime) + Send + Sync>;

type HandlerTable = Arc<RwLock<Vec<(AddressPattern, MessageHandler)>>>;

/// A bound UDP socket with a background receive loop
pub struct OscEndpoint {
    socket: Arc<UdpSocket>,
    /// Clone of the same socket for sends from synchronous code
    sync_socket: std::net::UdpSocket,
    local_addr: SocketAddr,
    handlers: HandlerTable,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OscEndpoint {
    /// Bind and start receiving. Must be called within a tokio runtime.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::bind_with_config(addr, EndpointConfig::default())
    }

    /// Bind with config
    pub fn bind_with_config(addr: impl ToSocketAddrs, config: EndpointConfig) -> Result<Self> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let std_socket = std::net::UdpSocket::bind(addr)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        std_socket.set_nonblocking(true)?;
        let sync_socket = std_socket.try_clone()?;
        let socket = {
            let _guard = runtime.enter();
            UdpSocket::from_std(std_socket)?
        };
        let local_addr = socket.local_addr()?;
        info!("OSC endpoint listening on {}", local_addr);

        let socket = Arc::new(socket);
        let handlers: HandlerTable = Arc::new(RwLock::new(Vec::new()));
        let task = runtime.spawn(receive_loop(
            socket.clone(),
            handlers.clone(),
            config.max_packet_size,
        ));

        Ok(Self {
            socket,
            sync_socket,
            local_addr,
            handlers,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Register a handler for addresses matching `pattern`
    pub fn add_method<F>(&self, pattern: AddressPattern, handler: F)
    where
        F: Fn(&OscMessage, SystemTime) + Send + Sync + 'static,
    {
        debug!("OSC endpoint handler added for {:?}", pattern);
        self.handlers.write().push((pattern, Arc::new(handler)));
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Send a message and wait for the socket to accept it
    pub async fn send_to(&self, message: OscMessage, target: SocketAddr) -> Result<()> {
        let bytes = encode(message)?;
        self.socket
            .send_to(&bytes, target)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Send without awaiting.
    ///
    /// Goes through the std handle of the socket, so it does not depend on
    /// the runtime having polled the socket for write readiness yet. Fails
    /// only if the kernel refuses the datagram.
    pub fn try_send_to(&self, message: OscMessage, target: SocketAddr) -> Result<()> {
        if !self.is_running() {
            return Err(TransportError::Stopped);
        }
        trace!("OSC -> {} {} {:?}", target, message.addr, message.args);
        let bytes = encode(message)?;
        self.sync_socket
            .send_to(&bytes, target)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Stop the receive loop. Handlers stay registered but are no longer called.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("OSC endpoint on {} stopped", self.local_addr);
        }
    }
}

impl Drop for OscEndpoint {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

fn encode(message: OscMessage) -> Result<Vec<u8>> {
    rosc::encoder::encode(&OscPacket::Message(message))
        .map_err(|e| TransportError::Encode(format!("{:?}", e)))
}

async fn receive_loop(socket: Arc<UdpSocket>, handlers: HandlerTable, max_packet_size: usize) {
    let mut buf = vec![0u8; max_packet_size];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                trace!("OSC received {} bytes from {}", len, from);
                match rosc::decoder::decode_udp(&buf[..len]) {
                    Ok((_, packet)) => dispatch_packet(&handlers, packet, SystemTime::now()),
                    Err(e) => warn!("OSC decode error from {}: {:?}", from, e),
                }
            }
            // ICMP port unreachable for an earlier send surfaces here on Linux
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!("OSC peer unreachable: {}", e);
            }
            Err(e) => {
                error!("OSC receive error: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

fn dispatch_packet(handlers: &HandlerTable, packet: OscPacket, time: SystemTime) {
    match packet {
        OscPacket::Message(message) => dispatch_message(handlers, &message, time),
        OscPacket::Bundle(OscBundle { timetag, content }) => {
            let time = timetag_to_system_time(timetag).unwrap_or(time);
            for inner in content {
                dispatch_packet(handlers, inner, time);
            }
        }
    }
}

fn dispatch_message(handlers: &HandlerTable, message: &OscMessage, time: SystemTime) {
    let matching: Vec<MessageHandler> = handlers
        .read()
        .iter()
        .filter(|(pattern, _)| pattern.matches(&message.addr))
        .map(|(_, handler)| handler.clone())
        .collect();

    if matching.is_empty() {
        debug!("OSC unhandled message {} {:?}", message.addr, message.args);
        return;
    }

    for handler in matching {
        isolate(&message.addr, || handler(message, time));
    }
}

/// `None` for the "immediately" tag
fn timetag_to_system_time(tag: OscTime) -> Option<SystemTime> {
    if tag.seconds == 0 && tag.fractional <= 1 {
        return None;
    }
    let secs = u64::from(tag.seconds).checked_sub(NTP_UNIX_OFFSET)?;
    let nanos = (u64::from(tag.fractional) * 1_000_000_000) >> 32;
    Some(UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_nanos(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::OscType;
    use tokio::sync::mpsc;

    fn message(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }

    #[test]
    fn test_pattern_matching() {
        assert!(AddressPattern::exact("/sys/port").matches("/sys/port"));
        assert!(!AddressPattern::exact("/sys/port").matches("/x/sys/port"));
        assert!(AddressPattern::suffix("/grid/key").matches("/m1/grid/key"));
        assert!(!AddressPattern::suffix("/grid/key").matches("/m1/grid/key/x"));
        assert!(AddressPattern::Any.matches("/anything"));
    }

    #[test]
    fn test_timetag_conversion() {
        assert_eq!(timetag_to_system_time(OscTime { seconds: 0, fractional: 1 }), None);

        let tag = OscTime {
            seconds: (NTP_UNIX_OFFSET + 10) as u32,
            fractional: 1 << 31,
        };
        assert_eq!(
            timetag_to_system_time(tag),
            Some(UNIX_EPOCH + Duration::from_millis(10_500))
        );
    }

    #[test]
    fn test_bind_without_runtime_fails() {
        assert!(matches!(
            OscEndpoint::bind("127.0.0.1:0"),
            Err(TransportError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_send_and_dispatch() {
        let server = OscEndpoint::bind("127.0.0.1:0").unwrap();
        let client = OscEndpoint::bind("127.0.0.1:0").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        server.add_method(AddressPattern::suffix("/grid/key"), move |msg, _| {
            let _ = tx.send(msg.clone());
        });

        client
            .send_to(message("/m1/tilt", vec![]), server.local_addr())
            .await
            .unwrap();
        client
            .send_to(
                message("/m1/grid/key", vec![OscType::Int(1), OscType::Int(2), OscType::Int(1)]),
                server.local_addr(),
            )
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.addr, "/m1/grid/key");
        assert_eq!(got.args.len(), 3);
    }

    #[tokio::test]
    async fn test_bundle_is_flattened() {
        let server = OscEndpoint::bind("127.0.0.1:0").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.add_method(AddressPattern::suffix("/enc/delta"), move |msg, time| {
            let _ = tx.send((msg.args.clone(), time));
        });

        let bundle = OscPacket::Bundle(OscBundle {
            timetag: OscTime {
                seconds: (NTP_UNIX_OFFSET + 100) as u32,
                fractional: 0,
            },
            content: vec![
                OscPacket::Message(message("/a/enc/delta", vec![OscType::Int(0), OscType::Int(3)])),
                OscPacket::Message(message("/a/enc/delta", vec![OscType::Int(1), OscType::Int(-2)])),
            ],
        });
        let bytes = rosc::encoder::encode(&bundle).unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&bytes, server.local_addr()).await.unwrap();

        for expected in [3, -2] {
            let (args, time) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(args[1], OscType::Int(expected));
            assert_eq!(time, UNIX_EPOCH + Duration::from_secs(100));
        }
    }

    #[tokio::test]
    async fn test_try_send_on_fresh_socket() {
        let server = OscEndpoint::bind("127.0.0.1:0").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.add_method(AddressPattern::exact("/serialosc/notify"), move |msg, _| {
            let _ = tx.send(msg.clone());
        });

        // No async send has touched this socket yet
        let client = OscEndpoint::bind("127.0.0.1:0").unwrap();
        client
            .try_send_to(message("/serialosc/notify", vec![OscType::Int(1)]), server.local_addr())
            .unwrap();
        client
            .try_send_to(message("/serialosc/notify", vec![OscType::Int(2)]), server.local_addr())
            .unwrap();

        for expected in [1, 2] {
            let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got.args, vec![OscType::Int(expected)]);
        }
    }

    #[tokio::test]
    async fn test_stop() {
        let endpoint = OscEndpoint::bind("127.0.0.1:0").unwrap();
        assert!(endpoint.is_running());
        endpoint.stop();
        assert!(!endpoint.is_running());
        assert!(matches!(
            endpoint.try_send_to(message("/x", vec![]), endpoint.local_addr()),
            Err(TransportError::Stopped)
        ));
    }
}
