//! Common test helpers for gridlink tests
//!
//! This crate provides:
//! - A fake serialosc daemon with fake devices on loopback UDP ([`FakeSerialosc`])
//! - A socket-free [`RecordingSink`] for device output
//! - Condition-based waiting (no hardcoded sleeps)
//! - Collectors for callback arguments

mod fake;

pub use fake::{FakeDevice, FakeSerialosc};

use gridlink_core::DeviceSink;
use parking_lot::Mutex;
use rosc::{OscMessage, OscType};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Short collection window for list and info queries in tests
pub const QUERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Install a fmt subscriber honouring `RUST_LOG`; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available UDP port for testing
pub fn find_available_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    check()
}

/// Wait for `check` with the default interval and timeout
pub async fn eventually<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    wait_for(check, DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT).await
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || counter.load(Ordering::SeqCst) >= target,
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for a boolean flag to become true
pub async fn wait_for_flag(flag: &AtomicBool, max_wait: Duration) -> bool {
    wait_for(
        || flag.load(Ordering::SeqCst),
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Recording Sink
// ============================================================================

/// Device sink that keeps every outbound message instead of sending it
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(u16, OscMessage)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(u16, OscMessage)> {
        self.sent.lock().clone()
    }

    /// Addresses sent to `port`, in order
    pub fn addresses_for(&self, port: u16) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, m)| m.addr.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl DeviceSink for RecordingSink {
    fn send_to_device(&self, port: u16, message: OscMessage) -> gridlink_core::Result<()> {
        self.sent.lock().push((port, message));
        Ok(())
    }
}

// ============================================================================
// Collectors
// ============================================================================

/// Thread-safe collector for callback arguments
pub struct Collector<T> {
    values: Arc<Mutex<Vec<T>>>,
    count: Arc<AtomicU32>,
}

impl<T: Clone + Send + 'static> Collector<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Callback pushing a clone of its argument
    pub fn callback(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let values = self.values.clone();
        let count = self.count.clone();
        move |value: &T| {
            values.lock().push(value.clone());
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn push(&self, value: T) {
        self.values.lock().push(value);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n values to be received
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    pub fn last(&self) -> Option<T> {
        self.values.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.values.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            count: self.count.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer arguments of a message, non-integers skipped
pub fn int_args(message: &OscMessage) -> Vec<i32> {
    message
        .args
        .iter()
        .filter_map(|arg| match arg {
            OscType::Int(i) => Some(*i),
            _ => None,
        })
        .collect()
}
