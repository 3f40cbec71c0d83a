//! Device representation
//!
//! A device is either a [`Grid`] (button matrix) or an [`Encoder`] (arc ring
//! controller). Both are cheap handles over shared state: cloning a handle
//! never creates a new device, and [`Device::ptr_eq`] tells whether two handles
//! refer to the same registry instance.
//!
//! Output goes through a [`DeviceSink`], which knows how to reach a device's
//! listen port. Every outbound address is prefixed with `/<device id>`.

use parking_lot::RwLock;
use rosc::{OscMessage, OscType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{Error, Result};

/// Number of rings cleared by [`OutputsRings::clear_rings`]
pub const MAX_RINGS: i32 = 4;

/// LEDs around one encoder ring
pub const RING_LEDS: i32 = 64;

/// Full brightness for varibright output
const FULL_LEVEL: i32 = 15;

/// Device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Grid,
    Encoder,
}

impl DeviceKind {
    /// Classify a model string. Anything mentioning `arc` is an encoder.
    pub fn classify(model: &str) -> Self {
        if model.contains("arc") {
            DeviceKind::Encoder
        } else {
            DeviceKind::Grid
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Grid => write!(f, "grid"),
            DeviceKind::Encoder => write!(f, "encoder"),
        }
    }
}

/// Grid rotation in degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }

    /// Whether rows and columns trade places at this rotation
    pub fn is_transposed(self) -> bool {
        matches!(self, Rotation::R90 | Rotation::R270)
    }
}

impl TryFrom<i32> for Rotation {
    type Error = Error;

    fn try_from(degrees: i32) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::R0),
            90 => Ok(Rotation::R90),
            180 => Ok(Rotation::R180),
            270 => Ok(Rotation::R270),
            other => Err(Error::InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for i32 {
    fn from(rotation: Rotation) -> i32 {
        rotation.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.degrees())
    }
}

/// One entry of a discovery daemon device list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Serial number, used as the device identity
    pub id: String,
    /// Model string, e.g. `monome 128` or `monome arc 4`
    pub model: String,
    /// Port the device listens on
    pub port: u16,
}

impl DeviceEntry {
    pub fn new(id: impl Into<String>, model: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            port,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        DeviceKind::classify(&self.model)
    }
}

/// Outbound path to a device's listen port
pub trait DeviceSink: Send + Sync {
    /// Send a fully addressed message to the device listening on `port`
    fn send_to_device(&self, port: u16, message: OscMessage) -> Result<()>;
}

/// LED output capability (grids)
pub trait OutputsLeds {
    fn led_set(&self, x: i32, y: i32, state: i32) -> Result<()>;
    fn led_all(&self, state: i32) -> Result<()>;
    fn led_map(&self, x_offset: i32, y_offset: i32, bitmasks: &[i32]) -> Result<()>;
    fn led_row(&self, x_offset: i32, y: i32, bitmasks: &[i32]) -> Result<()>;
    fn led_col(&self, x: i32, y_offset: i32, bitmasks: &[i32]) -> Result<()>;
    fn led_intensity(&self, intensity: i32) -> Result<()>;
    fn led_level_set(&self, x: i32, y: i32, level: i32) -> Result<()>;
    fn led_level_all(&self, level: i32) -> Result<()>;
    fn led_level_map(&self, x_offset: i32, y_offset: i32, levels: &[i32]) -> Result<()>;
    fn led_level_row(&self, x_offset: i32, y: i32, levels: &[i32]) -> Result<()>;
    fn led_level_col(&self, x: i32, y_offset: i32, levels: &[i32]) -> Result<()>;
    fn tilt_set(&self, sensor: i32, active: bool) -> Result<()>;

    fn clear_leds(&self) -> Result<()> {
        self.led_all(0)
    }

    fn activate_tilt(&self, sensor: i32) -> Result<()> {
        self.tilt_set(sensor, true)
    }

    fn deactivate_tilt(&self, sensor: i32) -> Result<()> {
        self.tilt_set(sensor, false)
    }
}

/// Ring output capability (encoders)
pub trait OutputsRings {
    fn ring_set(&self, ring: i32, x: i32, level: i32) -> Result<()>;
    fn ring_all(&self, ring: i32, level: i32) -> Result<()>;
    fn ring_map(&self, ring: i32, levels: &[i32]) -> Result<()>;
    fn ring_range(&self, ring: i32, x1: i32, x2: i32, level: f32) -> Result<()>;

    fn clear_rings(&self) -> Result<()> {
        for ring in 0..MAX_RINGS {
            self.ring_all(ring, 0)?;
        }
        Ok(())
    }
}

/// Identity plus output path shared by both device kinds
struct Endpoint {
    model: String,
    id: String,
    port: u16,
    sink: Arc<dyn DeviceSink>,
}

impl Endpoint {
    fn send(&self, address: &str, args: Vec<OscType>) -> Result<()> {
        let message = OscMessage {
            addr: crate::address::prefixed(&self.id, address),
            args,
        };
        self.sink.send_to_device(self.port, message)
    }
}

fn ints(values: &[i32]) -> Vec<OscType> {
    values.iter().copied().map(OscType::Int).collect()
}

fn ints_then(head: &[i32], tail: &[i32]) -> Vec<OscType> {
    head.iter().chain(tail).copied().map(OscType::Int).collect()
}

struct GridInner {
    endpoint: Endpoint,
    rotation: RwLock<Rotation>,
}

/// Button matrix device
#[derive(Clone)]
pub struct Grid {
    inner: Arc<GridInner>,
}

impl Grid {
    pub fn new(
        model: impl Into<String>,
        id: impl Into<String>,
        port: u16,
        rotation: Rotation,
        sink: Arc<dyn DeviceSink>,
    ) -> Self {
        Self {
            inner: Arc::new(GridInner {
                endpoint: Endpoint {
                    model: model.into(),
                    id: id.into(),
                    port,
                    sink,
                },
                rotation: RwLock::new(rotation),
            }),
        }
    }

    pub fn model(&self) -> &str {
        &self.inner.endpoint.model
    }

    pub fn id(&self) -> &str {
        &self.inner.endpoint.id
    }

    pub fn port(&self) -> u16 {
        self.inner.endpoint.port
    }

    pub fn rotation(&self) -> Rotation {
        *self.inner.rotation.read()
    }

    /// Record a rotation that has already been sent to the device
    pub fn store_rotation(&self, rotation: Rotation) {
        *self.inner.rotation.write() = rotation;
    }

    /// Unrotated (columns, rows) of the hardware model
    pub fn model_dimensions(&self) -> (u16, u16) {
        grid_model_dimensions(self.model())
    }

    pub fn num_cols(&self) -> u16 {
        let (cols, rows) = self.model_dimensions();
        if self.rotation().is_transposed() {
            rows
        } else {
            cols
        }
    }

    pub fn num_rows(&self) -> u16 {
        let (cols, rows) = self.model_dimensions();
        if self.rotation().is_transposed() {
            cols
        } else {
            rows
        }
    }

    pub fn num_buttons(&self) -> u32 {
        u32::from(self.num_rows()) * u32::from(self.num_cols())
    }

    pub fn ptr_eq(&self, other: &Grid) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Light every LED in row order, then switch them off in the same order.
    ///
    /// Blocks for `step` between LEDs. The grid is cleared before and after.
    pub fn test_leds(&self, step: Duration) -> Result<()> {
        self.clear_leds()?;
        for level in [FULL_LEVEL, 0] {
            for y in 0..i32::from(self.num_rows()) {
                for x in 0..i32::from(self.num_cols()) {
                    self.led_set(x, y, level)?;
                    pause(step);
                }
            }
        }
        self.clear_leds()
    }
}

/// (columns, rows) for known grid models; unknown models are 0×0
pub fn grid_model_dimensions(model: &str) -> (u16, u16) {
    match model {
        "monome 40h" | "monome 64" => (8, 8),
        "monome 128" => (16, 8),
        "monome 256" => (16, 16),
        _ => (0, 0),
    }
}

/// Ring count for known encoder models; unknown models have none
pub fn encoder_model_rings(model: &str) -> u16 {
    match model {
        "monome arc 2" => 2,
        "monome arc 4" => 4,
        _ => 0,
    }
}

impl OutputsLeds for Grid {
    fn led_set(&self, x: i32, y: i32, state: i32) -> Result<()> {
        self.inner.endpoint.send("/grid/led/set", ints(&[x, y, state]))
    }

    fn led_all(&self, state: i32) -> Result<()> {
        self.inner.endpoint.send("/grid/led/all", ints(&[state]))
    }

    fn led_map(&self, x_offset: i32, y_offset: i32, bitmasks: &[i32]) -> Result<()> {
        self.inner
            .endpoint
            .send("/grid/led/map", ints_then(&[x_offset, y_offset], bitmasks))
    }

    fn led_row(&self, x_offset: i32, y: i32, bitmasks: &[i32]) -> Result<()> {
        self.inner
            .endpoint
            .send("/grid/led/row", ints_then(&[x_offset, y], bitmasks))
    }

    fn led_col(&self, x: i32, y_offset: i32, bitmasks: &[i32]) -> Result<()> {
        self.inner
            .endpoint
            .send("/grid/led/col", ints_then(&[x, y_offset], bitmasks))
    }

    fn led_intensity(&self, intensity: i32) -> Result<()> {
        self.inner
            .endpoint
            .send("/grid/led/intensity", ints(&[intensity]))
    }

    fn led_level_set(&self, x: i32, y: i32, level: i32) -> Result<()> {
        self.inner
            .endpoint
            .send("/grid/led/level/set", ints(&[x, y, level]))
    }

    fn led_level_all(&self, level: i32) -> Result<()> {
        self.inner.endpoint.send("/grid/led/level/all", ints(&[level]))
    }

    fn led_level_map(&self, x_offset: i32, y_offset: i32, levels: &[i32]) -> Result<()> {
        self.inner
            .endpoint
            .send("/grid/led/level/map", ints_then(&[x_offset, y_offset], levels))
    }

    fn led_level_row(&self, x_offset: i32, y: i32, levels: &[i32]) -> Result<()> {
        self.inner
            .endpoint
            .send("/grid/led/level/row", ints_then(&[x_offset, y], levels))
    }

    fn led_level_col(&self, x: i32, y_offset: i32, levels: &[i32]) -> Result<()> {
        self.inner
            .endpoint
            .send("/grid/led/level/col", ints_then(&[x, y_offset], levels))
    }

    fn tilt_set(&self, sensor: i32, active: bool) -> Result<()> {
        self.inner
            .endpoint
            .send("/tilt/set", ints(&[sensor, i32::from(active)]))
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("model", &self.model())
            .field("id", &self.id())
            .field("port", &self.port())
            .field("rotation", &self.rotation())
            .finish()
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Grid ({}, {}, {}, {})",
            self.model(),
            self.id(),
            self.port(),
            self.rotation()
        )
    }
}

/// Rotary ring controller
#[derive(Clone)]
pub struct Encoder {
    inner: Arc<Endpoint>,
}

impl Encoder {
    pub fn new(
        model: impl Into<String>,
        id: impl Into<String>,
        port: u16,
        sink: Arc<dyn DeviceSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Endpoint {
                model: model.into(),
                id: id.into(),
                port,
                sink,
            }),
        }
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn num_rings(&self) -> u16 {
        encoder_model_rings(self.model())
    }

    pub fn ptr_eq(&self, other: &Encoder) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Ring counterpart of [`Grid::test_leds`]
    pub fn test_rings(&self, step: Duration) -> Result<()> {
        self.clear_rings()?;
        for level in [FULL_LEVEL, 0] {
            for ring in 0..i32::from(self.num_rings()) {
                for x in 0..RING_LEDS {
                    self.ring_set(ring, x, level)?;
                    pause(step);
                }
            }
        }
        self.clear_rings()
    }
}

fn pause(step: Duration) {
    if !step.is_zero() {
        thread::sleep(step);
    }
}

impl OutputsRings for Encoder {
    fn ring_set(&self, ring: i32, x: i32, level: i32) -> Result<()> {
        self.inner.send("/ring/set", ints(&[ring, x, level]))
    }

    fn ring_all(&self, ring: i32, level: i32) -> Result<()> {
        self.inner.send("/ring/all", ints(&[ring, level]))
    }

    fn ring_map(&self, ring: i32, levels: &[i32]) -> Result<()> {
        self.inner.send("/ring/map", ints_then(&[ring], levels))
    }

    fn ring_range(&self, ring: i32, x1: i32, x2: i32, level: f32) -> Result<()> {
        let mut args = ints(&[ring, x1, x2]);
        args.push(OscType::Float(level));
        self.inner.send("/ring/range", args)
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("model", &self.model())
            .field("id", &self.id())
            .field("port", &self.port())
            .finish()
    }
}

impl fmt::Display for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encoder ({}, {}, {})", self.model(), self.id(), self.port())
    }
}

/// A grid or an encoder
#[derive(Clone, Debug)]
pub enum Device {
    Grid(Grid),
    Encoder(Encoder),
}

impl Device {
    /// Instantiate a device for a discovery entry, classified by model
    pub fn from_entry(entry: &DeviceEntry, sink: Arc<dyn DeviceSink>) -> Self {
        match entry.kind() {
            DeviceKind::Grid => Device::Grid(Grid::new(
                entry.model.clone(),
                entry.id.clone(),
                entry.port,
                Rotation::R0,
                sink,
            )),
            DeviceKind::Encoder => Device::Encoder(Encoder::new(
                entry.model.clone(),
                entry.id.clone(),
                entry.port,
                sink,
            )),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Grid(_) => DeviceKind::Grid,
            Device::Encoder(_) => DeviceKind::Encoder,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Device::Grid(grid) => grid.id(),
            Device::Encoder(enc) => enc.id(),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Device::Grid(grid) => grid.model(),
            Device::Encoder(enc) => enc.model(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Device::Grid(grid) => grid.port(),
            Device::Encoder(enc) => enc.port(),
        }
    }

    pub fn as_grid(&self) -> Option<&Grid> {
        match self {
            Device::Grid(grid) => Some(grid),
            Device::Encoder(_) => None,
        }
    }

    pub fn as_encoder(&self) -> Option<&Encoder> {
        match self {
            Device::Encoder(enc) => Some(enc),
            Device::Grid(_) => None,
        }
    }

    pub fn leds(&self) -> Option<&dyn OutputsLeds> {
        self.as_grid().map(|grid| grid as &dyn OutputsLeds)
    }

    pub fn rings(&self) -> Option<&dyn OutputsRings> {
        self.as_encoder().map(|enc| enc as &dyn OutputsRings)
    }

    /// Switch every LED or ring segment off
    pub fn clear_output(&self) -> Result<()> {
        match self {
            Device::Grid(grid) => grid.clear_leds(),
            Device::Encoder(enc) => enc.clear_rings(),
        }
    }

    /// Same registry instance, not merely the same id
    pub fn ptr_eq(&self, other: &Device) -> bool {
        match (self, other) {
            (Device::Grid(a), Device::Grid(b)) => a.ptr_eq(b),
            (Device::Encoder(a), Device::Encoder(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Grid> for Device {
    fn from(grid: Grid) -> Self {
        Device::Grid(grid)
    }
}

impl From<Encoder> for Device {
    fn from(enc: Encoder) -> Self {
        Device::Encoder(enc)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Grid(grid) => fmt::Display::fmt(grid, f),
            Device::Encoder(enc) => fmt::Display::fmt(enc, f),
        }
    }
}
