//! Device requirement specs
//!
//! A client declares one spec per device kind. `Any` accepts every device of
//! the kind, `None` opts out of the kind entirely, and `Exact` only accepts a
//! device whose derived dimensions are equal. A grid spec may also pin a
//! single dimension with `Cols` or `Rows`; those count as exact for
//! allocation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Device, DeviceKind};

/// Common view over [`GridSpec`] and [`EncSpec`]
pub trait Spec: fmt::Display + Send + Sync {
    /// Device kind this spec applies to
    fn kind(&self) -> DeviceKind;

    /// Client does not use this kind at all
    fn is_none(&self) -> bool;

    /// Spec names concrete dimensions
    fn is_exact(&self) -> bool;

    /// Does `device` satisfy the spec
    fn matches(&self, device: &Device) -> bool;

    fn uses_device(&self) -> bool {
        !self.is_none()
    }
}

/// Grid requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSpec {
    #[default]
    Any,
    None,
    Exact { rows: u16, cols: u16 },
    /// Width only, any height
    Cols(u16),
    /// Height only, any width
    Rows(u16),
}

impl GridSpec {
    pub fn exact(rows: u16, cols: u16) -> Self {
        GridSpec::Exact { rows, cols }
    }

    pub fn cols(cols: u16) -> Self {
        GridSpec::Cols(cols)
    }

    pub fn rows(rows: u16) -> Self {
        GridSpec::Rows(rows)
    }
}

impl Spec for GridSpec {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Grid
    }

    fn is_none(&self) -> bool {
        matches!(self, GridSpec::None)
    }

    fn is_exact(&self) -> bool {
        matches!(self, GridSpec::Exact { .. } | GridSpec::Cols(_) | GridSpec::Rows(_))
    }

    fn matches(&self, device: &Device) -> bool {
        let Device::Grid(grid) = device else {
            return false;
        };
        match self {
            GridSpec::Any => true,
            GridSpec::None => false,
            GridSpec::Exact { rows, cols } => grid.num_rows() == *rows && grid.num_cols() == *cols,
            GridSpec::Cols(cols) => grid.num_cols() == *cols,
            GridSpec::Rows(rows) => grid.num_rows() == *rows,
        }
    }
}

impl fmt::Display for GridSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridSpec::Any => write!(f, "any"),
            GridSpec::None => write!(f, "none"),
            GridSpec::Exact { rows, cols } => write!(f, "{}x{}", cols, rows),
            GridSpec::Cols(cols) => write!(f, "{}x*", cols),
            GridSpec::Rows(rows) => write!(f, "*x{}", rows),
        }
    }
}

/// Encoder requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncSpec {
    #[default]
    Any,
    None,
    Exact { rings: u16 },
}

impl EncSpec {
    pub fn exact(rings: u16) -> Self {
        EncSpec::Exact { rings }
    }
}

impl Spec for EncSpec {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Encoder
    }

    fn is_none(&self) -> bool {
        matches!(self, EncSpec::None)
    }

    fn is_exact(&self) -> bool {
        matches!(self, EncSpec::Exact { .. })
    }

    fn matches(&self, device: &Device) -> bool {
        let Device::Encoder(enc) = device else {
            return false;
        };
        match self {
            EncSpec::Any => true,
            EncSpec::None => false,
            EncSpec::Exact { rings } => enc.num_rings() == *rings,
        }
    }
}

impl fmt::Display for EncSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncSpec::Any => write!(f, "any"),
            EncSpec::None => write!(f, "none"),
            EncSpec::Exact { rings } => write!(f, "{} rings", rings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceEntry, DeviceSink, Result};
    use rosc::OscMessage;
    use std::sync::Arc;

    struct Discard;

    impl DeviceSink for Discard {
        fn send_to_device(&self, _port: u16, _message: OscMessage) -> Result<()> {
            Ok(())
        }
    }

    fn device(model: &str) -> Device {
        Device::from_entry(&DeviceEntry::new("m1", model, 1), Arc::new(Discard))
    }

    #[test]
    fn test_grid_spec_matching() {
        let small = device("monome 64");
        let wide = device("monome 128");
        let arc = device("monome arc 4");

        assert!(GridSpec::Any.matches(&small));
        assert!(!GridSpec::Any.matches(&arc));
        assert!(!GridSpec::None.matches(&small));
        assert!(GridSpec::exact(8, 8).matches(&small));
        assert!(!GridSpec::exact(8, 8).matches(&wide));
        assert!(GridSpec::exact(8, 16).matches(&wide));
    }

    #[test]
    fn test_exact_grid_spec_sees_rotation() {
        let wide = device("monome 128");
        let grid = wide.as_grid().unwrap();
        grid.store_rotation(crate::Rotation::R90);

        assert!(GridSpec::exact(16, 8).matches(&wide));
        assert!(!GridSpec::exact(8, 16).matches(&wide));
    }

    #[test]
    fn test_single_dimension_grid_spec() {
        let small = device("monome 64");
        let wide = device("monome 128");

        assert!(GridSpec::cols(16).matches(&wide));
        assert!(!GridSpec::cols(16).matches(&small));
        assert!(GridSpec::rows(8).matches(&wide));
        assert!(GridSpec::rows(8).matches(&small));
        assert!(!GridSpec::rows(16).matches(&wide));
        assert!(!GridSpec::cols(4).matches(&device("monome arc 4")));

        assert!(GridSpec::cols(16).is_exact());
        assert!(GridSpec::rows(8).is_exact());
        assert!(!GridSpec::Any.is_exact());
        assert_eq!(GridSpec::cols(16).to_string(), "16x*");
        assert_eq!(GridSpec::rows(8).to_string(), "*x8");

        // Dimensions follow the rotation
        wide.as_grid().unwrap().store_rotation(crate::Rotation::R90);
        assert!(GridSpec::cols(8).matches(&wide));
        assert!(GridSpec::rows(16).matches(&wide));
    }

    #[test]
    fn test_enc_spec_matching() {
        let arc2 = device("monome arc 2");
        let arc4 = device("monome arc 4");

        assert!(EncSpec::Any.matches(&arc2));
        assert!(EncSpec::exact(4).matches(&arc4));
        assert!(!EncSpec::exact(4).matches(&arc2));
        assert!(!EncSpec::exact(4).matches(&device("monome 64")));
        assert!(EncSpec::None.is_none());
        assert!(!EncSpec::None.uses_device());
    }
}
