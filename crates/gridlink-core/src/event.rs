//! Inbound device events

use rosc::OscType;
use serde::{Deserialize, Serialize};

use crate::{DeviceKind, Error, Result};

/// Event kinds and their address suffixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    GridKey,
    Tilt,
    EncDelta,
    EncKey,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::GridKey,
        EventKind::Tilt,
        EventKind::EncDelta,
        EventKind::EncKey,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            EventKind::GridKey => "/grid/key",
            EventKind::Tilt => "/tilt",
            EventKind::EncDelta => "/enc/delta",
            EventKind::EncKey => "/enc/key",
        }
    }

    /// Exact suffix lookup; `/grid/key/extra` is not a key event
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.suffix() == suffix)
    }

    /// Kind of device that produces this event
    pub fn device_kind(self) -> DeviceKind {
        match self {
            EventKind::GridKey | EventKind::Tilt => DeviceKind::Grid,
            EventKind::EncDelta | EventKind::EncKey => DeviceKind::Encoder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridKey {
    pub x: i32,
    pub y: i32,
    pub state: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tilt {
    pub sensor: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncDelta {
    pub ring: i32,
    pub delta: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncKey {
    pub ring: i32,
    pub state: i32,
}

/// A decoded device event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    GridKey(GridKey),
    Tilt(Tilt),
    EncDelta(EncDelta),
    EncKey(EncKey),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::GridKey(_) => EventKind::GridKey,
            Event::Tilt(_) => EventKind::Tilt,
            Event::EncDelta(_) => EventKind::EncDelta,
            Event::EncKey(_) => EventKind::EncKey,
        }
    }

    /// Decode the argument list of an event message
    pub fn decode(kind: EventKind, args: &[OscType]) -> Result<Self> {
        let arg = |idx: usize| -> Result<i32> {
            let value = args.get(idx).ok_or_else(|| {
                Error::Decode(format!(
                    "{} expects more than {} arguments",
                    kind.suffix(),
                    args.len()
                ))
            })?;
            int_arg(value)
                .ok_or_else(|| Error::Decode(format!("non-numeric argument {:?}", value)))
        };

        Ok(match kind {
            EventKind::GridKey => Event::GridKey(GridKey {
                x: arg(0)?,
                y: arg(1)?,
                state: arg(2)?,
            }),
            EventKind::Tilt => Event::Tilt(Tilt {
                sensor: arg(0)?,
                x: arg(1)?,
                y: arg(2)?,
                z: arg(3)?,
            }),
            EventKind::EncDelta => Event::EncDelta(EncDelta {
                ring: arg(0)?,
                delta: arg(1)?,
            }),
            EventKind::EncKey => Event::EncKey(EncKey {
                ring: arg(0)?,
                state: arg(1)?,
            }),
        })
    }
}

fn int_arg(value: &OscType) -> Option<i32> {
    match value {
        OscType::Int(i) => Some(*i),
        OscType::Long(l) => i32::try_from(*l).ok(),
        OscType::Float(f) => Some(*f as i32),
        OscType::Double(d) => Some(*d as i32),
        OscType::Bool(b) => Some(i32::from(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_lookup_is_exact() {
        assert_eq!(EventKind::from_suffix("/grid/key"), Some(EventKind::GridKey));
        assert_eq!(EventKind::from_suffix("/enc/key"), Some(EventKind::EncKey));
        assert_eq!(EventKind::from_suffix("/x/grid/key"), None);
        assert_eq!(EventKind::from_suffix("/press"), None);
    }

    #[test]
    fn test_decode_grid_key() {
        let args = vec![OscType::Int(3), OscType::Int(4), OscType::Int(1)];
        let event = Event::decode(EventKind::GridKey, &args).unwrap();
        assert_eq!(event, Event::GridKey(GridKey { x: 3, y: 4, state: 1 }));
    }

    #[test]
    fn test_decode_tilt_accepts_floats() {
        let args = vec![
            OscType::Int(0),
            OscType::Float(12.0),
            OscType::Int(-3),
            OscType::Long(200),
        ];
        let event = Event::decode(EventKind::Tilt, &args).unwrap();
        assert_eq!(
            event,
            Event::Tilt(Tilt {
                sensor: 0,
                x: 12,
                y: -3,
                z: 200
            })
        );
    }

    #[test]
    fn test_decode_rejects_short_and_bad_args() {
        assert!(Event::decode(EventKind::EncDelta, &[OscType::Int(1)]).is_err());
        let args = vec![OscType::String("x".into()), OscType::Int(1)];
        assert!(Event::decode(EventKind::EncKey, &args).is_err());
    }
}
