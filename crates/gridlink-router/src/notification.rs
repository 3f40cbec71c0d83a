//! Lifecycle notifications
//!
//! Every notification is published on [`Subject::System`] and on its own
//! subject: the device it concerns, or the defaults slot of a device kind.

use gridlink_core::{isolate, Dependants, Device, DeviceKind, Observer, Rotation};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::client::ClientId;

/// What observers watch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Everything
    System,
    /// One device, by id
    Device(String),
    /// Default device of a kind
    Defaults(DeviceKind),
}

/// Notification topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Attached,
    Detached,
    Connected,
    Disconnected,
    Routed,
    Unrouted,
    Rotation,
    DefaultChanged,
}

#[derive(Debug, Clone)]
pub enum Notification {
    Attached(Device),
    Detached(Device),
    Connected(Device),
    Disconnected(Device),
    Routed { device: Device, client: ClientId },
    Unrouted { device: Device, client: ClientId },
    Rotation { device: Device, rotation: Rotation },
    DefaultChanged { kind: DeviceKind, device: Option<Device> },
}

impl Notification {
    pub fn topic(&self) -> Topic {
        match self {
            Notification::Attached(_) => Topic::Attached,
            Notification::Detached(_) => Topic::Detached,
            Notification::Connected(_) => Topic::Connected,
            Notification::Disconnected(_) => Topic::Disconnected,
            Notification::Routed { .. } => Topic::Routed,
            Notification::Unrouted { .. } => Topic::Unrouted,
            Notification::Rotation { .. } => Topic::Rotation,
            Notification::DefaultChanged { .. } => Topic::DefaultChanged,
        }
    }

    /// The device concerned, if any
    pub fn device(&self) -> Option<&Device> {
        match self {
            Notification::Attached(device)
            | Notification::Detached(device)
            | Notification::Connected(device)
            | Notification::Disconnected(device)
            | Notification::Routed { device, .. }
            | Notification::Unrouted { device, .. }
            | Notification::Rotation { device, .. } => Some(device),
            Notification::DefaultChanged { device, .. } => device.as_ref(),
        }
    }

    /// Subject besides [`Subject::System`]
    pub fn subject(&self) -> Subject {
        match self {
            Notification::DefaultChanged { kind, .. } => Subject::Defaults(*kind),
            other => match other.device() {
                Some(device) => Subject::Device(device.id().to_string()),
                None => Subject::System,
            },
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Attached(device) => write!(f, "attached: {}", device),
            Notification::Detached(device) => write!(f, "detached: {}", device),
            Notification::Connected(device) => write!(f, "connected: {}", device),
            Notification::Disconnected(device) => write!(f, "disconnected: {}", device),
            Notification::Routed { device, client } => {
                write!(f, "routed: {} to client {}", device, client)
            }
            Notification::Unrouted { device, client } => {
                write!(f, "unrouted: {} from client {}", device, client)
            }
            Notification::Rotation { device, rotation } => {
                write!(f, "rotation: {} now {}", device, rotation)
            }
            Notification::DefaultChanged { kind, device: Some(device) } => {
                write!(f, "default {}: {}", kind, device)
            }
            Notification::DefaultChanged { kind, device: None } => {
                write!(f, "default {}: none", kind)
            }
        }
    }
}

/// Bus carrying router notifications
pub type NotificationBus = Dependants<Subject, Notification>;

type Action = Arc<dyn Fn(&Subject, &Notification) + Send + Sync>;

/// Observer that dispatches by topic
///
/// ```ignore
/// let controller = Arc::new(NotificationController::new());
/// controller.on(Topic::Attached, |_, n| println!("{}", n));
/// context.watch(Subject::System, controller);
/// ```
#[derive(Default)]
pub struct NotificationController {
    actions: RwLock<HashMap<Topic, Vec<Action>>>,
}

impl NotificationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` for every notification of `topic`
    pub fn on<F>(&self, topic: Topic, action: F) -> &Self
    where
        F: Fn(&Subject, &Notification) + Send + Sync + 'static,
    {
        self.actions
            .write()
            .entry(topic)
            .or_default()
            .push(Arc::new(action));
        self
    }

    pub fn handles(&self, topic: Topic) -> bool {
        self.actions.read().contains_key(&topic)
    }

    /// Forget the actions for `topic`
    pub fn clear(&self, topic: Topic) {
        self.actions.write().remove(&topic);
    }
}

impl Observer<Subject, Notification> for NotificationController {
    fn update(&self, subject: &Subject, message: &Notification) {
        let actions = self
            .actions
            .read()
            .get(&message.topic())
            .cloned()
            .unwrap_or_default();
        for action in actions {
            isolate("notification action", || action(subject, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlink_core::{DeviceEntry, DeviceSink, ObserverRef};
    use gridlink_test_utils::{Collector, RecordingSink};

    fn grid() -> Device {
        let sink: Arc<dyn DeviceSink> = RecordingSink::new();
        Device::from_entry(&DeviceEntry::new("m1000", "monome 128", 15000), sink)
    }

    #[test]
    fn test_subjects() {
        let device = grid();
        assert_eq!(
            Notification::Attached(device.clone()).subject(),
            Subject::Device("m1000".into())
        );
        let default = Notification::DefaultChanged {
            kind: DeviceKind::Grid,
            device: Some(device),
        };
        assert_eq!(default.subject(), Subject::Defaults(DeviceKind::Grid));
        assert_eq!(default.topic(), Topic::DefaultChanged);
    }

    #[test]
    fn test_display() {
        let routed = Notification::Routed {
            device: grid(),
            client: ClientId(2),
        };
        assert_eq!(
            routed.to_string(),
            "routed: Grid (monome 128, m1000, 15000, 0) to client 2"
        );
    }

    #[test]
    fn test_controller_dispatches_by_topic() {
        let bus = NotificationBus::new();
        let controller = Arc::new(NotificationController::new());
        let seen: Collector<String> = Collector::new();

        let s = seen.clone();
        controller.on(Topic::Attached, move |_, n| s.push(n.to_string()));
        controller.on(Topic::Detached, |_, _| panic!("detach handler failure"));
        assert!(controller.handles(Topic::Attached));
        assert!(!controller.handles(Topic::Routed));

        let observer: ObserverRef<Subject, Notification> = controller.clone();
        bus.add(Subject::System, observer);

        let device = grid();
        bus.notify(&Subject::System, &Notification::Detached(device.clone()));
        bus.notify(&Subject::System, &Notification::Connected(device.clone()));
        bus.notify(&Subject::System, &Notification::Attached(device));

        assert_eq!(
            seen.values(),
            vec!["attached: Grid (monome 128, m1000, 15000, 0)".to_string()]
        );
    }
}
