//! Device registry
//!
//! The registry is the only long-lived owner of device handles. Entries keep
//! their position (attach order) and their identity across reconciliation, so a
//! benign re-list never disturbs routing state.

use gridlink_core::{Device, DeviceEntry, DeviceKind, DeviceSink};
use std::collections::HashSet;
use std::sync::Arc;

use crate::client::ClientId;

/// A known device and its lifecycle state
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub device: Device,
    pub connected: bool,
    pub owner: Option<ClientId>,
}

impl RegistryEntry {
    /// Connected and not routed to any client
    pub fn is_free(&self) -> bool {
        self.connected && self.owner.is_none()
    }
}

/// Difference between the registry and a discovery response
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    /// Discovered entries with no registry counterpart
    pub added: Vec<DeviceEntry>,
    /// Registry devices missing from the response
    pub removed: Vec<Device>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Compare against `discovered`, matching by id
    pub fn plan(&self, discovered: &[DeviceEntry]) -> ReconcilePlan {
        let mut seen = HashSet::new();
        let added = discovered
            .iter()
            .filter(|entry| seen.insert(entry.id.as_str()))
            .filter(|entry| self.lookup_by_id(&entry.id).is_none())
            .cloned()
            .collect();
        let removed = self
            .entries
            .iter()
            .filter(|e| !discovered.iter().any(|d| d.id == e.device.id()))
            .map(|e| e.device.clone())
            .collect();
        ReconcilePlan { added, removed }
    }

    /// Plan that only drops the device with `id`
    pub fn plan_removal(&self, id: &str) -> ReconcilePlan {
        ReconcilePlan {
            added: Vec::new(),
            removed: self
                .lookup_by_id(id)
                .map(|e| vec![e.device.clone()])
                .unwrap_or_default(),
        }
    }

    /// Carry out a plan. New devices start disconnected and unowned.
    ///
    /// Returns the (added, removed) devices.
    pub fn apply(&mut self, plan: ReconcilePlan, sink: &Arc<dyn DeviceSink>) -> (Vec<Device>, Vec<Device>) {
        let removed: Vec<Device> = plan
            .removed
            .into_iter()
            .filter(|device| self.contains(device))
            .collect();
        self.entries
            .retain(|e| !removed.iter().any(|r| r.ptr_eq(&e.device)));

        let added: Vec<Device> = plan
            .added
            .iter()
            .filter(|entry| self.lookup_by_id(&entry.id).is_none())
            .map(|entry| Device::from_entry(entry, sink.clone()))
            .collect();
        self.entries.extend(added.iter().map(|device| RegistryEntry {
            device: device.clone(),
            connected: false,
            owner: None,
        }));

        (added, removed)
    }

    /// `apply(plan(discovered))`
    pub fn reconcile(
        &mut self,
        discovered: &[DeviceEntry],
        sink: &Arc<dyn DeviceSink>,
    ) -> (Vec<Device>, Vec<Device>) {
        let plan = self.plan(discovered);
        self.apply(plan, sink)
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.device.id() == id)
    }

    pub fn lookup_by_port(&self, port: u16) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.device.port() == port)
    }

    pub fn entry(&self, device: &Device) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.device.ptr_eq(device))
    }

    pub fn entry_mut(&mut self, device: &Device) -> Option<&mut RegistryEntry> {
        self.entries.iter_mut().find(|e| e.device.ptr_eq(device))
    }

    pub fn contains(&self, device: &Device) -> bool {
        self.entry(device).is_some()
    }

    pub fn is_connected(&self, device: &Device) -> bool {
        self.entry(device).map(|e| e.connected).unwrap_or(false)
    }

    pub fn owner(&self, device: &Device) -> Option<ClientId> {
        self.entry(device).and_then(|e| e.owner)
    }

    fn select(&self, kind: DeviceKind, keep: impl Fn(&RegistryEntry) -> bool) -> Vec<Device> {
        self.entries
            .iter()
            .filter(|e| e.device.kind() == kind && keep(e))
            .map(|e| e.device.clone())
            .collect()
    }

    /// All devices of `kind`, in attach order
    pub fn devices(&self, kind: DeviceKind) -> Vec<Device> {
        self.select(kind, |_| true)
    }

    pub fn connected(&self, kind: DeviceKind) -> Vec<Device> {
        self.select(kind, |e| e.connected)
    }

    /// Connected devices of `kind` not routed to a client
    pub fn unrouted(&self, kind: DeviceKind) -> Vec<Device> {
        self.select(kind, RegistryEntry::is_free)
    }

    /// Drop everything, returning the devices that were registered
    pub fn clear(&mut self) -> Vec<Device> {
        self.entries.drain(..).map(|e| e.device).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlink_test_utils::RecordingSink;

    fn sink() -> Arc<dyn DeviceSink> {
        RecordingSink::new()
    }

    fn listing() -> Vec<DeviceEntry> {
        vec![
            DeviceEntry::new("m1000", "monome 128", 15000),
            DeviceEntry::new("m0000045", "monome arc 4", 15001),
        ]
    }

    #[test]
    fn test_reconcile_adds_and_classifies() {
        let mut registry = Registry::new();
        let (added, removed) = registry.reconcile(&listing(), &sink());

        assert_eq!(added.len(), 2);
        assert!(removed.is_empty());
        assert_eq!(added[0].kind(), DeviceKind::Grid);
        assert_eq!(added[1].kind(), DeviceKind::Encoder);
        assert!(!registry.is_connected(&added[0]));
    }

    #[test]
    fn test_reconcile_is_idempotent_and_keeps_identity() {
        let sink = sink();
        let mut registry = Registry::new();
        let (first, _) = registry.reconcile(&listing(), &sink);
        let (added, removed) = registry.reconcile(&listing(), &sink);

        assert!(added.is_empty());
        assert!(removed.is_empty());
        assert!(registry.lookup_by_id("m1000").unwrap().device.ptr_eq(&first[0]));
        assert!(registry.lookup_by_id("m0000045").unwrap().device.ptr_eq(&first[1]));
    }

    #[test]
    fn test_reconcile_removes_missing() {
        let sink = sink();
        let mut registry = Registry::new();
        registry.reconcile(&listing(), &sink);

        let (added, removed) =
            registry.reconcile(&[DeviceEntry::new("m0000045", "monome arc 4", 15001)], &sink);
        assert!(added.is_empty());
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), "m1000");
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup_by_id("m1000").is_none());
    }

    #[test]
    fn test_duplicate_ids_in_listing_are_added_once() {
        let mut registry = Registry::new();
        let entry = DeviceEntry::new("m1", "monome 64", 1);
        let (added, _) = registry.reconcile(&[entry.clone(), entry], &sink());
        assert_eq!(added.len(), 1);
    }

    #[test]
    fn test_lookups_and_queries() {
        let mut registry = Registry::new();
        let (added, _) = registry.reconcile(&listing(), &sink());

        assert_eq!(registry.lookup_by_port(15001).unwrap().device.id(), "m0000045");
        assert!(registry.lookup_by_port(1).is_none());

        registry.entry_mut(&added[0]).unwrap().connected = true;
        assert_eq!(registry.connected(DeviceKind::Grid).len(), 1);
        assert_eq!(registry.unrouted(DeviceKind::Grid).len(), 1);
        assert!(registry.connected(DeviceKind::Encoder).is_empty());

        registry.entry_mut(&added[0]).unwrap().owner = Some(ClientId(7));
        assert!(registry.unrouted(DeviceKind::Grid).is_empty());
        assert_eq!(registry.owner(&added[0]), Some(ClientId(7)));
        assert_eq!(registry.devices(DeviceKind::Grid).len(), 1);
    }

    #[test]
    fn test_plan_removal() {
        let mut registry = Registry::new();
        registry.reconcile(&listing(), &sink());
        let plan = registry.plan_removal("m1000");
        assert_eq!(plan.removed.len(), 1);
        assert!(registry.plan_removal("nope").is_empty());
    }
}
