//! Device allocation policy
//!
//! Pure functions over a [`Registry`]; the context applies their results.

use gridlink_core::{Device, DeviceKind, Spec};

use crate::registry::Registry;

/// Pick a free device of `spec.kind()` for a client.
///
/// Preference: the default device if free and matching, then the first free
/// matching device in attach order. A strict search stops there and only
/// considers exact specs, so open claims wait for the loose pass. A loose
/// search falls back to the free default, then to any free device.
pub fn find_candidate(
    registry: &Registry,
    spec: &dyn Spec,
    default: Option<&Device>,
    strict: bool,
) -> Option<Device> {
    if spec.is_none() || (strict && !spec.is_exact()) {
        return None;
    }

    let free = registry.unrouted(spec.kind());
    let free_default = default.filter(|d| free.iter().any(|f| f.ptr_eq(d)));

    if let Some(device) = free_default.filter(|d| spec.matches(d)) {
        return Some(device.clone());
    }
    if let Some(device) = free.iter().find(|d| spec.matches(d)) {
        return Some(device.clone());
    }
    if strict {
        return None;
    }
    free_default.cloned().or_else(|| free.into_iter().next())
}

/// Next default device of `kind`.
///
/// A connected current default is kept. Otherwise the first newly connected
/// free device wins, then the first connected unrouted one, else none.
pub fn choose_default(
    registry: &Registry,
    kind: DeviceKind,
    current: Option<&Device>,
    newly_connected: &[Device],
) -> Option<Device> {
    if let Some(current) = current.filter(|d| registry.is_connected(d)) {
        return Some(current.clone());
    }

    newly_connected
        .iter()
        .filter(|d| d.kind() == kind)
        .find(|d| registry.entry(d).map(|e| e.is_free()).unwrap_or(false))
        .cloned()
        .or_else(|| registry.unrouted(kind).into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientId;
    use gridlink_core::{DeviceEntry, DeviceSink, EncSpec, GridSpec};
    use gridlink_test_utils::RecordingSink;
    use std::sync::Arc;

    fn registry(models: &[(&str, &str)]) -> (Registry, Vec<Device>) {
        let sink: Arc<dyn DeviceSink> = RecordingSink::new();
        let entries: Vec<DeviceEntry> = models
            .iter()
            .enumerate()
            .map(|(i, (id, model))| DeviceEntry::new(*id, *model, 15000 + i as u16))
            .collect();
        let mut registry = Registry::new();
        let (added, _) = registry.reconcile(&entries, &sink);
        for device in &added {
            registry.entry_mut(device).unwrap().connected = true;
        }
        (registry, added)
    }

    #[test]
    fn test_default_preferred_when_matching() {
        let (registry, devices) = registry(&[("a", "monome 64"), ("b", "monome 64")]);
        let found = find_candidate(&registry, &GridSpec::exact(8, 8), Some(&devices[1]), true);
        assert!(found.unwrap().ptr_eq(&devices[1]));
    }

    #[test]
    fn test_first_matching_in_attach_order() {
        let (registry, devices) =
            registry(&[("a", "monome 256"), ("b", "monome 64"), ("c", "monome 64")]);
        let found = find_candidate(&registry, &GridSpec::exact(8, 8), Some(&devices[0]), true);
        assert!(found.unwrap().ptr_eq(&devices[1]));
    }

    #[test]
    fn test_strict_has_no_fallback() {
        let (registry, devices) = registry(&[("a", "monome 256")]);
        assert!(find_candidate(&registry, &GridSpec::exact(8, 8), Some(&devices[0]), true).is_none());
        assert!(find_candidate(&registry, &GridSpec::Any, Some(&devices[0]), true).is_none());
    }

    #[test]
    fn test_loose_falls_back_to_default_then_first_free() {
        let (registry, devices) = registry(&[("a", "monome 256"), ("b", "monome 128")]);
        let spec = GridSpec::exact(8, 8);

        let found = find_candidate(&registry, &spec, Some(&devices[1]), false);
        assert!(found.unwrap().ptr_eq(&devices[1]));

        let found = find_candidate(&registry, &spec, None, false);
        assert!(found.unwrap().ptr_eq(&devices[0]));
    }

    #[test]
    fn test_single_dimension_spec_is_strict() {
        let (registry, devices) = registry(&[("a", "monome 64"), ("b", "monome 128")]);
        let found = find_candidate(&registry, &GridSpec::cols(16), Some(&devices[0]), true);
        assert!(found.unwrap().ptr_eq(&devices[1]));

        let found = find_candidate(&registry, &GridSpec::rows(8), Some(&devices[1]), true);
        assert!(found.unwrap().ptr_eq(&devices[1]));
        assert!(find_candidate(&registry, &GridSpec::rows(16), None, true).is_none());
    }

    #[test]
    fn test_owned_devices_are_skipped() {
        let (mut registry, devices) = registry(&[("a", "monome 64"), ("b", "monome 64")]);
        registry.entry_mut(&devices[0]).unwrap().owner = Some(ClientId(1));

        let found = find_candidate(&registry, &GridSpec::Any, Some(&devices[0]), false);
        assert!(found.unwrap().ptr_eq(&devices[1]));

        registry.entry_mut(&devices[1]).unwrap().owner = Some(ClientId(2));
        assert!(find_candidate(&registry, &GridSpec::Any, None, false).is_none());
    }

    #[test]
    fn test_none_spec_never_routes() {
        let (registry, _) = registry(&[("a", "monome arc 4")]);
        assert!(find_candidate(&registry, &EncSpec::None, None, false).is_none());
        assert!(find_candidate(&registry, &EncSpec::exact(4), None, true).is_some());
        assert!(find_candidate(&registry, &EncSpec::exact(2), None, true).is_none());
    }

    #[test]
    fn test_choose_default() {
        let (mut registry, devices) = registry(&[("a", "monome 64"), ("b", "monome 128")]);

        let first = choose_default(&registry, DeviceKind::Grid, None, &devices);
        assert!(first.as_ref().unwrap().ptr_eq(&devices[0]));

        let kept = choose_default(&registry, DeviceKind::Grid, Some(&devices[1]), &devices);
        assert!(kept.unwrap().ptr_eq(&devices[1]));

        // Default unplugged: the remaining unrouted device takes over
        let sink: Arc<dyn DeviceSink> = RecordingSink::new();
        let plan = registry.plan_removal("a");
        registry.apply(plan, &sink);
        let next = choose_default(&registry, DeviceKind::Grid, Some(&devices[0]), &[]);
        assert!(next.unwrap().ptr_eq(&devices[1]));

        registry.entry_mut(&devices[1]).unwrap().owner = Some(ClientId(1));
        assert!(choose_default(&registry, DeviceKind::Grid, Some(&devices[0]), &[]).is_none());
        assert!(choose_default(&registry, DeviceKind::Encoder, None, &devices).is_none());
    }
}
