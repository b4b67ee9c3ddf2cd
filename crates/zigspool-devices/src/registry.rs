//! Device Registry - the authoritative identity → device mapping.
//!
//! Devices are only created and removed by [`DeviceRegistry::reconcile`],
//! which diffs a full roster snapshot against the current mapping. State and
//! availability updates mutate an existing device and then materialize its
//! artifact through the configured [`StatusSink`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use zigspool_core::FreshnessConfig;

use crate::device::{Availability, DeviceDescriptor, DeviceType, ZigbeeDevice, COORDINATOR_IDENTITY};
use crate::spool::{render_status, StatusSink};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: usize,
    pub removed: usize,
    /// Known devices whose artifact was rewritten.
    pub refreshed: usize,
}

/// Registry of known devices.
pub struct DeviceRegistry {
    devices: HashMap<String, ZigbeeDevice>,
    sink: Arc<dyn StatusSink>,
    piggyback: String,
    freshness: FreshnessConfig,
}

impl DeviceRegistry {
    pub fn new(
        sink: Arc<dyn StatusSink>,
        piggyback: impl Into<String>,
        freshness: FreshnessConfig,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            sink,
            piggyback: piggyback.into(),
            freshness,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&ZigbeeDevice> {
        self.devices.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.devices.contains_key(identity)
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Apply a full roster snapshot.
    ///
    /// Devices missing from the snapshot are removed and their artifacts
    /// retired. New devices are added; known devices keep their state and
    /// availability, take the new descriptor, and get their artifact rewritten.
    pub fn reconcile(&mut self, snapshot: Vec<DeviceDescriptor>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let stale: Vec<String> = self
            .devices
            .keys()
            .filter(|id| !snapshot.iter().any(|d| d.matches(id)))
            .cloned()
            .collect();

        for identity in stale {
            self.devices.remove(&identity);
            self.sink.retire(&identity);
            outcome.removed += 1;
        }

        if outcome.removed > 0 {
            info!("{} devices removed", outcome.removed);
        }

        for descriptor in snapshot {
            let known = descriptor
                .friendly_name
                .as_deref()
                .filter(|name| self.devices.contains_key(*name))
                .or_else(|| {
                    Some(descriptor.ieee_address.as_str())
                        .filter(|addr| self.devices.contains_key(*addr))
                })
                .map(str::to_string);

            let identity = match known {
                Some(identity) => {
                    if let Some(device) = self.devices.get_mut(&identity) {
                        device.sync_descriptor(descriptor);
                    }
                    outcome.refreshed += 1;
                    identity
                }
                None => {
                    let device = ZigbeeDevice::new(descriptor);
                    let identity = device.identity().to_string();
                    self.devices.insert(identity.clone(), device);
                    outcome.added += 1;
                    identity
                }
            };

            self.materialize(&identity);
        }

        if outcome.added > 0 {
            info!("{} devices added", outcome.added);
        }

        outcome
    }

    /// Replace the latest state of `identity`. Returns `false` if unknown.
    pub fn set_state(&mut self, identity: &str, state: Value) -> bool {
        match self.devices.get_mut(identity) {
            Some(device) => {
                device.set_state(state);
                self.materialize(identity);
                true
            }
            None => false,
        }
    }

    /// Replace the availability of `identity`. Returns `false` if unknown.
    pub fn set_availability(&mut self, identity: &str, availability: Availability) -> bool {
        match self.devices.get_mut(identity) {
            Some(device) => {
                device.set_availability(availability);
                self.materialize(identity);
                true
            }
            None => false,
        }
    }

    /// Identity of the coordinator, if synced.
    ///
    /// Prefers the device typed `Coordinator`, then the reserved identity.
    pub fn coordinator_identity(&self) -> Option<String> {
        let mut typed: Vec<&String> = self
            .devices
            .iter()
            .filter(|(_, d)| *d.device_type() == DeviceType::Coordinator)
            .map(|(id, _)| id)
            .collect();
        typed.sort();

        typed
            .first()
            .map(|id| id.to_string())
            .or_else(|| {
                self.devices
                    .contains_key(COORDINATOR_IDENTITY)
                    .then(|| COORDINATOR_IDENTITY.to_string())
            })
    }

    /// Apply the bridge's own availability to the coordinator.
    pub fn set_coordinator_availability(&mut self, availability: Availability) -> bool {
        match self.coordinator_identity() {
            Some(identity) => self.set_availability(&identity, availability),
            None => false,
        }
    }

    /// Render and hand the artifact for `identity` to the sink.
    pub fn materialize(&self, identity: &str) {
        if let Some(device) = self.devices.get(identity) {
            self.sink
                .materialize(render_status(device, &self.piggyback, &self.freshness));
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.identities())
            .field("piggyback", &self.piggyback)
            .field("freshness", &self.freshness)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::MemorySink;
    use serde_json::json;

    fn registry() -> (DeviceRegistry, MemorySink) {
        let sink = MemorySink::new();
        let registry = DeviceRegistry::new(
            Arc::new(sink.clone()),
            "zigbee2mqtt",
            FreshnessConfig::default(),
        );
        (registry, sink)
    }

    fn device(name: Option<&str>, ieee: &str, kind: &str) -> DeviceDescriptor {
        serde_json::from_value(json!({
            "friendly_name": name,
            "ieee_address": ieee,
            "type": kind,
        }))
        .unwrap()
    }

    #[test]
    fn test_reconcile_adds_and_materializes() {
        let (mut registry, sink) = registry();
        let outcome = registry.reconcile(vec![
            device(Some("lamp"), "0x01", "Router"),
            device(None, "0x02", "EndDevice"),
        ]);

        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.removed, 0);
        assert!(registry.contains("lamp"));
        assert!(registry.contains("0x02"));
        assert_eq!(sink.write_count(), 2);
    }

    #[test]
    fn test_reconcile_keeps_state_of_known_devices() {
        let (mut registry, _sink) = registry();
        registry.reconcile(vec![device(Some("lamp"), "0x01", "Router")]);
        registry.set_state("lamp", json!({ "battery": 80 }));
        registry.set_availability("lamp", Availability::Online);

        let outcome = registry.reconcile(vec![device(Some("lamp"), "0x01", "EndDevice")]);
        assert_eq!(outcome, ReconcileOutcome { added: 0, removed: 0, refreshed: 1 });

        let lamp = registry.get("lamp").unwrap();
        assert_eq!(lamp.availability(), &Availability::Online);
        assert_eq!(lamp.state(), Some(&json!({ "battery": 80 })));
        assert_eq!(lamp.device_type(), &DeviceType::EndDevice);
    }

    #[test]
    fn test_rename_replaces_device() {
        let (mut registry, sink) = registry();
        registry.reconcile(vec![device(Some("lamp"), "0x01", "Router")]);

        let outcome = registry.reconcile(vec![device(Some("hall lamp"), "0x01", "Router")]);
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.removed, 1);
        assert!(registry.contains("hall lamp"));
        assert_eq!(sink.retired(), vec!["lamp".to_string()]);
    }

    #[test]
    fn test_known_by_ieee_keeps_key() {
        let (mut registry, _sink) = registry();
        registry.reconcile(vec![device(None, "0x01", "Router")]);

        let outcome = registry.reconcile(vec![device(Some("lamp"), "0x01", "Router")]);
        assert_eq!(outcome.added, 0);
        assert!(registry.contains("0x01"));
        assert!(!registry.contains("lamp"));
    }

    #[test]
    fn test_unknown_device_updates_are_ignored() {
        let (mut registry, sink) = registry();
        registry.reconcile(vec![device(Some("lamp"), "0x01", "Router")]);
        sink.clear();

        assert!(!registry.set_state("ghost", json!({})));
        assert!(!registry.set_availability("ghost", Availability::Online));
        assert_eq!(sink.write_count(), 0);
    }

    #[test]
    fn test_coordinator_resolution() {
        let (mut registry, _sink) = registry();
        assert!(!registry.set_coordinator_availability(Availability::Online));

        registry.reconcile(vec![
            device(Some("Coordinator"), "0x00", "Coordinator"),
            device(Some("lamp"), "0x01", "Router"),
        ]);
        assert_eq!(registry.coordinator_identity().as_deref(), Some("Coordinator"));
        assert!(registry.set_coordinator_availability(Availability::Online));
        assert_eq!(
            registry.get("Coordinator").unwrap().availability(),
            &Availability::Online
        );
    }

    #[test]
    fn test_renamed_coordinator_found_by_type() {
        let (mut registry, _sink) = registry();
        registry.reconcile(vec![
            device(Some("zigbee stick"), "0x00", "Coordinator"),
            device(Some("Coordinator"), "0x05", "EndDevice"),
        ]);

        assert_eq!(registry.coordinator_identity().as_deref(), Some("zigbee stick"));
        registry.set_coordinator_availability(Availability::Offline);
        assert_eq!(
            registry.get("Coordinator").unwrap().availability(),
            &Availability::Unknown
        );
    }
}
