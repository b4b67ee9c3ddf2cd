//! Message Router.
//!
//! Classifies `(topic, payload)` pairs under the configured topic root and
//! applies them to a [`DeviceRegistry`]:
//!
//! | Topic | Intent |
//! |-------|--------|
//! | `R/bridge/devices` | roster snapshot, reconciled |
//! | `R/bridge/state` | coordinator availability |
//! | `R/<device>/availability` | device availability |
//! | `R/<device>` | device state (JSON) |
//!
//! Other `R/bridge/...` topics are ignored. Device topics are ignored until
//! the first roster has been applied, and so are devices the registry does
//! not know.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use zigspool_core::{BridgeError, Result};

use crate::device::{Availability, DeviceDescriptor};
use crate::registry::{DeviceRegistry, ReconcileOutcome};

/// What a topic asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent<'a> {
    Roster,
    CoordinatorAvailability,
    /// Topic ends with `/availability`; carries the whole topic.
    DeviceAvailability(&'a str),
    DeviceState(&'a str),
    Ignored,
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Reconciled(ReconcileOutcome),
    /// A device was updated; carries its identity.
    Updated(String),
    /// Nothing to do: unsynced registry, unknown device or ignored topic.
    Skipped,
}

#[derive(Deserialize)]
struct AvailabilityPayload {
    state: String,
}

/// Stateless router for one topic root.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    root_prefix: String,
    devices_topic: String,
    state_topic: String,
    bridge_prefix: String,
}

impl MessageRouter {
    pub fn new(topic_root: &str) -> Self {
        let root = topic_root.trim_end_matches('/');
        Self {
            root_prefix: format!("{}/", root),
            devices_topic: format!("{}/bridge/devices", root),
            state_topic: format!("{}/bridge/state", root),
            bridge_prefix: format!("{}/bridge/", root),
        }
    }

    pub fn classify<'t>(&self, topic: &'t str) -> Intent<'t> {
        if topic == self.devices_topic {
            Intent::Roster
        } else if topic == self.state_topic {
            Intent::CoordinatorAvailability
        } else if topic.starts_with(&self.bridge_prefix) || !topic.starts_with(&self.root_prefix) {
            Intent::Ignored
        } else if topic.ends_with("/availability") {
            Intent::DeviceAvailability(topic)
        } else {
            Intent::DeviceState(topic)
        }
    }

    /// Handle one message. The payload is fully parsed before the registry
    /// is touched, so an error leaves the registry unchanged.
    pub fn handle(
        &self,
        registry: &mut DeviceRegistry,
        topic: &str,
        payload: &[u8],
    ) -> Result<RouteOutcome> {
        let intent = self.classify(topic);
        debug!("Routing {} as {:?}", topic, intent);

        if intent != Intent::Roster && registry.is_empty() {
            return Ok(RouteOutcome::Skipped);
        }

        match intent {
            Intent::Roster => {
                let snapshot: Vec<DeviceDescriptor> = serde_json::from_slice(payload)?;
                debug!("Received devices topic with {} entries", snapshot.len());
                Ok(RouteOutcome::Reconciled(registry.reconcile(snapshot)))
            }
            Intent::CoordinatorAvailability => {
                let availability = parse_availability(payload)?;
                let Some(identity) = registry.coordinator_identity() else {
                    return Ok(RouteOutcome::Skipped);
                };
                registry.set_availability(&identity, availability);
                Ok(RouteOutcome::Updated(identity))
            }
            Intent::DeviceAvailability(topic) => {
                let identity = segment_from_end(topic, 1)?;
                if !registry.contains(identity) {
                    return Ok(RouteOutcome::Skipped);
                }
                let availability = parse_availability(payload)?;
                registry.set_availability(identity, availability);
                Ok(RouteOutcome::Updated(identity.to_string()))
            }
            Intent::DeviceState(topic) => {
                let identity = segment_from_end(topic, 0)?;
                if !registry.contains(identity) {
                    return Ok(RouteOutcome::Skipped);
                }
                let state: Value = serde_json::from_slice(payload)?;
                registry.set_state(identity, state);
                Ok(RouteOutcome::Updated(identity.to_string()))
            }
            Intent::Ignored => Ok(RouteOutcome::Skipped),
        }
    }

    /// Handle one message, logging any failure with its topic.
    pub fn dispatch(
        &self,
        registry: &mut DeviceRegistry,
        topic: &str,
        payload: &[u8],
    ) -> Option<RouteOutcome> {
        match self.handle(registry, topic, payload) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Error processing topic {}: {}", topic, e);
                None
            }
        }
    }
}

/// `n`-th `/` segment counted from the end (0 = last).
fn segment_from_end(topic: &str, n: usize) -> Result<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < n + 2 {
        return Err(BridgeError::InvalidTopic(topic.to_string()));
    }
    Ok(parts[parts.len() - 1 - n])
}

/// Accept `online` as well as `{"state":"online"}`.
pub fn parse_availability(payload: &[u8]) -> Result<Availability> {
    let text = std::str::from_utf8(payload)?.trim();
    if text.starts_with('{') {
        let parsed: AvailabilityPayload = serde_json::from_str(text)?;
        return Ok(Availability::from(parsed.state));
    }
    Ok(Availability::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let router = MessageRouter::new("main");

        assert_eq!(router.classify("main/bridge/devices"), Intent::Roster);
        assert_eq!(router.classify("main/bridge/state"), Intent::CoordinatorAvailability);
        assert_eq!(router.classify("main/bridge/logging"), Intent::Ignored);
        assert_eq!(
            router.classify("main/lamp/availability"),
            Intent::DeviceAvailability("main/lamp/availability")
        );
        assert_eq!(router.classify("main/lamp"), Intent::DeviceState("main/lamp"));
        assert_eq!(router.classify("other/lamp"), Intent::Ignored);
    }

    #[test]
    fn test_trailing_slash_root() {
        let router = MessageRouter::new("main/");
        assert_eq!(router.classify("main/bridge/devices"), Intent::Roster);
    }

    #[test]
    fn test_segment_from_end() {
        assert_eq!(segment_from_end("main/lamp/availability", 1).unwrap(), "lamp");
        assert_eq!(segment_from_end("main/lamp", 0).unwrap(), "lamp");
        assert_eq!(segment_from_end("main/room/lamp", 0).unwrap(), "lamp");
        assert!(segment_from_end("lamp", 0).is_err());
        assert!(segment_from_end("x/availability", 1).is_err());
    }

    #[test]
    fn test_parse_availability_forms() {
        assert_eq!(parse_availability(b"online").unwrap(), Availability::Online);
        assert_eq!(parse_availability(b" offline\n").unwrap(), Availability::Offline);
        assert_eq!(
            parse_availability(br#"{"state":"online"}"#).unwrap(),
            Availability::Online
        );
        assert_eq!(
            parse_availability(b"rebooting").unwrap(),
            Availability::Other("rebooting".into())
        );
        assert!(parse_availability(b"{broken").is_err());
        assert!(parse_availability(&[0xff, 0xfe]).is_err());
    }
}
