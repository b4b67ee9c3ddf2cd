//! Zigbee device entity.
//!
//! A [`ZigbeeDevice`] holds the roster descriptor for one device, its latest
//! state payload and its availability. Setters only change in-memory state;
//! writing the spool artifact is left to the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use zigspool_core::FreshnessConfig;

/// Registry identity reserved for the network coordinator.
///
/// Zigbee2MQTT names the coordinator `Coordinator` in its roster. The
/// `bridge/state` topic carries the coordinator's availability; it is applied
/// to the entity typed [`DeviceType::Coordinator`], falling back to the entity
/// registered under this identity.
pub const COORDINATOR_IDENTITY: &str = "Coordinator";

/// Zigbee device role as reported in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    Coordinator,
    Router,
    EndDevice,
    /// Any other value reported by the bridge.
    Other(String),
}

impl DeviceType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Coordinator => "Coordinator",
            Self::Router => "Router",
            Self::EndDevice => "EndDevice",
            Self::Other(s) => s,
        }
    }

    /// Mains-powered infrastructure, checked against the shorter freshness window.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Coordinator | Self::Router)
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<String> for DeviceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Coordinator" => Self::Coordinator,
            "Router" => Self::Router,
            "EndDevice" => Self::EndDevice,
            _ => Self::Other(s),
        }
    }
}

impl From<DeviceType> for String {
    fn from(t: DeviceType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exposed property of a device definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expose {
    /// Composite exposes (lights, switches) have no property of their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_max: Option<f64>,
}

impl Expose {
    fn is_numeric_battery(&self) -> bool {
        self.property.as_deref() == Some("battery") && self.kind == "numeric"
    }
}

/// Capability descriptor of a supported device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    #[serde(default)]
    pub exposes: Vec<Expose>,
}

/// One entry of the `bridge/devices` roster.
///
/// Unknown roster fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub ieee_address: String,
    #[serde(rename = "type", default)]
    pub device_type: DeviceType,
    /// `null` for devices the bridge does not support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<DeviceDefinition>,
}

impl DeviceDescriptor {
    /// `friendly_name` if present, else `ieee_address`.
    pub fn identity(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.ieee_address)
    }

    /// Whether this descriptor refers to `identity` by either name.
    pub fn matches(&self, identity: &str) -> bool {
        self.friendly_name.as_deref() == Some(identity) || self.ieee_address == identity
    }
}

/// Device availability as reported on the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Availability {
    Online,
    Offline,
    /// Nothing received yet.
    #[default]
    Unknown,
    Other(String),
}

impl Availability {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
            Self::Other(s) => s,
        }
    }

    /// Local check status code: 0 OK, 2 CRIT, 3 UNKNOWN.
    pub fn status_code(&self) -> u8 {
        match self {
            Self::Online => 0,
            Self::Offline => 2,
            Self::Unknown | Self::Other(_) => 3,
        }
    }
}

impl From<&str> for Availability {
    fn from(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "offline" => Self::Offline,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Availability {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Availability> for String {
    fn from(a: Availability) -> Self {
        a.as_str().to_string()
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known device and its latest telemetry.
#[derive(Debug, Clone)]
pub struct ZigbeeDevice {
    identity: String,
    descriptor: DeviceDescriptor,
    state: Option<Value>,
    availability: Availability,
    state_changed_at: Option<DateTime<Utc>>,
    availability_changed_at: Option<DateTime<Utc>>,
}

impl ZigbeeDevice {
    /// Create a device from a roster entry. The identity is fixed here.
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            identity: descriptor.identity().to_string(),
            descriptor,
            state: None,
            availability: Availability::Unknown,
            state_changed_at: None,
            availability_changed_at: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn device_type(&self) -> &DeviceType {
        &self.descriptor.device_type
    }

    /// Replace the roster descriptor, keeping identity, state and availability.
    pub fn sync_descriptor(&mut self, descriptor: DeviceDescriptor) {
        self.descriptor = descriptor;
    }

    /// The numeric battery expose, if the device declares one.
    pub fn battery_expose(&self) -> Option<&Expose> {
        self.descriptor
            .definition
            .as_ref()?
            .exposes
            .iter()
            .find(|e| e.is_numeric_battery())
    }

    pub fn has_battery_telemetry(&self) -> bool {
        self.battery_expose().is_some()
    }

    /// Battery level from the latest state, or 0 when unavailable.
    pub fn battery(&self) -> f64 {
        if !self.has_battery_telemetry() {
            return 0.0;
        }
        self.state
            .as_ref()
            .and_then(|s| s.get("battery"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Seconds until the artifact should be considered stale.
    pub fn freshness_secs(&self, freshness: &FreshnessConfig) -> u64 {
        if self.device_type().is_infrastructure() {
            freshness.router_secs
        } else {
            freshness.end_device_secs
        }
    }

    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    pub fn state_changed_at(&self) -> Option<DateTime<Utc>> {
        self.state_changed_at
    }

    pub fn availability_changed_at(&self) -> Option<DateTime<Utc>> {
        self.availability_changed_at
    }

    pub fn set_state(&mut self, state: Value) {
        self.state = Some(state);
        self.state_changed_at = Some(Utc::now());
    }

    pub fn set_availability(&mut self, availability: Availability) {
        self.availability = availability;
        self.availability_changed_at = Some(Utc::now());
    }
}
