//! Zigbee device tracking for Check_MK.
//!
//! Keeps an in-memory roster of Zigbee2MQTT devices in sync with the
//! bridge's roster snapshots and writes each device's health as a
//! Check_MK local-check spool file.
//!
//! ## Architecture
//!
//! - **ZigbeeDevice**: one device's descriptor, latest state and availability
//! - **DeviceRegistry**: identity → device mapping, roster reconciliation
//! - **MessageRouter**: classifies bus messages and applies them to the registry
//! - **StatusSink**: where rendered artifacts go; [`SpoolWorker`] writes them
//!   to the spool directory in order

pub mod device;
pub mod registry;
pub mod router;
pub mod spool;

pub use device::{
    Availability, DeviceDefinition, DeviceDescriptor, DeviceType, Expose, ZigbeeDevice,
    COORDINATOR_IDENTITY,
};
pub use registry::{DeviceRegistry, ReconcileOutcome};
pub use router::{Intent, MessageRouter, RouteOutcome};
pub use spool::{
    render_status, MemorySink, SinkEvent, SpoolWorker, SpoolWriter, StatusReport, StatusSink,
};
