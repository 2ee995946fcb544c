//! BLE communication module.
//!
//! This module provides the GATT identifiers of the sensor, the link-layer
//! traits the session drives, and a btleplug implementation of them.

pub mod characteristics;
pub mod connection;
pub mod link;
pub mod uuids;

pub use characteristics::SensorCharacteristic;
pub use connection::{BtleplugConnector, BtleplugLink};
pub use link::{
    GattConnector, GattLink, Generation, LinkEvent, LinkEventKind, LinkEventSender, LinkState,
};
pub use uuids::*;
