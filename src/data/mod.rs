//! Data structures for sensor data.
//!
//! This module contains the reading snapshot and the device identity the
//! session tracks.

pub mod device;
pub mod reading;

pub use device::{DeviceAddress, DeviceIdentity};
pub use reading::Reading;
