// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # m5600-ble
//!
//! A cross-platform Rust library for streaming live telemetry from M5600
//! pressure sensors over Bluetooth Low Energy.
//!
//! ## Features
//!
//! - **Session Management**: Connect, discover services and subscribe in one call
//! - **Live Telemetry**: Pressure, temperature and battery level as they change
//! - **Stale Event Protection**: Callbacks from a replaced link never leak into a new session
//! - **Pluggable Radio**: Drive the state machine with btleplug or your own [`GattConnector`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use m5600_ble::{BtleplugConnector, Result, SessionEvent, SessionManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connector = BtleplugConnector::new().await?;
//!     let session = Arc::new(SessionManager::new(connector));
//!     session.spawn_event_loop()?;
//!
//!     let mut events = session.subscribe();
//!     session.connect("C4:7C:8D:6A:11:22")?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::ReadingAvailable { reading, .. } = event {
//!             println!("{:.2} psi", reading.pressure_psi);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod data;
pub mod error;
pub mod protocol;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use error::{Error, Result, SessionError};
pub use session::{CallbackHandle, SessionConfig, SessionEvent, SessionManager, SessionState};
pub use utils::{bar_to_psi, celsius_to_fahrenheit, fahrenheit_to_celsius, psi_to_bar};

// Re-export commonly used types from submodules
pub use ble::characteristics::SensorCharacteristic;
pub use ble::connection::BtleplugConnector;
pub use ble::link::{GattConnector, GattLink, Generation, LinkEvent, LinkEventKind, LinkState};
pub use data::{DeviceAddress, DeviceIdentity, Reading};
pub use protocol::Measurement;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<SessionManager>();
        let _ = std::any::TypeId::of::<SessionEvent>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<Reading>();
        let _ = std::any::TypeId::of::<DeviceIdentity>();
        let _ = std::any::TypeId::of::<BtleplugConnector>();
    }

    #[test]
    fn test_unit_conversion() {
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 0.001);
        assert!((psi_to_bar(bar_to_psi(2.0)) - 2.0).abs() < 0.001);
    }
}
