//! Error types for the m5600-ble crate.

use thiserror::Error;

use crate::ble::characteristics::SensorCharacteristic;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The connect target is not a resolvable device address.
    #[error("Invalid device address: {address:?}")]
    AddressInvalid {
        /// The address string that was rejected.
        address: String,
    },

    /// Operation requires a ready session but the sensor is not connected.
    #[error("Sensor not connected")]
    NotConnected,

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Asynchronous session failures, delivered through
/// [`SessionEvent::Error`](crate::session::SessionEvent::Error).
///
/// These originate from link callbacks rather than from a caller, so they
/// are reported as events and never returned from a method.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionError {
    /// The link layer reported a non-success service enumeration.
    #[error("Service discovery failed")]
    DiscoveryFailed,

    /// Discovery completed but the sensor service was not among the results.
    #[error("Sensor service not found")]
    ServiceNotFound,

    /// Notifications could not be enabled for one characteristic.
    #[error("Subscription failed for {0} characteristic")]
    SubscriptionFailed(SensorCharacteristic),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AddressInvalid {
            address: "bad-address".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid device address: \"bad-address\"");
        assert_eq!(Error::NotConnected.to_string(), "Sensor not connected");
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::SubscriptionFailed(SensorCharacteristic::Battery).to_string(),
            "Subscription failed for Battery characteristic"
        );
        assert_eq!(
            SessionError::DiscoveryFailed.to_string(),
            "Service discovery failed"
        );
    }
}
