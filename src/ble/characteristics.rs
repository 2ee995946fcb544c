//! Telemetry characteristic identifiers.
//!
//! The sensor exposes exactly three characteristics of interest. They are
//! the decoder's dispatch key and the session's subscription set.

use uuid::Uuid;

use crate::ble::uuids::*;

/// One of the sensor's telemetry characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorCharacteristic {
    /// Pressure, 2 bytes unsigned little-endian, 0.01 PSI per LSB.
    Pressure,
    /// Temperature, 1 byte signed, degrees Celsius.
    Temperature,
    /// Battery level, 1 byte unsigned, percent.
    Battery,
}

impl SensorCharacteristic {
    /// All characteristics in subscription order.
    pub const ALL: [Self; 3] = [Self::Pressure, Self::Temperature, Self::Battery];

    /// The characteristic's UUID.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Pressure => PRESSURE_CHARACTERISTIC_UUID,
            Self::Temperature => TEMPERATURE_CHARACTERISTIC_UUID,
            Self::Battery => BATTERY_CHARACTERISTIC_UUID,
        }
    }

    /// Look up a characteristic by UUID.
    ///
    /// Returns `None` for characteristics this crate does not decode.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == *uuid)
    }

    /// Minimum payload length the decoder needs for this characteristic.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Pressure => 2,
            Self::Temperature | Self::Battery => 1,
        }
    }
}

impl std::fmt::Display for SensorCharacteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pressure => write!(f, "Pressure"),
            Self::Temperature => write!(f, "Temperature"),
            Self::Battery => write!(f, "Battery"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_order() {
        assert_eq!(
            SensorCharacteristic::ALL,
            [
                SensorCharacteristic::Pressure,
                SensorCharacteristic::Temperature,
                SensorCharacteristic::Battery,
            ]
        );
    }

    #[test]
    fn test_uuid_lookup() {
        for characteristic in SensorCharacteristic::ALL {
            assert_eq!(
                SensorCharacteristic::from_uuid(&characteristic.uuid()),
                Some(characteristic)
            );
        }
        assert_eq!(SensorCharacteristic::from_uuid(&SENSOR_SERVICE_UUID), None);
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(SensorCharacteristic::Pressure.payload_len(), 2);
        assert_eq!(SensorCharacteristic::Temperature.payload_len(), 1);
        assert_eq!(SensorCharacteristic::Battery.payload_len(), 1);
    }
}
