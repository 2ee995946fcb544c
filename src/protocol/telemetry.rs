//! Telemetry payload decoding.
//!
//! Converts raw characteristic values into typed measurements. Every
//! function here is total: a payload shorter than its characteristic
//! requires decodes to zero instead of failing, so a malformed frame can
//! never halt the notification pipeline.

use crate::ble::characteristics::SensorCharacteristic;

/// PSI per least-significant bit of the pressure payload.
pub const PRESSURE_SCALE: f32 = 0.01;

/// A single decoded characteristic value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Measurement {
    /// Pressure in PSI.
    Pressure(f32),
    /// Temperature in degrees Celsius.
    Temperature(f32),
    /// Battery level in percent. Not clamped to 100.
    Battery(u8),
}

impl Measurement {
    /// The characteristic this measurement was decoded from.
    pub fn characteristic(&self) -> SensorCharacteristic {
        match self {
            Self::Pressure(_) => SensorCharacteristic::Pressure,
            Self::Temperature(_) => SensorCharacteristic::Temperature,
            Self::Battery(_) => SensorCharacteristic::Battery,
        }
    }
}

/// Decode a pressure payload to PSI.
///
/// The first two bytes are an unsigned little-endian 16-bit count of
/// 0.01 PSI. Returns `0.0` when fewer than two bytes are present.
///
/// # Example
///
/// ```
/// use m5600_ble::protocol::decode_pressure;
///
/// assert!((decode_pressure(&[0x64, 0x00]) - 1.0).abs() < 1e-6);
/// assert_eq!(decode_pressure(&[0x64]), 0.0);
/// ```
pub fn decode_pressure(bytes: &[u8]) -> f32 {
    match bytes {
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]) as f32 * PRESSURE_SCALE,
        _ => 0.0,
    }
}

/// Decode a temperature payload to degrees Celsius.
///
/// The first byte is a signed 8-bit value, unscaled. Returns `0.0` for an
/// empty payload.
pub fn decode_temperature(bytes: &[u8]) -> f32 {
    match bytes.first() {
        Some(&b) => b as i8 as f32,
        None => 0.0,
    }
}

/// Decode a battery payload to percent.
///
/// Values above 100 are passed through as the device sent them. Returns
/// `0` for an empty payload.
pub fn decode_battery(bytes: &[u8]) -> u8 {
    bytes.first().copied().unwrap_or(0)
}

/// Decode a payload for the given characteristic.
pub fn decode(characteristic: SensorCharacteristic, bytes: &[u8]) -> Measurement {
    match characteristic {
        SensorCharacteristic::Pressure => Measurement::Pressure(decode_pressure(bytes)),
        SensorCharacteristic::Temperature => Measurement::Temperature(decode_temperature(bytes)),
        SensorCharacteristic::Battery => Measurement::Battery(decode_battery(bytes)),
    }
}

/// Check whether a payload is too short to carry a real value.
///
/// Such payloads still decode (to zero); this only lets callers log them.
pub fn is_underflow(characteristic: SensorCharacteristic, bytes: &[u8]) -> bool {
    bytes.len() < characteristic.payload_len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_pressure() {
        assert_eq!(decode_pressure(&[0x64, 0x00]), 100.0 * PRESSURE_SCALE);
        assert_eq!(decode_pressure(&[0x00, 0x01]), 256.0 * PRESSURE_SCALE);
        assert_eq!(decode_pressure(&[0xFF, 0xFF]), 65535.0 * PRESSURE_SCALE);
        // Trailing bytes are ignored
        assert_eq!(decode_pressure(&[0x10, 0x27, 0xAA]), 10000.0 * PRESSURE_SCALE);
    }

    #[test]
    fn test_decode_pressure_underflow() {
        assert_eq!(decode_pressure(&[]), 0.0);
        assert_eq!(decode_pressure(&[0x64]), 0.0);
    }

    #[test]
    fn test_decode_temperature() {
        assert_eq!(decode_temperature(&[0x00]), 0.0);
        assert_eq!(decode_temperature(&[0x19]), 25.0);
        assert_eq!(decode_temperature(&[0xFF]), -1.0);
        assert_eq!(decode_temperature(&[0x80]), -128.0);
        assert_eq!(decode_temperature(&[0x7F, 0x01]), 127.0);
        assert_eq!(decode_temperature(&[]), 0.0);
    }

    #[test]
    fn test_decode_battery() {
        assert_eq!(decode_battery(&[87]), 87);
        assert_eq!(decode_battery(&[200]), 200);
        assert_eq!(decode_battery(&[]), 0);
    }

    #[test]
    fn test_decode_dispatch() {
        assert_eq!(
            decode(SensorCharacteristic::Temperature, &[0xEC]),
            Measurement::Temperature(-20.0)
        );
        assert_eq!(
            decode(SensorCharacteristic::Battery, &[42]),
            Measurement::Battery(42)
        );
        assert_eq!(
            decode(SensorCharacteristic::Pressure, &[]),
            Measurement::Pressure(0.0)
        );
        assert_eq!(
            Measurement::Battery(1).characteristic(),
            SensorCharacteristic::Battery
        );
    }

    #[test]
    fn test_is_underflow() {
        assert!(is_underflow(SensorCharacteristic::Pressure, &[0x01]));
        assert!(!is_underflow(SensorCharacteristic::Pressure, &[0x01, 0x02]));
        assert!(is_underflow(SensorCharacteristic::Battery, &[]));
        assert!(!is_underflow(SensorCharacteristic::Temperature, &[0x01]));
    }

    proptest! {
        #[test]
        fn prop_pressure_is_scaled_little_endian(lo: u8, hi: u8) {
            let expected = (hi as u16 * 256 + lo as u16) as f32 * 0.01;
            prop_assert_eq!(decode_pressure(&[lo, hi]), expected);
        }

        #[test]
        fn prop_temperature_is_signed_byte(b: u8) {
            prop_assert_eq!(decode_temperature(&[b]), (b as i8) as f32);
        }

        #[test]
        fn prop_battery_passes_through(b: u8) {
            prop_assert_eq!(decode_battery(&[b]), b);
        }

        #[test]
        fn prop_decode_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..4)) {
            for characteristic in SensorCharacteristic::ALL {
                prop_assert_eq!(decode(characteristic, &bytes), decode(characteristic, &bytes));
            }
        }
    }
}
