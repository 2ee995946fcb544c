//! Sensor reading snapshots.

use chrono::{DateTime, Utc};

use crate::protocol::Measurement;
use crate::utils::{celsius_to_fahrenheit, psi_to_bar};

/// An immutable snapshot of the sensor's telemetry.
///
/// Each characteristic updates one field; a new `Reading` is produced per
/// accepted value with the other fields carried over from the previous
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// Pressure in PSI.
    pub pressure_psi: f32,
    /// Temperature in degrees Celsius.
    pub temperature_celsius: f32,
    /// Battery level in percent (nominally 0-100).
    pub battery_percent: u8,
    /// Local receipt time of the most recent value.
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    /// Create a reading with all values zeroed.
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            pressure_psi: 0.0,
            temperature_celsius: 0.0,
            battery_percent: 0,
            captured_at,
        }
    }

    /// Produce the next reading by applying one measurement.
    ///
    /// The timestamp never moves backwards: if `received_at` is earlier than
    /// this reading's timestamp (wall clock stepped back), the previous
    /// timestamp is kept.
    pub fn merge(&self, measurement: Measurement, received_at: DateTime<Utc>) -> Self {
        let mut next = *self;
        match measurement {
            Measurement::Pressure(psi) => next.pressure_psi = psi,
            Measurement::Temperature(celsius) => next.temperature_celsius = celsius,
            Measurement::Battery(percent) => next.battery_percent = percent,
        }
        next.captured_at = received_at.max(self.captured_at);
        next
    }

    /// Pressure converted to bar.
    pub fn pressure_bar(&self) -> f32 {
        psi_to_bar(self.pressure_psi)
    }

    /// Temperature converted to Fahrenheit.
    pub fn temperature_fahrenheit(&self) -> f32 {
        celsius_to_fahrenheit(self.temperature_celsius)
    }

    /// Capture time formatted as `yyyy-mm-dd HH:MM:SS` in local time.
    pub fn formatted_timestamp(&self) -> String {
        self.captured_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.2} psi, {:.1}°C, {}% @ {}",
            self.pressure_psi,
            self.temperature_celsius,
            self.battery_percent,
            self.formatted_timestamp()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_merge_updates_one_field() {
        let base = Reading {
            pressure_psi: 12.5,
            temperature_celsius: 21.0,
            battery_percent: 80,
            captured_at: at(0),
        };

        let next = base.merge(Measurement::Pressure(1.0), at(1));
        assert_eq!(
            next,
            Reading {
                pressure_psi: 1.0,
                temperature_celsius: 21.0,
                battery_percent: 80,
                captured_at: at(1),
            }
        );

        let next = next.merge(Measurement::Battery(150), at(2));
        assert_eq!(next.battery_percent, 150);
        assert_eq!(next.pressure_psi, 1.0);

        let next = next.merge(Measurement::Temperature(-5.0), at(3));
        assert_eq!(next.temperature_celsius, -5.0);
        assert_eq!(next.battery_percent, 150);
    }

    #[test]
    fn test_merge_timestamp_never_goes_backwards() {
        let base = Reading::empty(at(10));
        let next = base.merge(Measurement::Battery(50), at(10) - Duration::seconds(5));
        assert_eq!(next.captured_at, at(10));

        let later = next.merge(Measurement::Battery(51), at(11));
        assert_eq!(later.captured_at, at(11));
    }

    #[test]
    fn test_derived_units() {
        let reading = Reading {
            pressure_psi: 14.5038,
            temperature_celsius: 100.0,
            battery_percent: 100,
            captured_at: at(0),
        };
        assert!((reading.pressure_bar() - 1.0).abs() < 1e-6);
        assert_eq!(reading.temperature_fahrenheit(), 212.0);
        assert_eq!(Reading::empty(at(0)).temperature_fahrenheit(), 32.0);
    }

    #[test]
    fn test_display() {
        let reading = Reading {
            pressure_psi: 1.0,
            temperature_celsius: 20.0,
            battery_percent: 90,
            captured_at: at(0),
        };
        let text = reading.to_string();
        assert!(text.starts_with("1.00 psi, 20.0°C, 90% @ "), "{}", text);
    }
}
