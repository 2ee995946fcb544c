//! Unit conversions for decoded sensor values.

/// Pounds per square inch in one bar.
pub const PSI_PER_BAR: f32 = 14.5038;

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use m5600_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert Fahrenheit to Celsius.
#[inline]
pub fn fahrenheit_to_celsius(fahrenheit: f32) -> f32 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Convert a pressure in PSI to bar.
///
/// # Example
///
/// ```
/// use m5600_ble::psi_to_bar;
///
/// let bar = psi_to_bar(14.5038);
/// assert!((bar - 1.0).abs() < 0.0001);
/// ```
#[inline]
pub fn psi_to_bar(psi: f32) -> f32 {
    psi / PSI_PER_BAR
}

/// Convert a pressure in bar to PSI.
#[inline]
pub fn bar_to_psi(bar: f32) -> f32 {
    bar * PSI_PER_BAR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
        assert!((celsius_to_fahrenheit(37.0) - 98.6).abs() < 0.001);
    }

    #[test]
    fn test_fahrenheit_to_celsius() {
        assert!((fahrenheit_to_celsius(32.0) - 0.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_psi_to_bar() {
        assert!((psi_to_bar(14.5038) - 1.0).abs() < 1e-6);
        assert_eq!(psi_to_bar(0.0), 0.0);
        assert!((psi_to_bar(29.0076) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_pressure_roundtrip() {
        let original = 32.5;
        let converted = bar_to_psi(psi_to_bar(original));
        assert!((converted - original).abs() < 0.0001);
    }
}
