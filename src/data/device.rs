//! Device identity.
//!
//! A sensor is identified solely by its Bluetooth address; its advertised
//! name and signal strength are annotations that change over time.

use btleplug::api::BDAddr;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Error, Result};

/// A validated Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(BDAddr);

impl DeviceAddress {
    /// Parse an address such as `"AA:BB:CC:DD:EE:FF"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressInvalid`] if the string is not a
    /// syntactically valid Bluetooth address.
    pub fn parse(address: &str) -> Result<Self> {
        BDAddr::from_str(address.trim())
            .map(Self)
            .map_err(|_| Error::AddressInvalid {
                address: address.to_string(),
            })
    }

    /// The underlying btleplug address.
    pub fn bd_addr(&self) -> BDAddr {
        self.0
    }
}

impl From<BDAddr> for DeviceAddress {
    fn from(addr: BDAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for DeviceAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for DeviceAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A sensor known to the session.
///
/// Two identities are equal iff their addresses are equal.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity {
    name: Option<String>,
    address: DeviceAddress,
    signal_strength: i16,
    connected: bool,
}

impl DeviceIdentity {
    /// Create a new, disconnected identity.
    pub fn new(name: Option<String>, address: DeviceAddress, signal_strength: i16) -> Self {
        Self {
            name,
            address,
            signal_strength,
            connected: false,
        }
    }

    /// Advertised name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The identity key.
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Last known signal strength in dBm.
    pub fn signal_strength(&self) -> i16 {
        self.signal_strength
    }

    /// Whether the session currently holds a link to this device.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Refresh the advertised annotations.
    ///
    /// A `None` name leaves the previous name in place, since not every
    /// advertisement carries one.
    pub fn update_advertisement(&mut self, name: Option<String>, signal_strength: i16) {
        if name.is_some() {
            self.name = name;
        }
        self.signal_strength = signal_strength;
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_address() {
        let addr = DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(addr.bd_addr().into_inner(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr, "aa:bb:cc:dd:ee:ff".parse().unwrap());
    }

    #[test]
    fn test_parse_invalid_address() {
        for bad in ["bad-address", "", "AA:BB:CC:DD:EE", "GG:BB:CC:DD:EE:FF"] {
            match DeviceAddress::parse(bad) {
                Err(Error::AddressInvalid { address }) => assert_eq!(address, bad),
                other => panic!("expected AddressInvalid for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_identity_equality_by_address() {
        let addr = DeviceAddress::parse("01:02:03:04:05:06").unwrap();
        let a = DeviceIdentity::new(Some("M5600".to_string()), addr, -40);
        let mut b = DeviceIdentity::new(None, addr, -90);
        b.set_connected(true);
        assert_eq!(a, b);

        let other = DeviceIdentity::new(
            Some("M5600".to_string()),
            DeviceAddress::parse("01:02:03:04:05:07").unwrap(),
            -40,
        );
        assert_ne!(a, other);

        let set: HashSet<_> = [a, b, other].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_update_advertisement() {
        let addr = DeviceAddress::parse("01:02:03:04:05:06").unwrap();
        let mut device = DeviceIdentity::new(Some("M5600".to_string()), addr, -70);

        device.update_advertisement(None, -55);
        assert_eq!(device.name(), Some("M5600"));
        assert_eq!(device.signal_strength(), -55);

        device.update_advertisement(Some("M5600-2".to_string()), -60);
        assert_eq!(device.name(), Some("M5600-2"));
        assert!(!device.is_connected());
    }
}
