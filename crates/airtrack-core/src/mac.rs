//! MAC address key type.
//!
//! Treated as an opaque, totally ordered identity: the tree only needs
//! equality, ordering, and a stable text form for export.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Wrap raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Error parsing a MAC address from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address `{0}`")]
pub struct ParseMacError(String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for slot in &mut octets {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_upper_hex_colon_separated() {
        let mac = MacAddr::new([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
        assert_eq!(mac.to_string(), "00:1A:2B:3C:4D:5E");
    }

    #[test]
    fn parse_accepts_colons_and_dashes() {
        let a: MacAddr = "00:1a:2b:3c:4d:5e".parse().unwrap();
        let b: MacAddr = "00-1A-2B-3C-4D-5E".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.octets(), [0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("00:1a:2b:3c:4d".parse::<MacAddr>().is_err());
        assert!("00:1a:2b:3c:4d:5e:6f".parse::<MacAddr>().is_err());
        assert!("zz:1a:2b:3c:4d:5e".parse::<MacAddr>().is_err());
        assert!("001a2b3c4d5e".parse::<MacAddr>().is_err());
    }

    #[test]
    fn ordering_is_lexicographic_by_octet() {
        let lo = MacAddr::new([0, 0, 0, 0, 0, 1]);
        let hi = MacAddr::new([0, 0, 0, 0, 1, 0]);
        assert!(lo < hi);
    }

    #[test]
    fn serde_as_string() {
        let mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
