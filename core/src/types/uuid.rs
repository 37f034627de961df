//! 128-bit identifiers for players and universes.

use crate::error::{Error, Result};
use crate::types::random::secure_random_bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const UUID_SIZE: usize = 16;

/// An opaque 128-bit id, printed as 32 hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Uuid([u8; UUID_SIZE]);

impl Uuid {
    /// A fresh random id.
    pub fn new() -> Self {
        let bytes = secure_random_bytes(UUID_SIZE);
        let mut data = [0u8; UUID_SIZE];
        data.copy_from_slice(&bytes);
        Uuid(data)
    }

    pub fn nil() -> Self {
        Uuid([0; UUID_SIZE])
    }

    pub fn is_nil(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn from_bytes(bytes: [u8; UUID_SIZE]) -> Self {
        Uuid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; UUID_SIZE] {
        &self.0
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != UUID_SIZE * 2 {
            return Err(Error::parse(format!(
                "uuid hex must be {} characters, got {}",
                UUID_SIZE * 2,
                hex.len()
            )));
        }
        let mut data = [0u8; UUID_SIZE];
        for (i, slot) in data.iter_mut().enumerate() {
            let pair = &hex[i * 2..i * 2 + 2];
            *slot = u8::from_str_radix(pair, 16)
                .map_err(|_| Error::parse(format!("invalid uuid hex digit pair '{pair}'")))?;
        }
        Ok(Uuid(data))
    }

    pub fn hex(&self) -> String {
        let mut out = String::with_capacity(UUID_SIZE * 2);
        for byte in &self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({})", self.hex())
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl Serialize for Uuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for Uuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Uuid::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = Uuid::new();
        let back = Uuid::from_hex(&id.hex()).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(Uuid::from_hex("abc").is_err());
        assert!(Uuid::from_hex(&"zz".repeat(16)).is_err());
    }

    #[test]
    fn fresh_ids_are_distinct() {
        assert_ne!(Uuid::new(), Uuid::new());
        assert!(Uuid::nil().is_nil());
        assert!(!Uuid::new().is_nil());
    }

    #[test]
    fn serde_uses_hex_string() {
        let id = Uuid::from_hex(&"ab".repeat(16)).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(16)));
        let back: Uuid = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
