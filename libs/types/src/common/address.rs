//! 32-byte on-chain public key

use super::errors::AddressError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Chain slot, used purely as an ordering token for account state
pub type Slot = u64;

/// On-chain account address (ed25519 public key)
///
/// Displays and parses as base58, which is how every RPC endpoint and
/// persisted key in the system spells it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

impl Address {
    /// All-zero address, used as a placeholder for "no delegate"
    pub const ZERO: Address = Address([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deterministic address for tests and simulated data
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&seed.to_le_bytes());
        bytes[31] = 1;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Abbreviated form for log lines, e.g. `7xKX…9fQa`
    pub fn short(&self) -> String {
        let full = self.to_string();
        if full.len() <= 8 {
            return full;
        }
        format!("{}…{}", &full[..4], &full[full.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::InvalidBase58 {
                input: s.to_string(),
                reason: e.to_string(),
            })?;
        let bytes: [u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidLength { len: decoded.len() })?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base58_roundtrip_through_display() {
        let address = Address::from_seed(42);
        let parsed: Address = address.to_string().parse().unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let short = bs58::encode([1u8; 10]).into_string();
        assert_eq!(
            short.parse::<Address>(),
            Err(AddressError::InvalidLength { len: 10 })
        );
    }

    #[test]
    fn test_rejects_non_base58() {
        assert!(matches!(
            "0OIl".parse::<Address>(),
            Err(AddressError::InvalidBase58 { .. })
        ));
    }

    #[test]
    fn test_serde_uses_base58_string() {
        let address = Address::from_seed(7);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", address));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::from_seed(0).is_zero());
    }
}
