//! Error types for address parsing and snapshot validation

use thiserror::Error;

/// Errors that can occur while parsing or validating an on-chain address
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AddressError {
    /// Input was not valid base58
    #[error("Invalid base58 address '{input}': {reason}")]
    InvalidBase58 { input: String, reason: String },

    /// Decoded bytes had the wrong length
    #[error("Address must be 32 bytes, got {len}")]
    InvalidLength { len: usize },
}

/// Errors raised when a snapshot refers to data the group does not know about
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SnapshotError {
    /// Token index not present in the group's banks
    #[error("Unknown token index {token_index}")]
    UnknownToken { token_index: u16 },

    /// Serum3 market index not present in the group
    #[error("Unknown serum3 market index {market_index}")]
    UnknownSerum3Market { market_index: u16 },

    /// Perp market index not present in the group
    #[error("Unknown perp market index {market_index}")]
    UnknownPerpMarket { market_index: u16 },
}
