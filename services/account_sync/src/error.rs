//! Error types for the synchronization layer

use crate::client::ClientError;
use thiserror::Error;

/// Result type alias for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for store actions, transports and the hydrator
#[derive(Debug, Error)]
pub enum SyncError {
    /// Precondition errors
    /// An action needing a selected account ran with none selected
    #[error("No mango account selected")]
    NoAccountSelected,

    /// An action needing group data ran before the first group load
    #[error("Group has not been loaded")]
    NoGroupLoaded,

    /// An action needing a connected wallet ran without one
    #[error("No wallet connected")]
    NoWallet,

    /// Remote errors
    /// Program client (RPC + account decoding) failure
    #[error("Program client error: {0}")]
    Client(#[from] ClientError),

    /// Push-update transport failure
    #[error("Transport error: {reason}")]
    Transport {
        /// What went wrong on the subscription channel
        reason: String,
    },

    /// Websocket failure on the subscription channel
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Data API (REST) failure
    #[error("Data API error: {0}")]
    Api(#[from] reqwest::Error),

    /// JSON error from a remote payload or the persisted store
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error reading or writing the persisted store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recovery errors
    #[error("{action} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Action that was retried
        action: &'static str,
        /// Attempts made, first try included
        attempts: u32,
        /// Error from the final attempt
        last: Box<SyncError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Check if this error is transient and worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Client(e) => e.is_transient(),
            SyncError::Transport { .. }
            | SyncError::WebSocket(_)
            | SyncError::Api(_)
            | SyncError::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this error is a missing precondition rather than a remote failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SyncError::NoAccountSelected | SyncError::NoGroupLoaded | SyncError::NoWallet
        )
    }

    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        SyncError::Transport {
            reason: reason.into(),
        }
    }
}
