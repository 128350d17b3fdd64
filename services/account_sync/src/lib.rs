//! Mango Account Synchronization
//!
//! Keeps a client-side view of one Mango group and the selected account in
//! step with the chain. Slow polling and push subscriptions both feed a
//! single reactive [`Store`]; a slot check decides which snapshot wins.
//!
//! ## Layout
//!
//! - [`store`] / [`state`]: copy-on-write container and the state it holds
//! - [`actions`]: [`MangoStore`], every operation that writes the store
//! - [`hydrator`]: interval loops and the selected-account push listener
//! - [`derived_balances`]: spot balances recomputed inside each commit
//! - [`connection`]: subscription handle with its keep-alive
//! - [`ws_transport`] / [`sim`]: websocket and in-memory transports

pub mod actions;
pub mod client;
pub mod connection;
pub mod data_api;
pub mod derived_balances;
pub mod error;
pub mod hydrator;
pub mod notify;
pub mod persist;
pub mod retry;
pub mod sim;
pub mod state;
pub mod store;
pub mod ws_transport;

pub use actions::{ApplyOutcome, MangoStore};
pub use client::{ClientError, DataApi, ProgramClient, TransactionRequest};
pub use connection::{AccountUpdate, ConnectionHandle, PubSubTransport};
pub use error::{Result, SyncError};
pub use hydrator::Hydrator;
pub use notify::{Notification, NotificationKind, Notifier};
pub use persist::{JsonFileStore, LocalStore, MemoryStore};
pub use retry::RetryPolicy;
pub use state::{AppState, MangoAccountState};
pub use store::{Derivation, Selected, Store};
pub use ws_transport::WsPubSub;

/// Re-export configuration
pub use sync_config::SyncConfig;
