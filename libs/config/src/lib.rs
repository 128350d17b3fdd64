//! # Sync Configuration
//!
//! Centralized configuration and defaults for the Mango account
//! synchronization layer.
//!
//! ## Features
//!
//! - **Service Defaults**: polling cadences, retry budget, persisted keys
//! - **Settings Loading**: TOML file, environment overlay, `MANGO_SYNC_*` variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sync_config::{load_config, service};
//!
//! let config = load_config(None, None).unwrap();
//! assert_eq!(service::sync::LAST_ACCOUNT_KEY, "mangoAccount-0.4");
//! println!("group refresh every {:?}", config.intervals.group());
//! ```

pub mod service;
pub mod settings;

// Re-export commonly used types
pub use settings::{load_config, IntervalConfig, RetryConfig, SelectionDefaults, SyncConfig};
