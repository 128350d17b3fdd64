//! # Mango Snapshot Types
//!
//! Data model for the client-side view of a Mango group and account.
//!
//! ## Design Philosophy
//!
//! - **Immutable Snapshots**: every value here is a point-in-time copy of
//!   on-chain state, replaced wholesale rather than patched
//! - **No Precision Loss**: native token amounts are `rust_decimal::Decimal`
//! - **Derived Values Stay Derived**: [`SpotBalances`] is computed from the
//!   other snapshots and never stored on-chain
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{Address, MangoAccount};
//!
//! let owner = Address::from_seed(1);
//! let account = MangoAccount::new(Address::from_seed(2), owner, 0, "main");
//! assert!(account.is_owner_or_delegate(&owner));
//! ```

pub mod account;
pub mod balances;
pub mod common;
pub mod group;
pub mod history;
pub mod orders;

pub use account::{MangoAccount, PerpPosition, Serum3Orders, TokenPosition, FREE_INDEX};
pub use balances::{SpotBalance, SpotBalances};
pub use common::address::{Address, Slot};
pub use common::errors::{AddressError, SnapshotError};
pub use group::{Bank, Group, PerpMarket, Serum3Market};
pub use history::{ActivityEntry, Fill, Side, TradeHistoryEntry};
pub use orders::{OpenOrders, OpenOrdersSnapshot};
