//! Application state held by the store

use chrono::{DateTime, Utc};
use std::sync::Arc;
use types::{
    ActivityEntry, Address, Fill, Group, MangoAccount, OpenOrdersSnapshot, Slot, SpotBalances,
    TradeHistoryEntry,
};

/// Everything the presentation layer reads
///
/// Large fields sit behind `Arc` so cloning the state for a copy-on-write
/// commit only bumps reference counts.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub group: Option<Arc<Group>>,
    pub mango_account: MangoAccountState,
    /// Every account owned by (or delegated to) the connected wallet
    pub mango_accounts: Arc<Vec<Arc<MangoAccount>>>,
    pub wallet: Option<Address>,
    pub selected_market: Option<String>,
    pub selected_bank: Option<String>,
    pub market_fills: Arc<Vec<Fill>>,
}

/// The currently selected account and everything derived from it
#[derive(Debug, Clone)]
pub struct MangoAccountState {
    pub current: Option<Arc<MangoAccount>>,
    /// True until the first account discovery or reload attempt finishes
    pub initial_load: bool,
    /// Highest slot applied for `current`; updates at or below it are stale
    pub last_seen_slot: Slot,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub open_orders: Arc<OpenOrdersSnapshot>,
    pub spot_balances: Arc<SpotBalances>,
    pub trade_history: Arc<Vec<TradeHistoryEntry>>,
    pub activity_feed: Arc<Vec<ActivityEntry>>,
}

impl Default for MangoAccountState {
    fn default() -> Self {
        Self {
            current: None,
            initial_load: true,
            last_seen_slot: 0,
            last_updated_at: None,
            open_orders: Arc::default(),
            spot_balances: Arc::default(),
            trade_history: Arc::default(),
            activity_feed: Arc::default(),
        }
    }
}

impl MangoAccountState {
    /// Install `account` as current and move the staleness marker to its slot
    pub(crate) fn replace_current(&mut self, account: Arc<MangoAccount>) {
        self.last_seen_slot = account.slot;
        self.last_updated_at = Some(Utc::now());
        self.current = Some(account);
    }

    /// Drop the current account and everything hydrated for it
    pub(crate) fn clear(&mut self) {
        *self = Self {
            initial_load: false,
            ..Self::default()
        };
    }

    /// Forget per-account history, used when switching accounts
    pub(crate) fn clear_hydrated(&mut self) {
        self.open_orders = Arc::default();
        self.trade_history = Arc::default();
        self.activity_feed = Arc::default();
    }
}

impl AppState {
    pub fn current_account(&self) -> Option<&Arc<MangoAccount>> {
        self.mango_account.current.as_ref()
    }

    pub fn current_address(&self) -> Option<Address> {
        self.mango_account.current.as_ref().map(|a| a.address)
    }

    pub fn is_selected(&self, address: &Address) -> bool {
        self.current_address().as_ref() == Some(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_initial_load() {
        let state = AppState::default();
        assert!(state.mango_account.initial_load);
        assert_eq!(state.mango_account.last_seen_slot, 0);
        assert!(state.current_address().is_none());
    }

    #[test]
    fn test_replace_current_moves_slot_marker() {
        let mut state = AppState::default();
        let mut account = MangoAccount::new(Address::from_seed(2), Address::from_seed(1), 0, "a");
        account.slot = 77;
        state.mango_account.replace_current(Arc::new(account));

        assert_eq!(state.mango_account.last_seen_slot, 77);
        assert!(state.mango_account.last_updated_at.is_some());
        assert!(state.is_selected(&Address::from_seed(2)));
    }

    #[test]
    fn test_clear_resets_everything_but_initial_load() {
        let mut state = AppState::default();
        let account = MangoAccount::new(Address::from_seed(2), Address::from_seed(1), 0, "a");
        state.mango_account.replace_current(Arc::new(account));
        state.mango_account.clear();

        assert!(state.mango_account.current.is_none());
        assert_eq!(state.mango_account.last_seen_slot, 0);
        assert!(!state.mango_account.initial_load);
    }
}
