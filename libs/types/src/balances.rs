//! Per-mint balances derived from the account and its open orders

use crate::common::address::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpotBalance {
    /// Locked in resting spot orders
    pub in_orders: Decimal,
    /// Filled but not yet settled back to the account
    pub unsettled: Decimal,
}

impl SpotBalance {
    pub fn is_zero(&self) -> bool {
        self.in_orders.is_zero() && self.unsettled.is_zero()
    }
}

/// Derived balances keyed by mint
pub type SpotBalances = BTreeMap<Address, SpotBalance>;
