//! Decoded Mango account snapshot
//!
//! A [`MangoAccount`] is the last known state of one on-chain account as
//! returned by the program client. Snapshots are replaced wholesale on every
//! reload or push update and are never mutated in place once published.

use crate::common::address::{Address, Slot};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Marker index for an unused position slot
pub const FREE_INDEX: u16 = u16::MAX;

/// Token deposit (positive) or borrow (negative) in native units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub token_index: u16,
    pub balance: Decimal,
}

impl TokenPosition {
    pub fn is_active(&self) -> bool {
        self.token_index != FREE_INDEX
    }
}

/// Spot-order position: links the account to an open-orders account on a market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Serum3Orders {
    pub market_index: u16,
    pub base_token_index: u16,
    pub quote_token_index: u16,
    pub open_orders: Address,
}

impl Serum3Orders {
    pub fn is_active(&self) -> bool {
        self.market_index != FREE_INDEX
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpPosition {
    pub market_index: u16,
    pub base_position_lots: i64,
    pub quote_position_native: Decimal,
    pub bids_base_lots: i64,
    pub asks_base_lots: i64,
}

impl PerpPosition {
    pub fn is_active(&self) -> bool {
        self.market_index != FREE_INDEX
    }

    pub fn has_open_orders(&self) -> bool {
        self.bids_base_lots != 0 || self.asks_base_lots != 0
    }
}

/// Point-in-time copy of one on-chain Mango account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangoAccount {
    pub address: Address,
    pub owner: Address,
    /// [`Address::ZERO`] when no delegate is set
    pub delegate: Address,
    pub name: String,
    pub account_num: u32,
    pub tokens: Vec<TokenPosition>,
    pub serum3: Vec<Serum3Orders>,
    pub perps: Vec<PerpPosition>,
    /// Slot at which these bytes were read from the chain
    pub slot: Slot,
}

impl MangoAccount {
    /// Empty account at `address`, used by account creation and tests
    pub fn new(
        address: Address,
        owner: Address,
        account_num: u32,
        name: impl Into<String>,
    ) -> Self {
        Self {
            address,
            owner,
            delegate: Address::ZERO,
            name: name.into(),
            account_num,
            tokens: Vec::new(),
            serum3: Vec::new(),
            perps: Vec::new(),
            slot: 0,
        }
    }

    pub fn active_token_positions(&self) -> impl Iterator<Item = &TokenPosition> {
        self.tokens.iter().filter(|t| t.is_active())
    }

    pub fn active_serum3_orders(&self) -> impl Iterator<Item = &Serum3Orders> {
        self.serum3.iter().filter(|s| s.is_active())
    }

    pub fn active_perp_positions(&self) -> impl Iterator<Item = &PerpPosition> {
        self.perps.iter().filter(|p| p.is_active())
    }

    pub fn token_position(&self, token_index: u16) -> Option<&TokenPosition> {
        self.active_token_positions()
            .find(|t| t.token_index == token_index)
    }

    /// Native token balance, zero when the account holds no position
    pub fn token_balance(&self, token_index: u16) -> Decimal {
        self.token_position(token_index)
            .map(|t| t.balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn is_delegate(&self, wallet: &Address) -> bool {
        !self.delegate.is_zero() && &self.delegate == wallet
    }

    pub fn is_owner_or_delegate(&self, wallet: &Address) -> bool {
        &self.owner == wallet || self.is_delegate(wallet)
    }
}
