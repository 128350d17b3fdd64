//! Market fills and per-account history records

use crate::common::address::{Address, Slot};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Recent fill on a market's event queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub market: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub slot: Slot,
    pub timestamp: DateTime<Utc>,
}

/// One row of the account's trade history, as served by the data API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeHistoryEntry {
    pub signature: String,
    pub market: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    pub block_datetime: DateTime<Utc>,
}

/// Activity feed row (deposits, withdrawals, swaps, liquidations)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub activity_type: String,
    pub signature: String,
    pub block_datetime: DateTime<Utc>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub mango_account: Option<Address>,
}
