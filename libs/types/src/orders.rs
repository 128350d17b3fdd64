//! Open-orders accounts on external spot order books

use crate::common::address::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decoded open-orders account for one spot market, amounts in native units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrders {
    pub address: Address,
    /// Order book market this account trades on
    pub market: Address,
    pub base_token_free: Decimal,
    pub base_token_total: Decimal,
    pub quote_token_free: Decimal,
    pub quote_token_total: Decimal,
    pub referrer_rebates_accrued: Decimal,
}

impl OpenOrders {
    /// Base tokens locked in resting orders
    pub fn base_in_orders(&self) -> Decimal {
        self.base_token_total - self.base_token_free
    }

    /// Quote tokens locked in resting orders
    pub fn quote_in_orders(&self) -> Decimal {
        self.quote_token_total - self.quote_token_free
    }

    /// Quote tokens claimable by settling, including referrer rebates
    pub fn quote_unsettled(&self) -> Decimal {
        self.quote_token_free + self.referrer_rebates_accrued
    }
}

/// Open-orders accounts for the current account, keyed by market address
pub type OpenOrdersSnapshot = BTreeMap<Address, OpenOrders>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_in_orders_and_unsettled() {
        let oo = OpenOrders {
            address: Address::from_seed(1),
            market: Address::from_seed(2),
            base_token_free: dec!(2),
            base_token_total: dec!(5),
            quote_token_free: dec!(10),
            quote_token_total: dec!(40),
            referrer_rebates_accrued: dec!(0.25),
        };
        assert_eq!(oo.base_in_orders(), dec!(3));
        assert_eq!(oo.quote_in_orders(), dec!(30));
        assert_eq!(oo.quote_unsettled(), dec!(10.25));
    }
}
