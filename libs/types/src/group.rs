//! Group reference data: banks and markets shared by every account

use crate::common::address::{Address, Slot};
use crate::common::errors::SnapshotError;
use serde::{Deserialize, Serialize};

/// Token bank registered in the group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub token_index: u16,
    pub mint: Address,
    pub name: String,
    pub mint_decimals: u8,
}

/// Spot market routed through an external serum/openbook order book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Serum3Market {
    pub market_index: u16,
    pub name: String,
    pub base_token_index: u16,
    pub quote_token_index: u16,
    /// Order book market address; open-orders snapshots are keyed by it
    pub external_market: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpMarket {
    pub market_index: u16,
    pub name: String,
    pub settle_token_index: u16,
}

/// Point-in-time copy of the group account and its markets
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Group {
    pub address: Address,
    pub banks: Vec<Bank>,
    pub serum3_markets: Vec<Serum3Market>,
    pub perp_markets: Vec<PerpMarket>,
    pub slot: Slot,
}

impl Group {
    pub fn bank(&self, token_index: u16) -> Option<&Bank> {
        self.banks.iter().find(|b| b.token_index == token_index)
    }

    pub fn bank_by_name(&self, name: &str) -> Option<&Bank> {
        self.banks.iter().find(|b| b.name == name)
    }

    pub fn bank_by_mint(&self, mint: &Address) -> Option<&Bank> {
        self.banks.iter().find(|b| &b.mint == mint)
    }

    /// Mint for a token index, or an error if the bank is unknown
    pub fn mint_for(&self, token_index: u16) -> Result<Address, SnapshotError> {
        self.bank(token_index)
            .map(|b| b.mint)
            .ok_or(SnapshotError::UnknownToken { token_index })
    }

    pub fn serum3_market(&self, market_index: u16) -> Option<&Serum3Market> {
        self.serum3_markets
            .iter()
            .find(|m| m.market_index == market_index)
    }

    pub fn serum3_market_by_name(&self, name: &str) -> Option<&Serum3Market> {
        self.serum3_markets.iter().find(|m| m.name == name)
    }

    pub fn serum3_market_by_key(&self, key: &Address) -> Option<&Serum3Market> {
        self.serum3_markets
            .iter()
            .find(|m| &m.external_market == key)
    }

    pub fn perp_market(&self, market_index: u16) -> Option<&PerpMarket> {
        self.perp_markets
            .iter()
            .find(|m| m.market_index == market_index)
    }

    pub fn perp_market_by_name(&self, name: &str) -> Option<&PerpMarket> {
        self.perp_markets.iter().find(|m| m.name == name)
    }

    /// True if any spot or perp market carries this name
    pub fn has_market(&self, name: &str) -> bool {
        self.serum3_market_by_name(name).is_some() || self.perp_market_by_name(name).is_some()
    }

    /// First listed market name, spot markets before perp markets
    pub fn first_market_name(&self) -> Option<&str> {
        self.serum3_markets
            .first()
            .map(|m| m.name.as_str())
            .or_else(|| self.perp_markets.first().map(|m| m.name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Group {
        Group {
            address: Address::from_seed(1),
            banks: vec![
                Bank {
                    token_index: 0,
                    mint: Address::from_seed(100),
                    name: "USDC".into(),
                    mint_decimals: 6,
                },
                Bank {
                    token_index: 4,
                    mint: Address::from_seed(104),
                    name: "SOL".into(),
                    mint_decimals: 9,
                },
            ],
            serum3_markets: vec![Serum3Market {
                market_index: 2,
                name: "SOL/USDC".into(),
                base_token_index: 4,
                quote_token_index: 0,
                external_market: Address::from_seed(200),
            }],
            perp_markets: vec![PerpMarket {
                market_index: 0,
                name: "SOL-PERP".into(),
                settle_token_index: 0,
            }],
            slot: 10,
        }
    }

    #[test]
    fn test_lookups() {
        let g = group();
        assert_eq!(g.bank(4).unwrap().name, "SOL");
        assert_eq!(g.bank_by_mint(&Address::from_seed(100)).unwrap().token_index, 0);
        assert_eq!(g.serum3_market_by_key(&Address::from_seed(200)).unwrap().market_index, 2);
        assert!(g.has_market("SOL-PERP"));
        assert!(!g.has_market("BTC-PERP"));
    }

    #[test]
    fn test_mint_for_unknown_token() {
        assert_eq!(
            group().mint_for(9),
            Err(SnapshotError::UnknownToken { token_index: 9 })
        );
    }

    #[test]
    fn test_first_market_prefers_spot() {
        let mut g = group();
        assert_eq!(g.first_market_name(), Some("SOL/USDC"));
        g.serum3_markets.clear();
        assert_eq!(g.first_market_name(), Some("SOL-PERP"));
        g.perp_markets.clear();
        assert_eq!(g.first_market_name(), None);
    }
}
