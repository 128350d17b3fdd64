//! Per-mint "in orders" and "unsettled" balances
//!
//! Recomputed from scratch whenever the current account, the group or the
//! open-orders snapshot is replaced. The output always replaces the whole
//! map; nothing is patched incrementally.

use crate::state::AppState;
use crate::store::Derivation;
use std::sync::Arc;
use types::{Group, MangoAccount, OpenOrdersSnapshot, SpotBalance, SpotBalances};

/// Compute spot balances for every active spot-order position
///
/// Missing inputs yield an empty map. A market absent from the group, or
/// whose open-orders account has not been hydrated yet, contributes zero to
/// both of its mints.
pub fn compute_spot_balances(
    account: Option<&MangoAccount>,
    group: Option<&Group>,
    open_orders: Option<&OpenOrdersSnapshot>,
) -> SpotBalances {
    let mut balances = SpotBalances::new();

    let (Some(account), Some(group), Some(open_orders)) = (account, group, open_orders) else {
        return balances;
    };

    for position in account.active_serum3_orders() {
        let Some(market) = group.serum3_market(position.market_index) else {
            continue;
        };
        let (Ok(base_mint), Ok(quote_mint)) = (
            group.mint_for(market.base_token_index),
            group.mint_for(market.quote_token_index),
        ) else {
            continue;
        };

        // Unhydrated markets still get zero entries so readers see every active mint
        let (base, quote) = match open_orders.get(&market.external_market) {
            Some(oo) => (
                SpotBalance {
                    in_orders: oo.base_in_orders(),
                    unsettled: oo.base_token_free,
                },
                SpotBalance {
                    in_orders: oo.quote_in_orders(),
                    unsettled: oo.quote_unsettled(),
                },
            ),
            None => (SpotBalance::default(), SpotBalance::default()),
        };

        accumulate(&mut balances, base_mint, base);
        accumulate(&mut balances, quote_mint, quote);
    }

    balances
}

fn accumulate(balances: &mut SpotBalances, mint: types::Address, delta: SpotBalance) {
    let entry = balances.entry(mint).or_default();
    entry.in_orders += delta.in_orders;
    entry.unsettled += delta.unsettled;
}

/// Keeps `mango_account.spot_balances` in step with its three inputs
#[derive(Debug, Default)]
pub struct SpotBalancesDerivation;

impl Derivation<AppState> for SpotBalancesDerivation {
    fn name(&self) -> &'static str {
        "spot_balances"
    }

    fn inputs_changed(&self, prev: &AppState, next: &AppState) -> bool {
        !same_arc(&prev.mango_account.current, &next.mango_account.current)
            || !same_arc(&prev.group, &next.group)
            || !Arc::ptr_eq(&prev.mango_account.open_orders, &next.mango_account.open_orders)
    }

    fn derive(&self, state: &mut AppState) {
        let balances = compute_spot_balances(
            state.mango_account.current.as_deref(),
            state.group.as_deref(),
            Some(&state.mango_account.open_orders),
        );
        state.mango_account.spot_balances = Arc::new(balances);
    }
}

fn same_arc<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use types::{Address, Bank, OpenOrders, Serum3Market, Serum3Orders};

    const USDC: u16 = 0;
    const SOL: u16 = 1;
    const BTC: u16 = 2;

    fn mint(token_index: u16) -> Address {
        Address::from_seed(100 + token_index as u64)
    }

    fn market_key(market_index: u16) -> Address {
        Address::from_seed(200 + market_index as u64)
    }

    fn group() -> Group {
        let bank = |token_index: u16, name: &str| Bank {
            token_index,
            mint: mint(token_index),
            name: name.into(),
            mint_decimals: 6,
        };
        let market = |market_index: u16, name: &str, base: u16| Serum3Market {
            market_index,
            name: name.into(),
            base_token_index: base,
            quote_token_index: USDC,
            external_market: market_key(market_index),
        };
        Group {
            address: Address::from_seed(1),
            banks: vec![bank(USDC, "USDC"), bank(SOL, "SOL"), bank(BTC, "BTC")],
            serum3_markets: vec![market(0, "SOL/USDC", SOL), market(1, "BTC/USDC", BTC)],
            perp_markets: vec![],
            slot: 1,
        }
    }

    fn account(markets: &[(u16, u16)]) -> MangoAccount {
        let mut account =
            MangoAccount::new(Address::from_seed(10), Address::from_seed(2), 0, "main");
        account.serum3 = markets
            .iter()
            .map(|&(market_index, base_token_index)| Serum3Orders {
                market_index,
                base_token_index,
                quote_token_index: USDC,
                open_orders: Address::from_seed(300 + market_index as u64),
            })
            .collect();
        account
    }

    fn open_orders(market_index: u16) -> OpenOrders {
        OpenOrders {
            address: Address::from_seed(300 + market_index as u64),
            market: market_key(market_index),
            base_token_free: dec!(1.5),
            base_token_total: dec!(4),
            quote_token_free: dec!(20),
            quote_token_total: dec!(120),
            referrer_rebates_accrued: dec!(0.5),
        }
    }

    #[test]
    fn test_missing_inputs_give_empty_map() {
        let g = group();
        let a = account(&[(0, SOL)]);
        let oo = OpenOrdersSnapshot::new();

        assert!(compute_spot_balances(None, Some(&g), Some(&oo)).is_empty());
        assert!(compute_spot_balances(Some(&a), None, Some(&oo)).is_empty());
        assert!(compute_spot_balances(Some(&a), Some(&g), None).is_empty());
    }

    #[test]
    fn test_hydrated_market_balances() {
        let g = group();
        let a = account(&[(0, SOL)]);
        let oo = OpenOrdersSnapshot::from([(market_key(0), open_orders(0))]);

        let balances = compute_spot_balances(Some(&a), Some(&g), Some(&oo));

        assert_eq!(
            balances[&mint(SOL)],
            SpotBalance {
                in_orders: dec!(2.5),
                unsettled: dec!(1.5)
            }
        );
        assert_eq!(
            balances[&mint(USDC)],
            SpotBalance {
                in_orders: dec!(100),
                unsettled: dec!(20.5)
            }
        );
    }

    #[test]
    fn test_unhydrated_market_contributes_exactly_zero() {
        let g = group();
        let a = account(&[(0, SOL), (1, BTC)]);
        // Only SOL/USDC is hydrated
        let oo = OpenOrdersSnapshot::from([(market_key(0), open_orders(0))]);

        let balances = compute_spot_balances(Some(&a), Some(&g), Some(&oo));

        assert_eq!(balances[&mint(BTC)], SpotBalance::default());
        assert!(balances[&mint(BTC)].is_zero());
        // Shared quote mint only carries the hydrated market's amounts
        assert_eq!(balances[&mint(USDC)].in_orders, dec!(100));
        assert_eq!(balances[&mint(USDC)].unsettled, dec!(20.5));
    }

    #[test]
    fn test_quote_mint_accumulates_across_markets() {
        let g = group();
        let a = account(&[(0, SOL), (1, BTC)]);
        let oo = OpenOrdersSnapshot::from([
            (market_key(0), open_orders(0)),
            (market_key(1), open_orders(1)),
        ]);

        let balances = compute_spot_balances(Some(&a), Some(&g), Some(&oo));
        assert_eq!(balances[&mint(USDC)].in_orders, dec!(200));
        assert_eq!(balances[&mint(USDC)].unsettled, dec!(41));
    }

    #[test]
    fn test_unknown_market_is_skipped() {
        let g = group();
        let a = account(&[(9, SOL)]);
        let balances = compute_spot_balances(Some(&a), Some(&g), Some(&OpenOrdersSnapshot::new()));
        assert!(balances.is_empty());
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let g = group();
        let a = account(&[(0, SOL), (1, BTC)]);
        let oo = OpenOrdersSnapshot::from([(market_key(1), open_orders(1))]);

        let first = compute_spot_balances(Some(&a), Some(&g), Some(&oo));
        let second = compute_spot_balances(Some(&a), Some(&g), Some(&oo));
        assert_eq!(first, second);
        assert_ne!(first[&mint(USDC)].in_orders, Decimal::ZERO);
    }

    proptest::proptest! {
        #[test]
        fn prop_same_inputs_same_map(
            base_free in 0i64..1_000_000,
            base_locked in 0i64..1_000_000,
            quote_free in 0i64..1_000_000,
            quote_locked in 0i64..1_000_000,
            rebates in 0i64..10_000,
            hydrate_btc: bool,
        ) {
            let g = group();
            let a = account(&[(0, SOL), (1, BTC)]);
            let oo_sol = OpenOrders {
                base_token_free: Decimal::new(base_free, 3),
                base_token_total: Decimal::new(base_free + base_locked, 3),
                quote_token_free: Decimal::new(quote_free, 2),
                quote_token_total: Decimal::new(quote_free + quote_locked, 2),
                referrer_rebates_accrued: Decimal::new(rebates, 2),
                ..open_orders(0)
            };
            let mut oo = OpenOrdersSnapshot::from([(market_key(0), oo_sol)]);
            if hydrate_btc {
                oo.insert(market_key(1), open_orders(1));
            }

            let first = compute_spot_balances(Some(&a), Some(&g), Some(&oo));
            let second = compute_spot_balances(Some(&a), Some(&g), Some(&oo));
            proptest::prop_assert_eq!(&first, &second);
            proptest::prop_assert_eq!(first[&mint(SOL)].in_orders, Decimal::new(base_locked, 3));
            proptest::prop_assert_eq!(first[&mint(SOL)].unsettled, Decimal::new(base_free, 3));
            proptest::prop_assert_eq!(first.len(), 3);
        }
    }

    #[test]
    fn test_derivation_tracks_store_inputs() {
        let store = Store::new(AppState::default());
        store.register_derivation(Arc::new(SpotBalancesDerivation));
        assert!(store.get_state().mango_account.spot_balances.is_empty());

        store.set(|s| {
            s.group = Some(Arc::new(group()));
            s.mango_account.current = Some(Arc::new(account(&[(0, SOL)])));
        });
        // Account present but unhydrated: zero entries for both mints
        let balances = store.get_state().mango_account.spot_balances.clone();
        assert_eq!(balances.len(), 2);
        assert!(balances.values().all(SpotBalance::is_zero));

        store.set(|s| {
            s.mango_account.open_orders =
                Arc::new(OpenOrdersSnapshot::from([(market_key(0), open_orders(0))]));
        });
        assert_eq!(
            store.get_state().mango_account.spot_balances[&mint(SOL)].in_orders,
            dec!(2.5)
        );

        let before = store.get_state().mango_account.spot_balances.clone();
        store.set(|s| s.selected_market = Some("SOL/USDC".into()));
        // Unrelated write keeps the same derived map
        assert!(Arc::ptr_eq(
            &before,
            &store.get_state().mango_account.spot_balances
        ));
    }
}
