//! Simulated remote collaborators
//!
//! In-memory stand-ins for the program client, the data API and the
//! pub/sub endpoint. The demo binary runs the whole synchronization loop on
//! them and the tests script failures, delays and slot orderings through
//! them.

use crate::client::{ClientError, ClientResult, DataApi, ProgramClient, TransactionRequest};
use crate::connection::{AccountUpdate, PubSubTransport, SubscriptionId};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use types::{
    ActivityEntry, Address, Bank, Fill, Group, MangoAccount, OpenOrders, OpenOrdersSnapshot,
    PerpMarket, Serum3Market, Serum3Orders, Side, Slot, TokenPosition, TradeHistoryEntry,
};

/// Operation names accepted by [`SimProgramClient::fail_next`]
pub mod ops {
    pub const GET_GROUP: &str = "get_group";
    pub const GET_ACCOUNTS: &str = "get_mango_accounts_for_owner";
    pub const GET_ACCOUNT: &str = "get_mango_account";
    pub const LOAD_OPEN_ORDERS: &str = "load_open_orders";
    pub const LOAD_FILLS: &str = "load_fills";
    pub const SEND_TRANSACTION: &str = "send_transaction";
}

/// Serialize an account the way [`SimProgramClient::decode_mango_account`] expects
pub fn encode_account(account: &MangoAccount) -> Vec<u8> {
    serde_json::to_vec(account).unwrap_or_default()
}

#[derive(Default)]
struct SimChain {
    group: Group,
    /// Owner → account addresses in creation order
    owners: BTreeMap<Address, Vec<Address>>,
    accounts: HashMap<Address, MangoAccount>,
    open_orders: HashMap<Address, OpenOrdersSnapshot>,
    fills: HashMap<String, Vec<Fill>>,
    failures: HashMap<&'static str, Vec<ClientError>>,
    calls: HashMap<&'static str, u32>,
    reload_delay: Option<Duration>,
    transaction_results: Vec<ClientResult<String>>,
    sent: Vec<TransactionRequest>,
}

/// Scriptable [`ProgramClient`]
pub struct SimProgramClient {
    wallet: Address,
    chain: Mutex<SimChain>,
    slot: AtomicU64,
    signatures: AtomicU64,
}

impl SimProgramClient {
    pub fn new(group: Group, wallet: Address) -> Self {
        Self {
            wallet,
            chain: Mutex::new(SimChain {
                group,
                ..SimChain::default()
            }),
            slot: AtomicU64::new(1),
            signatures: AtomicU64::new(0),
        }
    }

    pub fn wallet(&self) -> Address {
        self.wallet
    }

    pub fn group(&self) -> Group {
        self.chain.lock().group.clone()
    }

    pub fn set_group(&self, group: Group) {
        self.chain.lock().group = group;
    }

    /// Insert or replace an account; its slot is kept as given
    pub fn put_account(&self, account: MangoAccount) {
        self.slot.fetch_max(account.slot, Ordering::SeqCst);
        let mut chain = self.chain.lock();
        let owned = chain.owners.entry(account.owner).or_default();
        if !owned.contains(&account.address) {
            owned.push(account.address);
        }
        chain.accounts.insert(account.address, account);
    }

    pub fn account(&self, address: &Address) -> Option<MangoAccount> {
        self.chain.lock().accounts.get(address).cloned()
    }

    pub fn set_open_orders(&self, account: Address, snapshot: OpenOrdersSnapshot) {
        self.chain.lock().open_orders.insert(account, snapshot);
    }

    pub fn set_fills(&self, market: &str, fills: Vec<Fill>) {
        self.chain.lock().fills.insert(market.to_string(), fills);
    }

    /// Queue an error for the next call of `op`
    pub fn fail_next(&self, op: &'static str, error: ClientError) {
        self.chain.lock().failures.entry(op).or_default().push(error);
    }

    /// Delay every account reload, to model a slow poll racing a push
    pub fn set_reload_delay(&self, delay: Option<Duration>) {
        self.chain.lock().reload_delay = delay;
    }

    /// Queue the outcome of the next transaction
    pub fn push_transaction_result(&self, result: ClientResult<String>) {
        self.chain.lock().transaction_results.push(result);
    }

    pub fn sent_transactions(&self) -> Vec<TransactionRequest> {
        self.chain.lock().sent.clone()
    }

    pub fn calls(&self, op: &'static str) -> u32 {
        self.chain.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Advance the simulated chain and return the new slot
    pub fn advance_slot(&self) -> Slot {
        self.slot.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_slot(&self) -> Slot {
        self.slot.load(Ordering::SeqCst)
    }

    /// Count the call and pop a queued failure for `op`
    fn enter(&self, op: &'static str) -> ClientResult<()> {
        let mut chain = self.chain.lock();
        *chain.calls.entry(op).or_default() += 1;
        match chain.failures.get_mut(op) {
            Some(queue) if !queue.is_empty() => Err(queue.remove(0)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ProgramClient for SimProgramClient {
    async fn get_group(&self, group: &Address) -> ClientResult<Group> {
        self.enter(ops::GET_GROUP)?;
        let chain = self.chain.lock();
        if &chain.group.address != group {
            return Err(ClientError::AccountNotFound(group.to_string()));
        }
        Ok(chain.group.clone())
    }

    async fn get_mango_accounts_for_owner(
        &self,
        _group: &Group,
        owner: &Address,
    ) -> ClientResult<Vec<MangoAccount>> {
        self.enter(ops::GET_ACCOUNTS)?;
        let chain = self.chain.lock();
        let mut accounts: Vec<MangoAccount> = chain
            .owners
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|address| chain.accounts.get(address).cloned())
            .collect();
        accounts.extend(
            chain
                .accounts
                .values()
                .filter(|a| a.is_delegate(owner) && &a.owner != owner)
                .cloned(),
        );
        Ok(accounts)
    }

    async fn get_mango_account(&self, address: &Address) -> ClientResult<MangoAccount> {
        self.enter(ops::GET_ACCOUNT)?;
        // Read before sleeping: a slow poll returns the state it saw when issued
        let (account, delay) = {
            let chain = self.chain.lock();
            (chain.accounts.get(address).cloned(), chain.reload_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        account.ok_or_else(|| ClientError::AccountNotFound(address.to_string()))
    }

    fn decode_mango_account(
        &self,
        address: &Address,
        data: &[u8],
        slot: u64,
    ) -> ClientResult<MangoAccount> {
        let mut account: MangoAccount =
            serde_json::from_slice(data).map_err(|e| ClientError::Decode {
                address: *address,
                reason: e.to_string(),
            })?;
        account.address = *address;
        account.slot = slot;
        Ok(account)
    }

    async fn load_open_orders(
        &self,
        _group: &Group,
        account: &MangoAccount,
    ) -> ClientResult<OpenOrdersSnapshot> {
        self.enter(ops::LOAD_OPEN_ORDERS)?;
        let chain = self.chain.lock();
        let known = chain.open_orders.get(&account.address);
        // Only markets the account actually has positions on
        let snapshot = account
            .active_serum3_orders()
            .filter_map(|position| {
                let market = chain.group.serum3_market(position.market_index)?;
                let oo = known?.get(&market.external_market)?;
                Some((market.external_market, oo.clone()))
            })
            .collect();
        Ok(snapshot)
    }

    async fn load_fills(&self, _group: &Group, market: &str) -> ClientResult<Vec<Fill>> {
        self.enter(ops::LOAD_FILLS)?;
        Ok(self
            .chain
            .lock()
            .fills
            .get(market)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_transaction(
        &self,
        account: Option<&MangoAccount>,
        request: &TransactionRequest,
    ) -> ClientResult<String> {
        self.enter(ops::SEND_TRANSACTION)?;
        let queued = {
            let mut chain = self.chain.lock();
            chain.sent.push(request.clone());
            if chain.transaction_results.is_empty() {
                None
            } else {
                Some(chain.transaction_results.remove(0))
            }
        };
        if let Some(result) = queued {
            return result;
        }

        let slot = self.advance_slot();
        match request {
            TransactionRequest::CreateAccount { account_num, name } => {
                let address = Address::from_seed(0xacc0_0000 + u64::from(*account_num));
                let mut created =
                    MangoAccount::new(address, self.wallet, *account_num, name.clone());
                created.slot = slot;
                self.put_account(created);
            }
            TransactionRequest::Deposit { mint, amount } => {
                self.adjust_balance(account, mint, *amount, slot)?;
            }
            TransactionRequest::Withdraw { mint, amount, .. } => {
                self.adjust_balance(account, mint, -*amount, slot)?;
            }
            _ => {
                if let Some(account) = account {
                    let mut updated = account.clone();
                    updated.slot = slot;
                    self.put_account(updated);
                }
            }
        }

        let signature = format!("simsig{}", self.signatures.fetch_add(1, Ordering::SeqCst) + 1);
        debug!("Simulated {} -> {}", request.label(), signature);
        Ok(signature)
    }
}

impl SimProgramClient {
    fn adjust_balance(
        &self,
        account: Option<&MangoAccount>,
        mint: &Address,
        delta: Decimal,
        slot: Slot,
    ) -> ClientResult<()> {
        let account = account.ok_or_else(|| ClientError::Transaction {
            reason: "no account".into(),
            signature: None,
        })?;
        let token_index = self
            .chain
            .lock()
            .group
            .bank_by_mint(mint)
            .map(|b| b.token_index)
            .ok_or_else(|| ClientError::Transaction {
                reason: format!("unknown mint {}", mint),
                signature: None,
            })?;

        let mut updated = self.account(&account.address).unwrap_or_else(|| account.clone());
        match updated
            .tokens
            .iter_mut()
            .find(|t| t.is_active() && t.token_index == token_index)
        {
            Some(position) => position.balance += delta,
            None => updated.tokens.push(TokenPosition {
                token_index,
                balance: delta,
            }),
        }
        updated.slot = slot;
        self.put_account(updated);
        Ok(())
    }
}

/// Canned [`DataApi`]
#[derive(Default)]
pub struct SimDataApi {
    activity: Mutex<HashMap<Address, Vec<ActivityEntry>>>,
    trades: Mutex<HashMap<Address, Vec<TradeHistoryEntry>>>,
    calls: AtomicU64,
}

impl SimDataApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_activity(&self, account: Address, entries: Vec<ActivityEntry>) {
        self.activity.lock().insert(account, entries);
    }

    pub fn set_trades(&self, account: Address, entries: Vec<TradeHistoryEntry>) {
        self.trades.lock().insert(account, entries);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataApi for SimDataApi {
    async fn fetch_activity_feed(&self, account: &Address) -> Result<Vec<ActivityEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.activity.lock().get(account).cloned().unwrap_or_default())
    }

    async fn fetch_trade_history(&self, account: &Address) -> Result<Vec<TradeHistoryEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.trades.lock().get(account).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct PubSubInner {
    next_id: SubscriptionId,
    subscriptions: HashMap<SubscriptionId, (Address, mpsc::UnboundedSender<AccountUpdate>)>,
    closed: bool,
}

/// In-memory pub/sub endpoint
///
/// Behaves like client libraries that close their socket once the
/// subscription list empties: after that, subscribing still succeeds but no
/// update is ever delivered again.
#[derive(Default)]
pub struct MemoryPubSub {
    inner: Mutex<PubSubInner>,
    slot: AtomicU64,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an update to every subscriber of `address`, returning how many received it
    pub fn publish(&self, address: &Address, slot: Slot, data: Vec<u8>) -> usize {
        let inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        inner
            .subscriptions
            .values()
            .filter(|(subscribed, _)| subscribed == address)
            .filter(|(_, sink)| {
                sink.send(AccountUpdate {
                    address: *address,
                    slot,
                    data: data.clone(),
                })
                .is_ok()
            })
            .count()
    }

    pub fn set_slot(&self, slot: Slot) {
        self.slot.store(slot, Ordering::SeqCst);
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    pub fn is_subscribed(&self, address: &Address) -> bool {
        self.inner
            .lock()
            .subscriptions
            .values()
            .any(|(subscribed, _)| subscribed == address)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Close every subscriber channel, as a lost socket does; returns how many were open
    pub fn drop_subscribers(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.subscriptions.len();
        inner.subscriptions.clear();
        dropped
    }
}

#[async_trait]
impl PubSubTransport for MemoryPubSub {
    async fn subscribe_account(
        &self,
        address: Address,
        sink: mpsc::UnboundedSender<AccountUpdate>,
    ) -> Result<SubscriptionId> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscriptions.insert(id, (address, sink));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.subscriptions.remove(&id).is_none() {
            return Err(SyncError::transport(format!("unknown subscription {}", id)));
        }
        if inner.subscriptions.is_empty() && !inner.closed {
            warn!("Last subscription removed, closing socket");
            inner.closed = true;
        }
        Ok(())
    }

    async fn get_slot(&self) -> Result<Slot> {
        Ok(self.slot.load(Ordering::SeqCst))
    }
}

/// Group with USDC, SOL and BTC banks, two spot markets and one perp market
pub fn demo_group() -> Group {
    let bank = |token_index: u16, name: &str, mint_decimals: u8| Bank {
        token_index,
        mint: Address::from_seed(1_000 + u64::from(token_index)),
        name: name.to_string(),
        mint_decimals,
    };
    let spot = |market_index: u16, name: &str, base_token_index: u16| Serum3Market {
        market_index,
        name: name.to_string(),
        base_token_index,
        quote_token_index: 0,
        external_market: Address::from_seed(2_000 + u64::from(market_index)),
    };

    Group {
        address: Address::from_seed(1),
        banks: vec![bank(0, "USDC", 6), bank(1, "SOL", 9), bank(2, "BTC", 8)],
        serum3_markets: vec![spot(0, "SOL/USDC", 1), spot(1, "BTC/USDC", 2)],
        perp_markets: vec![PerpMarket {
            market_index: 0,
            name: "SOL-PERP".to_string(),
            settle_token_index: 0,
        }],
        slot: 1,
    }
}

/// Account on `demo_group` with a USDC deposit and spot positions on both markets
pub fn demo_account(owner: Address, account_num: u32, slot: Slot) -> MangoAccount {
    let group = demo_group();
    let address = Address::from_seed(0xacc0_0000 + u64::from(account_num));
    let mut account = MangoAccount::new(
        address,
        owner,
        account_num,
        format!("Account {}", account_num + 1),
    );
    account.tokens = vec![TokenPosition {
        token_index: 0,
        balance: Decimal::new(1_000_000_000, 0),
    }];
    account.serum3 = group
        .serum3_markets
        .iter()
        .map(|m| Serum3Orders {
            market_index: m.market_index,
            base_token_index: m.base_token_index,
            quote_token_index: m.quote_token_index,
            open_orders: Address::from_seed(
                3_000 + u64::from(account_num) * 16 + u64::from(m.market_index),
            ),
        })
        .collect();
    account.slot = slot;
    account
}

/// Open-orders snapshot for `account` with resting orders on SOL/USDC only
pub fn demo_open_orders(account: &MangoAccount) -> OpenOrdersSnapshot {
    let group = demo_group();
    account
        .active_serum3_orders()
        .filter(|p| p.market_index == 0)
        .filter_map(|p| {
            let market = group.serum3_market(p.market_index)?;
            Some((
                market.external_market,
                OpenOrders {
                    address: p.open_orders,
                    market: market.external_market,
                    base_token_free: Decimal::new(5, 1),
                    base_token_total: Decimal::new(25, 1),
                    quote_token_free: Decimal::new(12, 0),
                    quote_token_total: Decimal::new(150, 0),
                    referrer_rebates_accrued: Decimal::ZERO,
                },
            ))
        })
        .collect()
}

pub fn demo_fill(market: &str, slot: Slot) -> Fill {
    Fill {
        market: market.to_string(),
        side: if slot % 2 == 0 { Side::Buy } else { Side::Sell },
        price: Decimal::new(14_250, 2),
        quantity: Decimal::new(3, 1),
        slot,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pubsub_closes_when_list_empties() {
        let transport = MemoryPubSub::new();
        let address = Address::from_seed(1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = transport.subscribe_account(address, tx).await.unwrap();
        transport.unsubscribe(id).await.unwrap();
        assert!(transport.is_closed());

        // New subscriptions are accepted but never delivered to
        let (tx, _rx2) = mpsc::unbounded_channel();
        transport.subscribe_account(address, tx).await.unwrap();
        assert_eq!(transport.publish(&address, 5, vec![]), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failures_are_consumed_in_order() {
        let client = SimProgramClient::new(demo_group(), Address::from_seed(9));
        client.fail_next(ops::GET_GROUP, ClientError::Rpc("first".into()));

        let group = demo_group().address;
        assert_eq!(
            client.get_group(&group).await,
            Err(ClientError::Rpc("first".into()))
        );
        assert!(client.get_group(&group).await.is_ok());
        assert_eq!(client.calls(ops::GET_GROUP), 2);
    }

    #[test]
    fn test_decode_roundtrips_encoded_account() {
        let wallet = Address::from_seed(9);
        let client = SimProgramClient::new(demo_group(), wallet);
        let account = demo_account(wallet, 0, 3);

        let decoded = client
            .decode_mango_account(&account.address, &encode_account(&account), 44)
            .unwrap();
        assert_eq!(decoded.slot, 44);
        assert_eq!(decoded.tokens, account.tokens);
    }

    #[tokio::test]
    async fn test_open_orders_limited_to_active_markets() {
        let wallet = Address::from_seed(9);
        let client = SimProgramClient::new(demo_group(), wallet);
        let mut account = demo_account(wallet, 0, 3);
        client.set_open_orders(account.address, demo_open_orders(&account));

        let loaded = client.load_open_orders(&demo_group(), &account).await.unwrap();
        assert_eq!(loaded.len(), 1);

        account.serum3.retain(|p| p.market_index != 0);
        let loaded = client.load_open_orders(&demo_group(), &account).await.unwrap();
        assert!(loaded.is_empty());
    }
}
