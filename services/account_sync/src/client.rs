//! Seams to the external program client SDK and the history REST API
//!
//! Everything behind these traits is owned elsewhere: account decoding,
//! health math and order-book decoding live in the program client. The
//! synchronization layer treats every call as fallible and asynchronous.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::{
    ActivityEntry, Address, Fill, Group, MangoAccount, OpenOrdersSnapshot, TradeHistoryEntry,
};

/// Errors reported by program client implementations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// RPC node returned an error or timed out
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Requested account does not exist on chain
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Account bytes could not be decoded
    #[error("Failed to decode account {address}: {reason}")]
    Decode { address: Address, reason: String },

    /// Transaction was rejected by the wallet or the cluster
    #[error("Transaction failed: {reason}")]
    Transaction {
        reason: String,
        /// Signature when the transaction reached the cluster
        signature: Option<String>,
    },
}

impl ClientError {
    /// RPC errors are transient; missing accounts and decode failures are not
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Rpc(_))
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// User-initiated transaction submitted through the program client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionRequest {
    CreateAccount {
        account_num: u32,
        name: String,
    },
    Deposit {
        mint: Address,
        amount: Decimal,
    },
    Withdraw {
        mint: Address,
        amount: Decimal,
        allow_borrow: bool,
    },
    Swap {
        input_mint: Address,
        output_mint: Address,
        amount: Decimal,
        slippage_bps: u16,
    },
    SettleFunds {
        market_index: u16,
    },
    CancelAllSpotOrders {
        market_index: u16,
    },
}

impl TransactionRequest {
    /// Short human label used in notifications
    pub fn label(&self) -> &'static str {
        match self {
            TransactionRequest::CreateAccount { .. } => "Create account",
            TransactionRequest::Deposit { .. } => "Deposit",
            TransactionRequest::Withdraw { .. } => "Withdraw",
            TransactionRequest::Swap { .. } => "Swap",
            TransactionRequest::SettleFunds { .. } => "Settle funds",
            TransactionRequest::CancelAllSpotOrders { .. } => "Cancel orders",
        }
    }
}

/// Program client SDK surface consumed by the store actions
#[async_trait]
pub trait ProgramClient: Send + Sync {
    async fn get_group(&self, group: &Address) -> ClientResult<Group>;

    /// Accounts owned by (or delegated to) `owner`, in the SDK's order
    async fn get_mango_accounts_for_owner(
        &self,
        group: &Group,
        owner: &Address,
    ) -> ClientResult<Vec<MangoAccount>>;

    /// Fresh read of one account, stamped with the slot it was read at
    async fn get_mango_account(&self, address: &Address) -> ClientResult<MangoAccount>;

    /// Decode raw account bytes delivered by a push update
    fn decode_mango_account(
        &self,
        address: &Address,
        data: &[u8],
        slot: u64,
    ) -> ClientResult<MangoAccount>;

    /// Open-orders accounts for the account's active spot positions, keyed by market
    async fn load_open_orders(
        &self,
        group: &Group,
        account: &MangoAccount,
    ) -> ClientResult<OpenOrdersSnapshot>;

    /// Recent fills from the market's event queue
    async fn load_fills(&self, group: &Group, market: &str) -> ClientResult<Vec<Fill>>;

    /// Sign and send, returning the transaction signature
    async fn send_transaction(
        &self,
        account: Option<&MangoAccount>,
        request: &TransactionRequest,
    ) -> ClientResult<String>;
}

/// Third-party stats/history API
#[async_trait]
pub trait DataApi: Send + Sync {
    async fn fetch_activity_feed(&self, account: &Address) -> crate::Result<Vec<ActivityEntry>>;

    async fn fetch_trade_history(&self, account: &Address) -> crate::Result<Vec<TradeHistoryEntry>>;
}
