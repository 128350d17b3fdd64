//! Service defaults
//!
//! Default cadences and limits used by the account synchronization layer
//! when no configuration file overrides them.

/// Account synchronization defaults
pub mod sync {
    /// Group (banks and markets) refresh cadence (milliseconds)
    pub const GROUP_REFRESH_MS: u64 = 25_000;

    /// Slow account reload cadence (milliseconds)
    pub const ACCOUNT_RELOAD_MS: u64 = 60_000;

    /// Open-orders refresh cadence (milliseconds)
    pub const OPEN_ORDERS_REFRESH_MS: u64 = 30_000;

    /// Market fills refresh cadence (milliseconds)
    pub const MARKET_FILLS_REFRESH_MS: u64 = 6_000;

    /// Total attempts for a background reload, first try included
    pub const RELOAD_MAX_ATTEMPTS: u32 = 2;

    /// Backoff before the first retry (milliseconds)
    pub const RETRY_BASE_BACKOFF_MS: u64 = 250;

    /// Backoff ceiling (milliseconds)
    pub const RETRY_MAX_BACKOFF_MS: u64 = 4_000;

    /// Persisted key holding the last viewed account address
    pub const LAST_ACCOUNT_KEY: &str = "mangoAccount-0.4";

    /// Market selected when nothing else is configured or persisted
    pub const DEFAULT_MARKET: &str = "SOL/USDC";

    /// Bank selected when nothing else is configured or persisted
    pub const DEFAULT_BANK: &str = "USDC";
}

/// Remote endpoint defaults
pub mod endpoints {
    /// Websocket endpoint for account subscriptions
    pub const RPC_WS_URL: &str = "wss://api.mainnet-beta.solana.com";

    /// Base URL of the stats/history REST API
    pub const DATA_API_URL: &str = "https://api.mngo.cloud/data/v4";

    /// HTTP timeout for the data API (milliseconds)
    pub const DATA_API_TIMEOUT_MS: u64 = 15_000;
}
