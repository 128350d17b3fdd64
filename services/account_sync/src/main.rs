//! Account synchronization demo entry point
//!
//! Runs the hydrator against the simulated program client. Push updates come
//! either from the in-memory transport, driven by a simulated chain task, or
//! from a real websocket endpoint with `--ws-url` or `--live-ws`.

use account_sync::data_api::HttpDataApi;
use account_sync::sim::{self, MemoryPubSub, SimDataApi, SimProgramClient};
use account_sync::{
    ConnectionHandle, DataApi, Hydrator, JsonFileStore, LocalStore, MangoStore, MemoryStore,
    PubSubTransport, WsPubSub,
};
use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sync_config::load_config;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use types::Address;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay (config/environments/<name>.toml)
    #[arg(short, long)]
    environment: Option<String>,

    /// Wallet to load accounts for (base58)
    #[arg(long)]
    wallet: Option<String>,

    /// Subscribe over this websocket endpoint instead of the in-memory transport
    #[arg(long)]
    ws_url: Option<String>,

    /// Subscribe over the configured websocket endpoint
    #[arg(long)]
    live_ws: bool,

    /// Fetch history from the configured data API
    #[arg(long)]
    live_history: bool,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    run_secs: Option<u64>,

    /// Seconds between simulated on-chain changes
    #[arg(long, default_value_t = 5)]
    chain_tick_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref(), args.environment.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("account_sync={},warn", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting account synchronization");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // The simulated chain serves whichever group the configuration names
    let mut group = sim::demo_group();
    if config.group.is_empty() {
        config.group = group.address.to_string();
    } else {
        group.address = config.group.parse().context("invalid group address")?;
    }

    let wallet: Address = match &args.wallet {
        Some(wallet) => wallet.parse().context("invalid --wallet")?,
        None => Address::from_seed(42),
    };

    let client = Arc::new(SimProgramClient::new(group, wallet));
    seed_chain(&client);

    let data_api: Arc<dyn DataApi> = if args.live_history {
        Arc::new(HttpDataApi::new(config.data_api_url.clone())?)
    } else {
        Arc::new(SimDataApi::new())
    };

    let local: Arc<dyn LocalStore> = match &config.storage_path {
        Some(path) => Arc::new(JsonFileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let ws_url = args
        .ws_url
        .clone()
        .or_else(|| args.live_ws.then(|| config.rpc_ws_url.clone()));
    let memory = Arc::new(MemoryPubSub::new());
    let transport: Arc<dyn PubSubTransport> = match &ws_url {
        Some(url) => Arc::new(WsPubSub::connect(url).await?),
        None => memory.clone(),
    };
    let connection = Arc::new(ConnectionHandle::new(transport).await?);

    let mango = Arc::new(MangoStore::new(config, client.clone(), data_api, local)?);

    let mut notifications = mango.notifier().subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            info!("Notification: {:?}", notification);
        }
    });

    if let Err(e) = mango.fetch_group().await {
        warn!("Initial group load failed: {}", e);
    }
    if let Err(e) = mango.fetch_mango_accounts(wallet).await {
        warn!("Initial account load failed: {}", e);
    }

    let mut hydrator = Hydrator::spawn(mango.clone(), connection);

    let chain = ws_url.is_none().then(|| {
        tokio::spawn(simulate_chain(
            client,
            memory,
            Duration::from_secs(args.chain_tick_secs.max(1)),
        ))
    });

    let mut watcher = mango.store().subscribe();
    let report = tokio::spawn(async move {
        while watcher.changed().await.is_ok() {
            let state = watcher.borrow_and_update().clone();
            if let Some(account) = state.current_account() {
                info!(
                    "{} at slot {}: {} token positions, {} spot balances",
                    account.name,
                    state.mango_account.last_seen_slot,
                    account.active_token_positions().count(),
                    state.mango_account.spot_balances.len()
                );
            }
        }
    });

    let shutdown_signal = async {
        match args.run_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
            }
        }
        info!("Shutdown signal received");
    };
    shutdown_signal.await;

    hydrator.shutdown();
    if let Some(chain) = chain {
        chain.abort();
    }
    report.abort();

    info!("Account synchronization stopped");
    Ok(())
}

fn seed_chain(client: &SimProgramClient) {
    let wallet = client.wallet();
    for account_num in 0..2 {
        let account = sim::demo_account(wallet, account_num, client.current_slot());
        client.set_open_orders(account.address, sim::demo_open_orders(&account));
        client.put_account(account);
    }
    for market in ["SOL/USDC", "BTC/USDC"] {
        client.set_fills(market, vec![sim::demo_fill(market, client.current_slot())]);
    }
}

/// Mutate every account on a timer and push the new bytes to subscribers
async fn simulate_chain(
    client: Arc<SimProgramClient>,
    transport: Arc<MemoryPubSub>,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let slot = client.advance_slot();
        for account_num in 0..2 {
            let address = sim::demo_account(client.wallet(), account_num, 0).address;
            let Some(mut account) = client.account(&address) else {
                continue;
            };
            if let Some(position) = account.tokens.first_mut() {
                position.balance += Decimal::ONE;
            }
            account.slot = slot;
            client.put_account(account.clone());
            let delivered = transport.publish(&address, slot, sim::encode_account(&account));
            tracing::debug!("Slot {}: pushed {} to {} listeners", slot, address.short(), delivered);
        }
    }
}
