//! Store actions
//!
//! [`MangoStore`] is the application context: the shared [`Store`] plus
//! every collaborator an action needs. A failed background action leaves the
//! last known good state in place and returns the error for the caller to
//! log. User-initiated transactions also raise a [`Notification`].

use crate::client::{ClientError, DataApi, ProgramClient, TransactionRequest};
use crate::derived_balances::SpotBalancesDerivation;
use crate::error::{Result, SyncError};
use crate::notify::{Notification, Notifier};
use crate::persist::LocalStore;
use crate::retry::RetryPolicy;
use crate::state::AppState;
use crate::store::Store;
use std::sync::Arc;
use sync_config::service::sync::LAST_ACCOUNT_KEY;
use sync_config::SyncConfig;
use tracing::{debug, info, warn};
use types::{Address, MangoAccount, Slot};

/// Result of offering an account snapshot to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Snapshot is newer than anything seen and became the current account
    Applied,
    /// Snapshot is at or below the last seen slot and was dropped
    Stale { slot: Slot, last_seen: Slot },
    /// Snapshot belongs to an account that is no longer selected
    NotSelected,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Persisted key for the last viewed account of `wallet`
pub fn last_account_key(wallet: &Address) -> String {
    format!("{}-{}", LAST_ACCOUNT_KEY, wallet)
}

/// Application context shared by the hydrator and the presentation layer
pub struct MangoStore {
    store: Arc<Store<AppState>>,
    client: Arc<dyn ProgramClient>,
    data_api: Arc<dyn DataApi>,
    local: Arc<dyn LocalStore>,
    notifier: Notifier,
    config: SyncConfig,
    group_address: Address,
    retry: RetryPolicy,
}

impl MangoStore {
    /// Build the context and register the spot-balance derivation
    pub fn new(
        config: SyncConfig,
        client: Arc<dyn ProgramClient>,
        data_api: Arc<dyn DataApi>,
        local: Arc<dyn LocalStore>,
    ) -> Result<Self> {
        let group_address: Address = config
            .group
            .parse()
            .map_err(|e| SyncError::Config(format!("invalid group address: {}", e)))?;

        let store = Arc::new(Store::new(AppState::default()));
        store.register_derivation(Arc::new(SpotBalancesDerivation));

        Ok(Self {
            store,
            client,
            data_api,
            local,
            notifier: Notifier::default(),
            retry: RetryPolicy::from(&config.retry),
            config,
            group_address,
        })
    }

    pub fn store(&self) -> &Arc<Store<AppState>> {
        &self.store
    }

    /// Current snapshot of the whole state
    pub fn state(&self) -> Arc<AppState> {
        self.store.get_state()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn client(&self) -> &Arc<dyn ProgramClient> {
        &self.client
    }

    pub fn group_address(&self) -> Address {
        self.group_address
    }

    /// Refresh banks and markets
    ///
    /// On failure the previous group stays in place. Market and bank
    /// selections are only filled in when still unset.
    pub async fn fetch_group(&self) -> Result<()> {
        let group = Arc::new(self.client.get_group(&self.group_address).await?);

        let defaults = &self.config.defaults;
        self.store.set(|state| {
            if state.selected_market.is_none() {
                state.selected_market = if group.has_market(&defaults.market) {
                    Some(defaults.market.clone())
                } else {
                    group.first_market_name().map(str::to_string)
                };
            }
            if state.selected_bank.is_none() {
                state.selected_bank = group
                    .bank_by_name(&defaults.bank)
                    .or_else(|| group.banks.first())
                    .map(|bank| bank.name.clone());
            }
            state.group = Some(group);
        });

        debug!("Group refreshed");
        Ok(())
    }

    /// Pull a fresh snapshot of the selected account
    ///
    /// Fails with [`SyncError::NoAccountSelected`] before any network call
    /// when nothing is selected. `initial_load` is cleared on every path.
    pub async fn reload_mango_account(&self) -> Result<ApplyOutcome> {
        let result = self.reload_selected().await;
        self.finish_initial_load();
        result
    }

    async fn reload_selected(&self) -> Result<ApplyOutcome> {
        let address = self
            .store
            .get_state()
            .current_address()
            .ok_or(SyncError::NoAccountSelected)?;

        let client = &self.client;
        let snapshot = self
            .retry
            .run("reload_mango_account", move || async move {
                client
                    .get_mango_account(&address)
                    .await
                    .map_err(SyncError::from)
            })
            .await?;

        Ok(self.apply_account_update(snapshot))
    }

    /// Single entry point for poll and push results
    ///
    /// A snapshot is applied only when it belongs to the selected account and
    /// its slot is strictly greater than the last one seen.
    pub fn apply_account_update(&self, snapshot: MangoAccount) -> ApplyOutcome {
        let address = snapshot.address;
        let slot = snapshot.slot;
        let snapshot = Arc::new(snapshot);

        let mut outcome = ApplyOutcome::NotSelected;
        self.store.update_if(|state| {
            if !state.is_selected(&address) {
                return false;
            }
            let last_seen = state.mango_account.last_seen_slot;
            if slot <= last_seen {
                outcome = ApplyOutcome::Stale { slot, last_seen };
                return false;
            }

            if state.mango_accounts.iter().any(|a| a.address == address) {
                state.mango_accounts = Arc::new(
                    state
                        .mango_accounts
                        .iter()
                        .map(|a| {
                            if a.address == address {
                                Arc::clone(&snapshot)
                            } else {
                                Arc::clone(a)
                            }
                        })
                        .collect(),
                );
            }
            state.mango_account.replace_current(snapshot);
            outcome = ApplyOutcome::Applied;
            true
        });

        match outcome {
            ApplyOutcome::Applied => debug!("Applied {} at slot {}", address.short(), slot),
            ApplyOutcome::Stale { slot, last_seen } => debug!(
                "Dropping stale update for {}: slot {} <= {}",
                address.short(),
                slot,
                last_seen
            ),
            ApplyOutcome::NotSelected => {
                debug!("Dropping update for unselected account {}", address.short())
            }
        }
        outcome
    }

    /// List the wallet's accounts and select one
    ///
    /// Prefers the persisted last viewed account, else the first listed.
    pub async fn fetch_mango_accounts(&self, wallet: Address) -> Result<()> {
        let result = self.discover_accounts(wallet).await;
        if let Err(e) = &result {
            warn!("Failed to load accounts for {}: {}", wallet.short(), e);
            self.finish_initial_load();
        }
        result
    }

    async fn discover_accounts(&self, wallet: Address) -> Result<()> {
        let group = self
            .store
            .get_state()
            .group
            .clone()
            .ok_or(SyncError::NoGroupLoaded)?;

        let accounts: Vec<Arc<MangoAccount>> = self
            .client
            .get_mango_accounts_for_owner(&group, &wallet)
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();

        let persisted = self
            .local
            .get(&last_account_key(&wallet))
            .and_then(|value| value.parse::<Address>().ok());
        let selected = persisted
            .and_then(|address| accounts.iter().find(|a| a.address == address))
            .or_else(|| accounts.first())
            .cloned();

        info!(
            "Found {} accounts for {}, selected {}",
            accounts.len(),
            wallet.short(),
            selected
                .as_ref()
                .map(|a| a.address.short())
                .unwrap_or_else(|| "none".to_string())
        );

        let has_selection = selected.is_some();
        self.store.set(|state| {
            state.wallet = Some(wallet);
            match selected {
                Some(account) if state.is_selected(&account.address) => {
                    // Same account: a listed snapshot only wins with a newer slot
                    let kept = state
                        .current_account()
                        .filter(|_| account.slot <= state.mango_account.last_seen_slot)
                        .cloned();
                    match kept {
                        Some(current) => {
                            debug!(
                                "Keeping {} at slot {} over listed slot {}",
                                current.address.short(),
                                state.mango_account.last_seen_slot,
                                account.slot
                            );
                            state.mango_accounts = Arc::new(
                                accounts
                                    .into_iter()
                                    .map(|a| {
                                        if a.address == current.address {
                                            Arc::clone(&current)
                                        } else {
                                            a
                                        }
                                    })
                                    .collect(),
                            );
                        }
                        None => {
                            state.mango_accounts = Arc::new(accounts);
                            state.mango_account.replace_current(account);
                        }
                    }
                    state.mango_account.initial_load = false;
                }
                Some(account) => {
                    state.mango_accounts = Arc::new(accounts);
                    state.mango_account.clear_hydrated();
                    state.mango_account.replace_current(account);
                    state.mango_account.initial_load = false;
                }
                None => {
                    state.mango_accounts = Arc::new(accounts);
                    state.mango_account.clear();
                }
            }
        });

        if has_selection {
            if let Err(e) = self.fetch_open_orders().await {
                warn!("Open orders not loaded after account discovery: {}", e);
            }
        }
        Ok(())
    }

    /// Switch the selected account and remember the choice
    pub async fn select_mango_account(&self, address: Address) -> Result<()> {
        let state = self.store.get_state();
        let account = match state.mango_accounts.iter().find(|a| a.address == address) {
            Some(account) => Arc::clone(account),
            None => Arc::new(self.client.get_mango_account(&address).await?),
        };

        if let Some(wallet) = state.wallet {
            if let Err(e) = self
                .local
                .set(&last_account_key(&wallet), &address.to_string())
            {
                warn!("Failed to persist last viewed account: {}", e);
            }
        }

        self.store.set(|state| {
            state.mango_account.clear_hydrated();
            state.mango_account.replace_current(account);
            state.mango_account.initial_load = false;
        });
        info!("Selected account {}", address.short());

        self.fetch_open_orders().await
    }

    /// Replace the open-orders snapshot of the selected account
    pub async fn fetch_open_orders(&self) -> Result<()> {
        let state = self.store.get_state();
        let account = state
            .current_account()
            .cloned()
            .ok_or(SyncError::NoAccountSelected)?;
        let group = state.group.clone().ok_or(SyncError::NoGroupLoaded)?;

        let snapshot = Arc::new(self.client.load_open_orders(&group, &account).await?);

        let applied = self.store.update_if(|state| {
            if !state.is_selected(&account.address) {
                return false;
            }
            state.mango_account.open_orders = snapshot;
            true
        });
        if !applied {
            debug!(
                "Selection changed while loading open orders of {}",
                account.address.short()
            );
        }
        Ok(())
    }

    pub async fn fetch_activity_feed(&self) -> Result<()> {
        let address = self
            .store
            .get_state()
            .current_address()
            .ok_or(SyncError::NoAccountSelected)?;
        let feed = Arc::new(self.data_api.fetch_activity_feed(&address).await?);

        self.store.update_if(|state| {
            if !state.is_selected(&address) {
                return false;
            }
            state.mango_account.activity_feed = feed;
            true
        });
        Ok(())
    }

    pub async fn fetch_trade_history(&self) -> Result<()> {
        let address = self
            .store
            .get_state()
            .current_address()
            .ok_or(SyncError::NoAccountSelected)?;
        let history = Arc::new(self.data_api.fetch_trade_history(&address).await?);

        self.store.update_if(|state| {
            if !state.is_selected(&address) {
                return false;
            }
            state.mango_account.trade_history = history;
            true
        });
        Ok(())
    }

    /// Recent fills for the selected market; a no-op without a selection
    pub async fn fetch_market_fills(&self) -> Result<()> {
        let state = self.store.get_state();
        let group = state.group.clone().ok_or(SyncError::NoGroupLoaded)?;
        let Some(market) = state.selected_market.clone() else {
            return Ok(());
        };

        let fills = Arc::new(self.client.load_fills(&group, &market).await?);
        self.store.update_if(|state| {
            if state.selected_market.as_deref() != Some(market.as_str()) {
                return false;
            }
            state.market_fills = fills;
            true
        });
        Ok(())
    }

    /// Forget the wallet and everything loaded for it
    pub fn disconnect_wallet(&self) {
        self.store.set(|state| {
            state.wallet = None;
            state.mango_accounts = Arc::default();
            state.mango_account.clear();
        });
        info!("Wallet disconnected");
    }

    /// Send a user-initiated transaction, notify its outcome and reload
    pub async fn submit_transaction(&self, request: TransactionRequest) -> Result<String> {
        let state = self.store.get_state();
        let label = request.label();

        let Some(wallet) = state.wallet else {
            self.notifier.notify(
                Notification::error(format!("{} failed", label))
                    .with_description("Connect a wallet first"),
            );
            return Err(SyncError::NoWallet);
        };

        let account = state.current_account().cloned();
        let creates_account = matches!(request, TransactionRequest::CreateAccount { .. });
        if account.is_none() && !creates_account {
            self.notifier.notify(
                Notification::error(format!("{} failed", label))
                    .with_description("No mango account selected"),
            );
            return Err(SyncError::NoAccountSelected);
        }

        let signature = match self
            .client
            .send_transaction(account.as_deref(), &request)
            .await
        {
            Ok(signature) => signature,
            Err(e) => {
                let txid = match &e {
                    ClientError::Transaction { signature, .. } => signature.clone(),
                    _ => None,
                };
                self.notifier.notify(
                    Notification::error(format!("{} failed", label))
                        .with_description(e.to_string())
                        .with_txid(txid),
                );
                return Err(e.into());
            }
        };

        self.notifier.notify(
            Notification::success(format!("{} successful", label))
                .with_txid(Some(signature.clone())),
        );

        let reload = if creates_account {
            self.fetch_mango_accounts(wallet).await
        } else {
            self.reload_mango_account().await.map(|_| ())
        };
        if let Err(e) = reload {
            warn!("Reload after {} failed: {}", label, e);
        }

        Ok(signature)
    }

    /// Create the wallet's next account and select it
    pub async fn create_mango_account(&self, name: Option<String>) -> Result<Address> {
        let account_num = self
            .store
            .get_state()
            .mango_accounts
            .iter()
            .map(|a| a.account_num + 1)
            .max()
            .unwrap_or(0);
        let name = name.unwrap_or_else(|| format!("Account {}", account_num + 1));

        self.submit_transaction(TransactionRequest::CreateAccount { account_num, name })
            .await?;

        let created = self
            .store
            .get_state()
            .mango_accounts
            .iter()
            .find(|a| a.account_num == account_num)
            .map(|a| a.address);
        match created {
            Some(address) => {
                self.select_mango_account(address).await?;
                Ok(address)
            }
            None => Err(SyncError::transport(format!(
                "created account {} not listed yet",
                account_num
            ))),
        }
    }

    fn finish_initial_load(&self) {
        self.store.update_if(|state| {
            let was_loading = state.mango_account.initial_load;
            state.mango_account.initial_load = false;
            was_loading
        });
    }
}
