//! Background hydration of the store
//!
//! Each upstream dataset refreshes on its own interval loop. A listener task
//! follows the selected account address, keeps one push subscription open for
//! it and refreshes per-account history whenever the address changes. Push
//! updates and poll results meet only at the slot check in
//! [`MangoStore::apply_account_update`].

use crate::actions::MangoStore;
use crate::connection::{AccountUpdate, ConnectionHandle, SubscriptionId};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::state::AppState;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use types::Address;

const MIN_RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);

/// Owns every background task; dropping it stops them all
pub struct Hydrator {
    tasks: Vec<JoinHandle<()>>,
}

impl Hydrator {
    /// Start the interval loops and the push listener
    ///
    /// The group refreshes immediately, every other loop waits one full
    /// period before its first run.
    pub fn spawn(mango: Arc<MangoStore>, connection: Arc<ConnectionHandle>) -> Self {
        let intervals = mango.config().intervals.clone();

        let tasks = vec![
            spawn_loop("group refresh", intervals.group(), true, mango.clone(), |m| async move {
                m.fetch_group().await
            }),
            spawn_loop(
                "account reload",
                intervals.account(),
                false,
                mango.clone(),
                |m| async move { m.reload_mango_account().await.map(|_| ()) },
            ),
            spawn_loop(
                "open orders refresh",
                intervals.open_orders(),
                false,
                mango.clone(),
                |m| async move { m.fetch_open_orders().await },
            ),
            spawn_loop(
                "market fills refresh",
                intervals.market_fills(),
                false,
                mango.clone(),
                |m| async move { m.fetch_market_fills().await },
            ),
            tokio::spawn(listen_selected_account(mango, connection)),
        ];

        info!(
            "Hydrator started: group {:?}, account {:?}, open orders {:?}, fills {:?}",
            intervals.group(),
            intervals.account(),
            intervals.open_orders(),
            intervals.market_fills()
        );
        Self { tasks }
    }

    /// Abort every loop; requests already in flight finish on their own
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Hydrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }
}

impl Drop for Hydrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    immediate: bool,
    mango: Arc<MangoStore>,
    action: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<MangoStore>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let start = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match action(mango.clone()).await {
                Ok(()) => {}
                Err(e) if e.is_precondition() => debug!("{} skipped: {}", name, e),
                Err(e) => warn!("{} failed, keeping previous state: {}", name, e),
            }
        }
    })
}

fn selected_address(state: &AppState) -> Option<Address> {
    state.current_address()
}

/// Follow the selected account: one push subscription per address
///
/// A subscription whose channel closes, or that could not be opened, is
/// retried with the store's retry backoff until the selection changes.
async fn listen_selected_account(mango: Arc<MangoStore>, connection: Arc<ConnectionHandle>) {
    let policy = *mango.retry_policy();
    let mut selection = mango.store().select(selected_address);
    let mut address = *selection.get();
    let mut address_changed = true;
    let mut failures = 0u32;

    loop {
        let mut subscription: Option<SubscriptionId> = None;
        let mut updates = None;
        let mut retry_at = None;

        if let Some(address) = address {
            if address_changed {
                refresh_history(mango.clone());
            }
            match connection.on_account_change(address).await {
                Ok(sub) => {
                    info!("Listening for changes on {}", address.short());
                    failures = 0;
                    subscription = Some(sub.id);
                    updates = Some(sub.updates);
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = resubscribe_delay(&policy, failures);
                    warn!(
                        "Failed to subscribe to {}: {}, retrying in {:?}",
                        address.short(),
                        e,
                        delay
                    );
                    retry_at = Some(Instant::now() + delay);
                }
            }
        }

        address_changed = loop {
            tokio::select! {
                changed = selection.changed() => match changed {
                    Some(next) => {
                        address = next;
                        failures = 0;
                        break true;
                    }
                    None => return,
                },
                update = next_update(&mut updates) => match update {
                    Some(update) => handle_push(&mango, update),
                    None => {
                        failures = failures.saturating_add(1);
                        let delay = resubscribe_delay(&policy, failures);
                        warn!("Push channel closed, resubscribing in {:?}", delay);
                        retry_at = Some(Instant::now() + delay);
                    }
                },
                _ = sleep_until(retry_at) => break false,
            }
        };

        if let Some(id) = subscription {
            if let Err(e) = connection.remove_account_change_listener(id).await {
                warn!("Failed to remove subscription {}: {}", id, e);
            }
        }
    }
}

fn resubscribe_delay(policy: &RetryPolicy, failures: u32) -> Duration {
    policy.backoff(failures).max(MIN_RESUBSCRIBE_DELAY)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Next push update; `None` once when the channel closes, then pending forever
async fn next_update(
    updates: &mut Option<mpsc::UnboundedReceiver<AccountUpdate>>,
) -> Option<AccountUpdate> {
    match updates {
        Some(rx) => {
            let update = rx.recv().await;
            if update.is_none() {
                *updates = None;
            }
            update
        }
        None => std::future::pending().await,
    }
}

fn handle_push(mango: &Arc<MangoStore>, update: AccountUpdate) {
    let snapshot = match mango
        .client()
        .decode_mango_account(&update.address, &update.data, update.slot)
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Dropping undecodable push update at slot {}: {}", update.slot, e);
            return;
        }
    };

    // Push carries account bytes only; open orders live in separate accounts
    if mango.apply_account_update(snapshot).is_applied() {
        let mango = mango.clone();
        tokio::spawn(async move {
            if let Err(e) = mango.fetch_open_orders().await {
                warn!("Open orders refresh after push failed: {}", e);
            }
        });
    }
}

fn refresh_history(mango: Arc<MangoStore>) {
    tokio::spawn(async move {
        let (activity, trades) =
            tokio::join!(mango.fetch_activity_feed(), mango.fetch_trade_history());
        if let Err(e) = activity {
            warn!("Activity feed refresh failed: {}", e);
        }
        if let Err(e) = trades {
            warn!("Trade history refresh failed: {}", e);
        }
    });
}
