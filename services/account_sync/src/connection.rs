//! Long-lived subscription handle to the chain endpoint
//!
//! Several pub/sub client libraries tear their socket down as soon as the
//! subscription list becomes empty, after which new subscriptions silently
//! receive nothing. [`ConnectionHandle`] holds a keep-alive subscription on a
//! throwaway address for its whole lifetime so the list never drains.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use types::{Address, Slot};

/// Transport-assigned subscription identifier
pub type SubscriptionId = u64;

/// Raw account change delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpdate {
    pub address: Address,
    pub slot: Slot,
    pub data: Vec<u8>,
}

/// Account-change pub/sub endpoint
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Start forwarding changes of `address` into `sink`
    async fn subscribe_account(
        &self,
        address: Address,
        sink: mpsc::UnboundedSender<AccountUpdate>,
    ) -> Result<SubscriptionId>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    async fn get_slot(&self) -> Result<Slot>;
}

/// Live subscription returned by [`ConnectionHandle::on_account_change`]
#[derive(Debug)]
pub struct AccountSubscription {
    pub id: SubscriptionId,
    pub address: Address,
    pub updates: mpsc::UnboundedReceiver<AccountUpdate>,
}

/// Process-wide connection shared by every subscriber
pub struct ConnectionHandle {
    transport: Arc<dyn PubSubTransport>,
    keep_alive: SubscriptionId,
    keep_alive_address: Address,
    active: Mutex<HashMap<SubscriptionId, Address>>,
    drain: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Wrap `transport` and install the keep-alive subscription
    pub async fn new(transport: Arc<dyn PubSubTransport>) -> Result<Self> {
        let keep_alive_address = Address::new(rand::random());
        let (tx, mut rx) = mpsc::unbounded_channel::<AccountUpdate>();
        let keep_alive = transport.subscribe_account(keep_alive_address, tx).await?;

        // Nothing is expected on the dummy address; drain so the channel never grows
        let drain = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                trace!("Keep-alive update at slot {}", update.slot);
            }
        });

        info!(
            "Connection ready, keep-alive subscription {} on {}",
            keep_alive,
            keep_alive_address.short()
        );

        Ok(Self {
            transport,
            keep_alive,
            keep_alive_address,
            active: Mutex::new(HashMap::new()),
            drain,
        })
    }

    /// Subscribe to changes of one account
    pub async fn on_account_change(&self, address: Address) -> Result<AccountSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.transport.subscribe_account(address, tx).await?;
        self.active.lock().insert(id, address);
        debug!("Subscribed {} to account {}", id, address.short());

        Ok(AccountSubscription {
            id,
            address,
            updates: rx,
        })
    }

    /// Remove a subscription; the keep-alive cannot be removed
    pub async fn remove_account_change_listener(&self, id: SubscriptionId) -> Result<()> {
        if id == self.keep_alive {
            warn!("Refusing to remove keep-alive subscription {}", id);
            return Ok(());
        }

        let removed = self.active.lock().remove(&id);
        match removed {
            Some(address) => {
                self.transport.unsubscribe(id).await?;
                debug!("Unsubscribed {} from account {}", id, address.short());
            }
            None => debug!("Subscription {} already removed", id),
        }
        Ok(())
    }

    pub async fn get_slot(&self) -> Result<Slot> {
        self.transport.get_slot().await
    }

    pub fn keep_alive_id(&self) -> SubscriptionId {
        self.keep_alive
    }

    pub fn keep_alive_address(&self) -> Address {
        self.keep_alive_address
    }

    /// Subscriptions opened through this handle, keep-alive excluded
    pub fn active_subscriptions(&self) -> usize {
        self.active.lock().len()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemoryPubSub;

    #[tokio::test]
    async fn test_keep_alive_installed_on_creation() {
        let transport = Arc::new(MemoryPubSub::new());
        let handle = ConnectionHandle::new(transport.clone()).await.unwrap();

        assert_eq!(transport.subscription_count(), 1);
        assert_eq!(handle.active_subscriptions(), 0);
        assert!(transport.is_subscribed(&handle.keep_alive_address()));
    }

    #[tokio::test]
    async fn test_removing_keep_alive_is_refused() {
        let transport = Arc::new(MemoryPubSub::new());
        let handle = ConnectionHandle::new(transport.clone()).await.unwrap();

        handle
            .remove_account_change_listener(handle.keep_alive_id())
            .await
            .unwrap();
        assert_eq!(transport.subscription_count(), 1);
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let transport = Arc::new(MemoryPubSub::new());
        let handle = ConnectionHandle::new(transport.clone()).await.unwrap();
        let address = Address::from_seed(5);

        let mut sub = handle.on_account_change(address).await.unwrap();
        assert_eq!(handle.active_subscriptions(), 1);
        assert_eq!(transport.publish(&address, 9, vec![1, 2, 3]), 1);

        let update = sub.updates.recv().await.unwrap();
        assert_eq!(update.slot, 9);
        assert_eq!(update.data, vec![1, 2, 3]);

        handle.remove_account_change_listener(sub.id).await.unwrap();
        assert_eq!(handle.active_subscriptions(), 0);
        assert_eq!(transport.publish(&address, 10, vec![]), 0);
        // Removing twice is a no-op
        handle.remove_account_change_listener(sub.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_slot_passes_through() {
        let transport = Arc::new(MemoryPubSub::new());
        transport.set_slot(1234);
        let handle = ConnectionHandle::new(transport).await.unwrap();
        assert_eq!(handle.get_slot().await.unwrap(), 1234);
    }
}
