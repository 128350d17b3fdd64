//! Shared fixtures for the synchronization integration tests

#![allow(dead_code)]

use account_sync::sim::{self, MemoryPubSub, SimDataApi, SimProgramClient};
use account_sync::{ConnectionHandle, MangoStore, MemoryStore, SyncConfig};
use std::sync::Arc;
use std::time::Duration;
use types::Address;

pub struct Harness {
    pub wallet: Address,
    pub client: Arc<SimProgramClient>,
    pub data_api: Arc<SimDataApi>,
    pub local: Arc<MemoryStore>,
    pub mango: Arc<MangoStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(mut config: SyncConfig) -> Self {
        let wallet = Address::from_seed(42);
        config.group = sim::demo_group().address.to_string();

        let client = Arc::new(SimProgramClient::new(sim::demo_group(), wallet));
        let data_api = Arc::new(SimDataApi::new());
        let local = Arc::new(MemoryStore::new());
        let mango = Arc::new(
            MangoStore::new(config, client.clone(), data_api.clone(), local.clone())
                .expect("valid config"),
        );

        Self {
            wallet,
            client,
            data_api,
            local,
            mango,
        }
    }

    /// Put `count` accounts on the simulated chain at `slot`, load the group and discover them
    pub async fn with_accounts(self, count: u32, slot: u64) -> Self {
        for account_num in 0..count {
            let account = sim::demo_account(self.wallet, account_num, slot);
            self.client
                .set_open_orders(account.address, sim::demo_open_orders(&account));
            self.client.put_account(account);
        }
        self.mango.fetch_group().await.expect("group loads");
        self.mango
            .fetch_mango_accounts(self.wallet)
            .await
            .expect("accounts load");
        self
    }

    pub fn account_address(&self, account_num: u32) -> Address {
        sim::demo_account(self.wallet, account_num, 0).address
    }
}

pub async fn memory_connection() -> (Arc<MemoryPubSub>, Arc<ConnectionHandle>) {
    let transport = Arc::new(MemoryPubSub::new());
    let connection = Arc::new(
        ConnectionHandle::new(transport.clone())
            .await
            .expect("keep-alive subscription"),
    );
    (transport, connection)
}

/// Poll `condition` every 10ms, giving up after two seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
