//! HTTP client for the stats/history REST API

use crate::client::DataApi;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use sync_config::service::endpoints;
use tracing::debug;
use types::{ActivityEntry, Address, TradeHistoryEntry};

/// reqwest-backed [`DataApi`]
pub struct HttpDataApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDataApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(300))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_millis(endpoints::DATA_API_TIMEOUT_MS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, account: &Address) -> String {
        format!("{}/{}?mango-account={}", self.base_url, path, account)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(SyncError::from)
    }
}

#[async_trait]
impl DataApi for HttpDataApi {
    async fn fetch_activity_feed(&self, account: &Address) -> Result<Vec<ActivityEntry>> {
        self.get_json(self.url("stats/activity-feed", account)).await
    }

    async fn fetch_trade_history(&self, account: &Address) -> Result<Vec<TradeHistoryEntry>> {
        self.get_json(self.url("stats/trade-history", account)).await
    }
}
