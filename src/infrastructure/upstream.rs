//! HTTP-backed index source and item-detail fetcher
//!
//! Both adapters speak to JSON endpoints described by URL templates in
//! [`UpstreamConfig`]. Each call goes through the shared [`RetryPolicy`],
//! moving to the next configured host on every retry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::item::{FieldResult, ItemDetails, Review, ShippingOption};
use crate::domain::services::{IndexSource, ItemDetailFetcher};
use crate::domain::{CrawlMode, IndexEntry, ItemId, MarketId};
use crate::infrastructure::config::UpstreamConfig;
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::retry_policy::RetryPolicy;

/// Fills `{name}` placeholders and checks the result parses as a URL.
pub fn render_url(template: &str, values: &[(&str, &str)]) -> SyncResult<String> {
    let rendered = values.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    });
    url::Url::parse(&rendered)
        .map(|url| url.to_string())
        .map_err(|e| SyncError::InvalidInput(format!("bad upstream url '{rendered}': {e}")))
}

fn host_for_attempt(hosts: &[String], attempt: u32) -> SyncResult<&str> {
    if hosts.is_empty() {
        return Err(SyncError::InvalidInput("upstream.hosts is empty".to_string()));
    }
    let index = usize::try_from(attempt).unwrap_or(0) % hosts.len();
    Ok(hosts[index].trim_end_matches('/'))
}

pub struct HttpIndexSource {
    client: Arc<HttpClient>,
    config: UpstreamConfig,
    retry: RetryPolicy,
}

impl HttpIndexSource {
    pub const fn new(client: Arc<HttpClient>, config: UpstreamConfig, retry: RetryPolicy) -> Self {
        Self { client, config, retry }
    }
}

#[async_trait]
impl IndexSource for HttpIndexSource {
    async fn fetch_index(&self, market: &MarketId) -> SyncResult<Vec<IndexEntry>> {
        let operation = format!("index fetch [{market}]");
        let entries: Vec<IndexEntry> = self
            .retry
            .run(&operation, |attempt| async move {
                let host = host_for_attempt(&self.config.hosts, attempt)?;
                let url = render_url(
                    &self.config.index_url_template,
                    &[("host", host), ("market", market.as_str())],
                )?;
                self.client.get_json(&url).await
            })
            .await?;
        debug!("📥 Market {} index: {} entries", market, entries.len());
        Ok(entries)
    }
}

/// Wire shape of the item-detail endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetailPayload {
    pub reviews: Option<Vec<Review>>,
    pub description: Option<String>,
    pub shipping: BTreeMap<MarketId, Vec<ShippingOption>>,
    pub share_link: Option<String>,
    pub images: Option<BTreeSet<String>>,
    /// Field name (`shipping.<market>` for shipping) -> failure reason.
    pub errors: BTreeMap<String, String>,
}

impl DetailPayload {
    fn field<T>(&self, name: &str, value: Option<T>) -> FieldResult<T> {
        match (self.errors.get(name), value) {
            (Some(reason), _) => FieldResult::Failed(reason.clone()),
            (None, Some(value)) => FieldResult::Captured(value),
            (None, None) => FieldResult::NotYetAvailable,
        }
    }

    /// Maps the payload to per-field results, keeping only what `mode` asked for.
    pub fn into_details(mut self, markets: &[MarketId], mode: CrawlMode) -> ItemDetails {
        let reviews = self.reviews.take();
        let mut details = ItemDetails {
            reviews: self.field("reviews", reviews),
            ..ItemDetails::default()
        };
        if mode == CrawlMode::Partial {
            return details;
        }

        let description = self.description.take();
        let share_link = self.share_link.take();
        let images = self.images.take();
        details.description = self.field("description", description);
        details.share_link = self.field("shareLink", share_link);
        details.images = self.field("images", images);
        for market in markets {
            let options = self.shipping.remove(market);
            let field = self.field(&format!("shipping.{market}"), options);
            details.shipping.insert(market.clone(), field);
        }
        details
    }
}

pub struct HttpItemDetailFetcher {
    client: Arc<HttpClient>,
    config: UpstreamConfig,
    retry: RetryPolicy,
}

impl HttpItemDetailFetcher {
    pub const fn new(client: Arc<HttpClient>, config: UpstreamConfig, retry: RetryPolicy) -> Self {
        Self { client, config, retry }
    }
}

#[async_trait]
impl ItemDetailFetcher for HttpItemDetailFetcher {
    async fn fetch_item(
        &self,
        id: &ItemId,
        markets: &[MarketId],
        mode: CrawlMode,
    ) -> SyncResult<ItemDetails> {
        let joined_markets = markets.join(",");
        let mode_name = mode.to_string();
        let operation = format!("item fetch [{id}]");
        let payload: DetailPayload = self
            .retry
            .run(&operation, |attempt| {
                let joined_markets = joined_markets.as_str();
                let mode_name = mode_name.as_str();
                async move {
                    let host = host_for_attempt(&self.config.hosts, attempt)?;
                    let url = render_url(
                        &self.config.detail_url_template,
                        &[
                            ("host", host),
                            ("id", id.as_str()),
                            ("markets", joined_markets),
                            ("mode", mode_name),
                        ],
                    )?;
                    self.client.get_json(&url).await
                }
            })
            .await?;
        Ok(payload.into_details(markets, mode))
    }
}
