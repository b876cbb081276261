//! Per-run context
//!
//! Everything a run needs is built once at process start and handed to the
//! stages by reference. No component keeps its own client or store handle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::domain::SyncResult;
use crate::domain::services::{Clock, DocumentStore, IndexSource, ItemDetailFetcher, SystemClock};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::document_store::build_document_store;
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::retry_policy::RetryPolicy;
use crate::infrastructure::upstream::{HttpIndexSource, HttpItemDetailFetcher};

#[derive(Clone)]
pub struct SyncContext {
    /// Unique id of this run, attached to log lines
    pub run_id: Uuid,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub index_source: Arc<dyn IndexSource>,
    pub fetcher: Arc<dyn ItemDetailFetcher>,
    pub clock: Arc<dyn Clock>,
    /// Cancelled on shutdown; gates new dispatch like the deadline does
    pub cancellation_token: CancellationToken,
}

impl SyncContext {
    #[must_use]
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        index_source: Arc<dyn IndexSource>,
        fetcher: Arc<dyn ItemDetailFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config: Arc::new(config),
            store,
            index_source,
            fetcher,
            clock,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Production wiring: configured store backend, HTTP adapters, system clock.
    pub fn from_config(config: AppConfig) -> SyncResult<Self> {
        let store = build_document_store(&config);
        let client = Arc::new(HttpClient::new(&config.upstream)?);
        let retry = RetryPolicy::from(&config.retry);
        let index_source = Arc::new(HttpIndexSource::new(
            client.clone(),
            config.upstream.clone(),
            retry.clone(),
        ));
        let fetcher = Arc::new(HttpItemDetailFetcher::new(client, config.upstream.clone(), retry));

        let context = Self::new(config, store, index_source, fetcher, Arc::new(SystemClock));
        info!(
            "🧭 Run {} for markets [{}]",
            context.run_id,
            context.config.run_markets().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(context)
    }

    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
