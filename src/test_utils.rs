//! Test utilities for catalog-sync
//!
//! Scripted collaborators and a ready-made [`SyncContext`] over an in-memory
//! store and a manual clock, so tests are hermetic and time is explicit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::application::context::SyncContext;
use crate::domain::services::{IndexSource, ItemDetailFetcher, ManualClock};
use crate::domain::{
    CrawlMode, FieldResult, IndexEntry, ItemDetails, ItemId, MarketId, SyncError, SyncResult,
};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::document_store::MemoryDocumentStore;

/// Index entry with fixed seller and prices.
pub fn index_entry(id: &str, lua: &str) -> IndexEntry {
    IndexEntry {
        id: id.to_string(),
        seller_id: "seller-1".to_string(),
        price_min: 10.0,
        price_max: 20.0,
        variant_count: 1,
        last_updated_at: (!lua.is_empty()).then(|| lua.to_string()),
    }
}

/// Index source answering from a fixed table; unknown markets fail transiently.
#[derive(Default)]
pub struct FakeIndexSource {
    markets: Mutex<BTreeMap<MarketId, SyncResult<Vec<IndexEntry>>>>,
}

impl FakeIndexSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_market(self, market: &str, entries: Vec<IndexEntry>) -> Self {
        self.set_market(market, entries);
        self
    }

    #[must_use]
    pub fn with_error(self, market: &str, error: SyncError) -> Self {
        self.lock().insert(market.to_string(), Err(error));
        self
    }

    /// Replaces a market's index between runs.
    pub fn set_market(&self, market: &str, entries: Vec<IndexEntry>) {
        self.lock().insert(market.to_string(), Ok(entries));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<MarketId, SyncResult<Vec<IndexEntry>>>> {
        self.markets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl IndexSource for FakeIndexSource {
    async fn fetch_index(&self, market: &MarketId) -> SyncResult<Vec<IndexEntry>> {
        self.lock()
            .get(market)
            .cloned()
            .unwrap_or_else(|| Err(SyncError::transient(market.as_str(), "no such market")))
    }
}

/// Detail fetcher returning canned results.
///
/// Items without a script get a complete payload built by [`full_details`].
/// Every call is recorded, and each call can advance a shared clock.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<BTreeMap<ItemId, SyncResult<ItemDetails>>>,
    calls: Mutex<Vec<(ItemId, CrawlMode)>>,
    tick: Option<(ManualClock, Duration)>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_result(self, id: &str, result: SyncResult<ItemDetails>) -> Self {
        self.set_result(id, result);
        self
    }

    /// Changes what `id` returns from now on.
    pub fn set_result(&self, id: &str, result: SyncResult<ItemDetails>) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), result);
    }

    /// Advance `clock` by `step` on every fetch.
    #[must_use]
    pub fn ticking(mut self, clock: ManualClock, step: Duration) -> Self {
        self.tick = Some((clock, step));
        self
    }

    pub fn calls(&self) -> Vec<(ItemId, CrawlMode)> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Every field captured, with one image hash derived from the id.
pub fn full_details(id: &str, markets: &[MarketId]) -> ItemDetails {
    ItemDetails {
        reviews: FieldResult::Captured(Vec::new()),
        description: FieldResult::Captured(format!("description of {id}")),
        shipping: markets
            .iter()
            .map(|market| {
                let option = crate::domain::ShippingOption {
                    method: "standard".to_string(),
                    price: 4.99,
                    currency: Some("USD".to_string()),
                    days_min: Some(3),
                    days_max: Some(7),
                };
                (market.clone(), FieldResult::Captured(vec![option]))
            })
            .collect(),
        share_link: FieldResult::Captured(format!("https://share.example/{id}")),
        images: FieldResult::Captured(BTreeSet::from([format!("{id}-h1")])),
    }
}

#[async_trait]
impl ItemDetailFetcher for ScriptedFetcher {
    async fn fetch_item(
        &self,
        id: &ItemId,
        markets: &[MarketId],
        mode: CrawlMode,
    ) -> SyncResult<ItemDetails> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id.clone(), mode));
        if let Some((clock, step)) = &self.tick {
            clock.advance(*step);
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        scripted.unwrap_or_else(|| Ok(full_details(id, markets)))
    }
}

/// Context over a fresh [`MemoryDocumentStore`] and a [`ManualClock`] at `start`.
pub fn test_context(
    markets: &[&str],
    index_source: impl IndexSource + 'static,
    fetcher: impl ItemDetailFetcher + 'static,
    start: DateTime<Utc>,
) -> (SyncContext, Arc<MemoryDocumentStore>, ManualClock) {
    let clock = ManualClock::new(start);
    let (context, store) =
        test_context_with_clock(markets, Arc::new(index_source), Arc::new(fetcher), clock.clone());
    (context, store, clock)
}

/// Same as [`test_context`] with shared collaborators and an existing clock.
pub fn test_context_with_clock(
    markets: &[&str],
    index_source: Arc<dyn IndexSource>,
    fetcher: Arc<dyn ItemDetailFetcher>,
    clock: ManualClock,
) -> (SyncContext, Arc<MemoryDocumentStore>) {
    let mut config = AppConfig::default();
    config.markets = markets.iter().map(|market| (*market).to_string()).collect();
    let store = Arc::new(MemoryDocumentStore::new());
    let context = SyncContext::new(config, store.clone(), index_source, fetcher, Arc::new(clock));
    (context, store)
}
