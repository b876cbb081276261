//! Aggregate consistency layer
//!
//! Tasks never write the store. Their deltas land in a [`RunAccumulator`]
//! owned by the run, and [`AggregateMerger::merge_all`] later performs one
//! read → merge → write cycle per target document. A document is only written
//! when some entry actually changed, so replaying an identical accumulator is
//! a no-op.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::application::index_diff::IndexDiff;
use crate::application::work_plan::WorkPlanEntry;
use crate::domain::services::DocumentStore;
use crate::domain::{
    AggregateDocument, CrawlMode, CrawlRecord, ImageMeta, ItemDetails, ItemDocument,
    ItemDocumentPatch, ItemId, MarketId, MarketSnapshot, Mergeable, RetentionMetaEntry, ShareEntry,
    ShippingMeta, ShippingOption, ShippingSummary, SyncError, SyncResult, keys,
};

/// Per-run deltas, one map per target document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunAccumulator {
    pub snapshots: BTreeMap<MarketId, MarketSnapshot>,
    pub retention_meta: AggregateDocument<RetentionMetaEntry>,
    pub shares: AggregateDocument<ShareEntry>,
    pub shipping_summary: BTreeMap<MarketId, AggregateDocument<ShippingSummary>>,
    pub shipping_meta: AggregateDocument<ShippingMeta>,
    pub image_meta: AggregateDocument<ImageMeta>,
    pub crawl_state: AggregateDocument<CrawlRecord>,
    pub item_patches: BTreeMap<ItemId, ItemDocumentPatch>,
    pub shipping_details: BTreeMap<(MarketId, ItemId), Vec<ShippingOption>>,
}

fn summarize(options: &[ShippingOption], at: DateTime<Utc>) -> ShippingSummary {
    let prices = options.iter().map(|option| option.price);
    ShippingSummary {
        min_price: prices.clone().reduce(f64::min),
        max_price: prices.reduce(f64::max),
        currency: options.iter().find_map(|option| option.currency.clone()),
        option_count: u32::try_from(options.len()).unwrap_or(u32::MAX),
        updated_at: Some(at),
    }
}

impl RunAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots of the markets that loaded, plus an index sighting for every
    /// active item.
    pub fn record_index(&mut self, diff: &IndexDiff, now: DateTime<Utc>) {
        for market in diff.loaded_markets() {
            if let Some(snapshot) = diff.snapshots.get(market) {
                self.snapshots.insert(market.clone(), snapshot.clone());
            }
        }

        let reasons = diff.update_reasons();
        for id in diff.active.keys() {
            let reason = reasons.get(id).map(|reason| (*reason).to_string());
            self.retention_meta
                .insert(id.clone(), RetentionMetaEntry::seen_at(now, reason));
        }
    }

    /// Folds one successful task's details into the per-document maps.
    pub fn record_success(
        &mut self,
        entry: &WorkPlanEntry,
        details: ItemDetails,
        at: DateTime<Utc>,
    ) {
        let id = &entry.id;
        let description_captured = details.description.is_captured();

        if let Some(link) = details.share_link.captured() {
            self.shares.insert(
                id.clone(),
                ShareEntry {
                    link: link.clone(),
                    first_captured_at: Some(at),
                    updated_at: Some(at),
                },
            );
        }

        let mut shipping_markets = BTreeSet::new();
        for (market, field) in &details.shipping {
            let Some(options) = field.captured() else {
                continue;
            };
            self.shipping_summary
                .entry(market.clone())
                .or_default()
                .insert(id.clone(), summarize(options, at));
            self.shipping_details
                .insert((market.clone(), id.clone()), options.clone());
            shipping_markets.insert(market.clone());
        }
        if !shipping_markets.is_empty() {
            self.shipping_meta.insert(
                id.clone(),
                ShippingMeta {
                    markets: shipping_markets,
                    first_captured_at: Some(at),
                    last_captured_at: Some(at),
                },
            );
        }

        if let Some(hashes) = details.images.captured() {
            self.image_meta.insert(
                id.clone(),
                ImageMeta {
                    hashes: hashes.clone(),
                    first_captured_at: Some(at),
                    updated_at: Some(at),
                },
            );
        }

        // A full crawl only counts once the description made it.
        let completed_full = entry.mode == CrawlMode::Full && description_captured;
        self.crawl_state.insert(
            id.clone(),
            CrawlRecord {
                last_full_crawl: completed_full.then_some(at),
                last_refresh: Some(at),
                last_indexed_signature: completed_full.then(|| entry.current.sig.clone()),
                last_indexed_lua: (completed_full && !entry.current.lua.is_empty())
                    .then(|| entry.current.lua.clone()),
            },
        );

        let ItemDetails {
            reviews, description, ..
        } = details;
        self.item_patches.insert(
            id.clone(),
            ItemDocumentPatch {
                id: id.clone(),
                markets: entry.markets.iter().cloned().collect(),
                description: description.into_captured(),
                reviews: reviews.into_captured(),
                refreshed_at: at,
            },
        );
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub documents_written: usize,
    pub documents_unchanged: usize,
    pub entries_updated: usize,
    pub failed_documents: Vec<String>,
}

impl MergeReport {
    fn record(&mut self, key: &str, outcome: SyncResult<usize>) -> Option<SyncError> {
        match outcome {
            Ok(0) => {
                self.documents_unchanged += 1;
                None
            }
            Ok(updated) => {
                self.documents_written += 1;
                self.entries_updated += updated;
                None
            }
            Err(e) => {
                error!("❌ Merge of {} failed: {}", key, e);
                self.failed_documents.push(key.to_string());
                Some(e)
            }
        }
    }
}

/// Single writer for every shared document of a run.
pub struct AggregateMerger {
    store: Arc<dyn DocumentStore>,
}

impl AggregateMerger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Read-merge-write of one keyed aggregate. Returns how many entries changed.
    pub async fn merge_document<V: Mergeable>(
        &self,
        key: &str,
        delta: &AggregateDocument<V>,
    ) -> SyncResult<usize> {
        if delta.is_empty() {
            return Ok(0);
        }
        let mut document: AggregateDocument<V> =
            self.store.get_json(key).await?.unwrap_or_default();

        let mut updated = 0;
        for (id, incoming) in delta {
            let merged = match document.get(id) {
                Some(stored) => stored.merge(incoming),
                None => incoming.clone(),
            };
            if document.get(id) != Some(&merged) {
                document.insert(id.clone(), merged);
                updated += 1;
            }
        }

        if updated > 0 {
            self.store.put_json(key, &document).await?;
            debug!("💾 {}: {} entries updated", key, updated);
        }
        Ok(updated)
    }

    /// Writes `value` at `key` unless the stored document already equals it.
    async fn replace_if_changed<T>(&self, key: &str, value: &T) -> SyncResult<usize>
    where
        T: Serialize + DeserializeOwned + PartialEq + Sync,
    {
        let stored: Option<T> = self.store.get_json(key).await?;
        if stored.as_ref() == Some(value) {
            return Ok(0);
        }
        self.store.put_json(key, value).await?;
        Ok(1)
    }

    async fn patch_item(&self, patch: &ItemDocumentPatch) -> SyncResult<usize> {
        let key = keys::item(&patch.id);
        let stored: Option<ItemDocument> = self.store.get_json(&key).await?;
        let patched = patch.apply(stored.as_ref());
        if stored.as_ref() == Some(&patched) {
            return Ok(0);
        }
        self.store.put_json(&key, &patched).await?;
        Ok(1)
    }

    /// Applies every accumulated delta, one document at a time.
    ///
    /// A failing document does not stop the others; the first error is
    /// returned after the pass so the run reports it.
    pub async fn merge_all(&self, acc: &RunAccumulator) -> SyncResult<MergeReport> {
        let mut report = MergeReport::default();
        let mut first_error = None;
        let mut note = |report: &mut MergeReport, key: &str, outcome| {
            if let Some(e) = report.record(key, outcome) {
                first_error.get_or_insert(e);
            }
        };

        for (market, snapshot) in &acc.snapshots {
            let key = keys::snapshot(market);
            let outcome = self.replace_if_changed(&key, snapshot).await;
            note(&mut report, &key, outcome);
        }
        for patch in acc.item_patches.values() {
            let key = keys::item(&patch.id);
            let outcome = self.patch_item(patch).await;
            note(&mut report, &key, outcome);
        }
        for ((market, id), options) in &acc.shipping_details {
            let key = keys::shipping_detail(market, id);
            let outcome = self.replace_if_changed(&key, options).await;
            note(&mut report, &key, outcome);
        }
        for (market, summaries) in &acc.shipping_summary {
            let key = keys::shipping_summary(market);
            let outcome = self.merge_document(&key, summaries).await;
            note(&mut report, &key, outcome);
        }

        let outcome = self.merge_document(keys::SHARES, &acc.shares).await;
        note(&mut report, keys::SHARES, outcome);
        let outcome = self.merge_document(keys::SHIPPING_META, &acc.shipping_meta).await;
        note(&mut report, keys::SHIPPING_META, outcome);
        let outcome = self.merge_document(keys::IMAGE_META, &acc.image_meta).await;
        note(&mut report, keys::IMAGE_META, outcome);
        let outcome = self.merge_document(keys::RETENTION_META, &acc.retention_meta).await;
        note(&mut report, keys::RETENTION_META, outcome);
        // Last, so a crashed merge leaves items due for a re-crawl.
        let outcome = self.merge_document(keys::CRAWL_STATE, &acc.crawl_state).await;
        note(&mut report, keys::CRAWL_STATE, outcome);

        info!(
            "🧩 Merge: {} documents written, {} unchanged, {} entries updated",
            report.documents_written, report.documents_unchanged, report.entries_updated
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
