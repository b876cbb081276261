//! Retention pruner
//!
//! Active, grace and expired states are re-derived on every run from two
//! inputs: the union of current market indexes and each tracked item's `lsi`.
//! Nothing is marked ahead of time. [`RetentionPruner::plan`] is the only
//! decision path; a confirmed run applies exactly the plan a dry-run reports.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::retention::{classify_retention, retention_cutoff};
use crate::domain::services::{Clock, DocumentStore, IndexSource};
use crate::domain::{
    AggregateDocument, CrawlRecord, ImageMeta, ItemId, MarketId, MarketSnapshot, Mergeable,
    RetentionMetaEntry, RetentionState, ShareEntry, ShippingMeta, ShippingSummary, SyncError,
    SyncResult, keys,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PruneMode {
    DryRun,
    Confirmed,
}

impl fmt::Display for PruneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DryRun => write!(f, "dry-run"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunePlan {
    pub cutoff: Option<DateTime<Utc>>,
    pub tracked: usize,
    pub active: usize,
    pub grace: Vec<ItemId>,
    pub expired: Vec<ItemId>,
    /// Store keys holding documents of expired items.
    pub expired_documents: Vec<String>,
    /// Image folder hashes referenced by no tracked item.
    pub orphan_folders: Vec<String>,
    /// Every store key under the orphan folders.
    pub orphan_keys: Vec<String>,
    /// Markets whose index failed and whose stored snapshot stood in.
    pub fallback_markets: Vec<MarketId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub mode: PruneMode,
    pub plan: PrunePlan,
    pub deleted_documents: usize,
    pub deleted_assets: usize,
    pub aggregates_rewritten: usize,
}

impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] tracked={} active={} grace={} expired={} orphanFolders={} \
             deletedDocuments={} deletedAssets={}",
            self.mode,
            self.plan.tracked,
            self.plan.active,
            self.plan.grace.len(),
            self.plan.expired.len(),
            self.plan.orphan_folders.len(),
            self.deleted_documents,
            self.deleted_assets
        )
    }
}

pub struct RetentionPruner {
    store: Arc<dyn DocumentStore>,
    index_source: Arc<dyn IndexSource>,
    clock: Arc<dyn Clock>,
    markets: Vec<MarketId>,
    window_days: u32,
}

impl RetentionPruner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index_source: Arc<dyn IndexSource>,
        clock: Arc<dyn Clock>,
        markets: Vec<MarketId>,
        window_days: u32,
    ) -> Self {
        Self {
            store,
            index_source,
            clock,
            markets,
            window_days,
        }
    }

    /// Union of ids listed by any market right now.
    ///
    /// A market whose index cannot be fetched counts with its stored snapshot.
    /// If that cannot be read either, pruning stops: an unknown active set
    /// must never turn into deletions.
    async fn active_union(&self, plan: &mut PrunePlan) -> SyncResult<BTreeSet<ItemId>> {
        let mut union = BTreeSet::new();
        for market in &self.markets {
            match self.index_source.fetch_index(market).await {
                Ok(entries) => union.extend(entries.into_iter().map(|entry| entry.id)),
                Err(e @ SyncError::AuthRequired { .. }) => return Err(e),
                Err(e) => {
                    let snapshot: Option<MarketSnapshot> =
                        self.store.get_json(&keys::snapshot(market)).await?;
                    let Some(snapshot) = snapshot else {
                        warn!("⚠️ Market {} index failed and no snapshot is stored", market);
                        return Err(e);
                    };
                    warn!(
                        "⚠️ Market {} index failed ({}), using {} stored snapshot ids",
                        market,
                        e,
                        snapshot.len()
                    );
                    union.extend(snapshot.into_keys());
                    plan.fallback_markets.push(market.clone());
                }
            }
        }
        Ok(union)
    }

    async fn load<V: Mergeable>(&self, key: &str) -> SyncResult<AggregateDocument<V>> {
        Ok(self.store.get_json(key).await?.unwrap_or_default())
    }

    /// Computes what a prune would delete. Reads only.
    pub async fn plan(&self) -> SyncResult<PrunePlan> {
        let now = self.clock.now();
        let cutoff = retention_cutoff(now, self.window_days);
        let mut plan = PrunePlan {
            cutoff: Some(cutoff),
            ..PrunePlan::default()
        };

        let active = self.active_union(&mut plan).await?;
        let retention: AggregateDocument<RetentionMetaEntry> =
            self.load(keys::RETENTION_META).await?;
        plan.tracked = retention.len();

        for (id, entry) in &retention {
            match classify_retention(active.contains(id), entry.lsi, cutoff) {
                RetentionState::Active => plan.active += 1,
                RetentionState::Grace => plan.grace.push(id.clone()),
                RetentionState::Expired => plan.expired.push(id.clone()),
            }
        }

        let expired: BTreeSet<&str> = plan.expired.iter().map(String::as_str).collect();
        for id in &plan.expired {
            let item_key = keys::item(id);
            if self.store.get(&item_key).await?.is_some() {
                plan.expired_documents.push(item_key);
            }
        }
        for key in self.store.list(keys::SHIPPING_PREFIX).await? {
            let owner = key
                .rsplit('/')
                .next()
                .and_then(|file| file.strip_suffix(".json"));
            if owner.is_some_and(|id| expired.contains(id)) {
                plan.expired_documents.push(key);
            }
        }

        let images: AggregateDocument<ImageMeta> = self.load(keys::IMAGE_META).await?;
        let referenced: BTreeSet<&str> = images
            .iter()
            .filter(|(id, _)| !expired.contains(id.as_str()))
            .flat_map(|(_, meta)| meta.hashes.iter().map(String::as_str))
            .collect();
        let mut orphans = BTreeSet::new();
        for key in self.store.list(keys::IMAGES_PREFIX).await? {
            if let Some(folder) = keys::image_folder(&key) {
                if !referenced.contains(folder) {
                    orphans.insert(folder.to_string());
                    plan.orphan_keys.push(key);
                }
            }
        }
        plan.orphan_folders = orphans.into_iter().collect();

        info!(
            "🧮 Retention plan (cutoff {}): {} tracked, {} active, {} grace, {} expired, \
             {} orphan image folders",
            cutoff,
            plan.tracked,
            plan.active,
            plan.grace.len(),
            plan.expired.len(),
            plan.orphan_folders.len()
        );
        Ok(plan)
    }

    /// Drops `ids` from the keyed aggregate at `key`; writes only if something was removed.
    async fn remove_entries<V: Mergeable>(&self, key: &str, ids: &[ItemId]) -> SyncResult<bool> {
        let mut document: AggregateDocument<V> = self.load(key).await?;
        let before = document.len();
        for id in ids {
            document.remove(id);
        }
        if document.len() == before {
            return Ok(false);
        }
        self.store.put_json(key, &document).await?;
        Ok(true)
    }

    async fn apply(&self, plan: &PrunePlan) -> SyncResult<PruneReport> {
        let mut report = PruneReport {
            mode: PruneMode::Confirmed,
            plan: plan.clone(),
            deleted_documents: 0,
            deleted_assets: 0,
            aggregates_rewritten: 0,
        };

        for key in &plan.expired_documents {
            self.store.delete(key).await?;
            report.deleted_documents += 1;
        }

        if !plan.expired.is_empty() {
            let expired = &plan.expired;
            let mut rewritten = vec![
                self.remove_entries::<ShareEntry>(keys::SHARES, expired).await?,
                self.remove_entries::<ShippingMeta>(keys::SHIPPING_META, expired).await?,
                self.remove_entries::<ImageMeta>(keys::IMAGE_META, expired).await?,
                self.remove_entries::<CrawlRecord>(keys::CRAWL_STATE, expired).await?,
            ];
            let summary_keys = self.store.list(keys::SHIPPING_SUMMARY_PREFIX).await?;
            for key in summary_keys {
                rewritten.push(self.remove_entries::<ShippingSummary>(&key, &plan.expired).await?);
            }
            // Retention metadata last: a crash before this point retries next run.
            rewritten.push(
                self.remove_entries::<RetentionMetaEntry>(keys::RETENTION_META, &plan.expired)
                    .await?,
            );
            report.aggregates_rewritten = rewritten.into_iter().filter(|changed| *changed).count();
        }

        for key in &plan.orphan_keys {
            self.store.delete(key).await?;
            report.deleted_assets += 1;
        }

        info!("🗑️ Prune applied: {}", report);
        Ok(report)
    }

    /// Plans, then deletes only if `confirm` is set.
    pub async fn run(&self, confirm: bool) -> SyncResult<PruneReport> {
        let plan = self.plan().await?;
        if confirm {
            return self.apply(&plan).await;
        }
        let report = PruneReport {
            mode: PruneMode::DryRun,
            plan,
            deleted_documents: 0,
            deleted_assets: 0,
            aggregates_rewritten: 0,
        };
        info!("🔎 Prune preview: {}", report);
        Ok(report)
    }
}
