//! Ordered work plan built from the index diff and the stored crawl records
//!
//! Full-mode entries always precede partial-mode entries. Each entry gets its
//! rank in the whole plan as a stable `position` before anything is dispatched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::application::crawl_decision::{DecisionRule, decide_crawl};
use crate::application::index_diff::IndexDiff;
use crate::domain::{AggregateDocument, CrawlMode, CrawlRecord, ItemId, MarketId, SnapshotEntry};
use crate::infrastructure::config::CrawlConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkPlanEntry {
    pub id: ItemId,
    pub markets: Vec<MarketId>,
    pub mode: CrawlMode,
    pub position: usize,
    pub rule: DecisionRule,
    /// Index state the crawl acts upon; recorded on success.
    #[serde(skip)]
    pub current: SnapshotEntry,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkPlan {
    pub entries: Vec<WorkPlanEntry>,
    /// Active items that needed no crawl this run.
    pub skipped: usize,
}

impl WorkPlan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn count(&self, mode: CrawlMode) -> usize {
        self.entries.iter().filter(|entry| entry.mode == mode).count()
    }

    /// How many entries each decision rule produced.
    #[must_use]
    pub fn rule_counts(&self) -> BTreeMap<DecisionRule, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.rule).or_insert(0) += 1;
        }
        counts
    }
}

pub fn build_work_plan(
    diff: &IndexDiff,
    records: &AggregateDocument<CrawlRecord>,
    now: DateTime<Utc>,
    config: &CrawlConfig,
) -> WorkPlan {
    let mut full = Vec::new();
    let mut partial = Vec::new();
    let mut skipped = 0;

    for (id, active) in &diff.active {
        let verdict = decide_crawl(records.get(id), &active.entry, now, config);
        let Some(mode) = verdict.decision.mode() else {
            skipped += 1;
            continue;
        };
        let entry = WorkPlanEntry {
            id: id.clone(),
            markets: active.markets.clone(),
            mode,
            position: 0,
            rule: verdict.rule,
            current: active.entry.clone(),
        };
        match mode {
            CrawlMode::Full => full.push(entry),
            CrawlMode::Partial => partial.push(entry),
        }
    }

    let mut entries = full;
    entries.extend(partial);
    for (position, entry) in entries.iter_mut().enumerate() {
        entry.position = position;
    }

    let plan = WorkPlan { entries, skipped };
    info!(
        "📋 Work plan: {} full, {} partial, {} up to date",
        plan.count(CrawlMode::Full),
        plan.count(CrawlMode::Partial),
        plan.skipped
    );
    plan
}
