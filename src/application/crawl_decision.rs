//! Crawl-kind decision
//!
//! Pure mapping from `(record, current signature, now, config)` to full,
//! partial or skip. No store access; the caller supplies `now`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::{CrawlDecision, CrawlMode, CrawlRecord, SnapshotEntry};
use crate::infrastructure::config::CrawlConfig;

/// Which rule produced a decision, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    Forced,
    FixedMode,
    NewItem,
    NeverFullyCrawled,
    FullRefreshDue,
    CatalogChanged,
    PartialRefreshDue,
    UpToDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub decision: CrawlDecision,
    pub rule: DecisionRule,
}

impl Verdict {
    const fn crawl(mode: CrawlMode, rule: DecisionRule) -> Self {
        Self {
            decision: CrawlDecision::Crawl(mode),
            rule,
        }
    }
}

fn older_than(at: Option<DateTime<Utc>>, now: DateTime<Utc>, days: u32) -> bool {
    at.is_some_and(|at| now - at > Duration::days(i64::from(days)))
}

/// Whether the index shows something the last acted-upon crawl did not see.
fn catalog_changed(record: &CrawlRecord, current: &SnapshotEntry) -> bool {
    let sig_changed = record.last_indexed_signature.as_deref() != Some(current.sig.as_str());
    // ISO-8601 strings order chronologically
    let lua_newer = !current.lua.is_empty()
        && record
            .last_indexed_lua
            .as_deref()
            .is_none_or(|acted| current.lua.as_str() > acted);
    sig_changed || lua_newer
}

pub fn decide_crawl(
    record: Option<&CrawlRecord>,
    current: &SnapshotEntry,
    now: DateTime<Utc>,
    config: &CrawlConfig,
) -> Verdict {
    if config.force_full {
        return Verdict::crawl(CrawlMode::Full, DecisionRule::Forced);
    }
    if let Some(mode) = config.fixed_mode {
        return Verdict::crawl(mode, DecisionRule::FixedMode);
    }
    let Some(record) = record else {
        return Verdict::crawl(CrawlMode::Full, DecisionRule::NewItem);
    };
    if config.require_initial_full && record.last_full_crawl.is_none() {
        return Verdict::crawl(CrawlMode::Full, DecisionRule::NeverFullyCrawled);
    }
    if older_than(record.last_full_crawl, now, config.full_refresh_days) {
        return Verdict::crawl(CrawlMode::Full, DecisionRule::FullRefreshDue);
    }
    if catalog_changed(record, current) {
        return Verdict::crawl(CrawlMode::Full, DecisionRule::CatalogChanged);
    }
    if record.last_refresh.is_none()
        || older_than(record.last_refresh, now, config.partial_refresh_days)
    {
        return Verdict::crawl(CrawlMode::Partial, DecisionRule::PartialRefreshDue);
    }
    Verdict {
        decision: CrawlDecision::Skip,
        rule: DecisionRule::UpToDate,
    }
}
