//! Run orchestration
//!
//! `index`: fetch indexes, diff, persist snapshots and retention metadata.
//! `crawl`: the same, then plan → execute → merge under the run deadline.
//! `prune`: retention pruner, dry-run unless confirmed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{info, warn};

use crate::application::aggregate_merge::{AggregateMerger, MergeReport, RunAccumulator};
use crate::application::context::SyncContext;
use crate::application::crawl_decision::DecisionRule;
use crate::application::index_diff::{IndexDiff, diff_indexes};
use crate::application::retention_pruner::{PruneReport, RetentionPruner};
use crate::application::work_plan::{WorkPlan, build_work_plan};
use crate::application::worklist_executor::{RunReport, WorklistExecutor};
use crate::domain::{
    AggregateDocument, CrawlMode, CrawlRecord, MarketId, MarketIndex, MarketSnapshot, SyncError,
    SyncResult, keys,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Index,
    Crawl,
    Prune,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => write!(f, "index"),
            Self::Crawl => write!(f, "crawl"),
            Self::Prune => write!(f, "prune"),
        }
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "index" => Ok(Self::Index),
            "crawl" => Ok(Self::Crawl),
            "prune" | "retention" => Ok(Self::Prune),
            other => Err(format!("unknown stage '{other}' (expected index|crawl|prune)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// crawl: plan only. prune: ignored, prune is a dry-run unless `confirm`.
    pub dry_run: bool,
    pub confirm: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
    pub active: usize,
    pub failed_markets: BTreeMap<MarketId, String>,
}

impl From<&IndexDiff> for IndexSummary {
    fn from(diff: &IndexDiff) -> Self {
        Self {
            new: diff.new_items.len(),
            changed: diff.changed.len(),
            removed: diff.removed.len(),
            active: diff.active.len(),
            failed_markets: diff.failed_markets.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub full: usize,
    pub partial: usize,
    pub up_to_date: usize,
    pub rules: BTreeMap<DecisionRule, usize>,
}

impl From<&WorkPlan> for PlanSummary {
    fn from(plan: &WorkPlan) -> Self {
        Self {
            full: plan.count(CrawlMode::Full),
            partial: plan.count(CrawlMode::Partial),
            up_to_date: plan.skipped,
            rules: plan.rule_counts(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase", tag = "stage")]
pub enum StageReport {
    Index {
        index: IndexSummary,
        merge: MergeReport,
    },
    Crawl {
        index: IndexSummary,
        plan: PlanSummary,
        dry_run: bool,
        run: Option<RunReport>,
        merge: Option<MergeReport>,
    },
    Prune(PruneReport),
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index { index, merge } => write!(
                f,
                "index: new={} changed={} removed={} active={} failedMarkets={} written={}",
                index.new,
                index.changed,
                index.removed,
                index.active,
                index.failed_markets.len(),
                merge.documents_written
            ),
            Self::Crawl {
                plan, dry_run: true, ..
            } => write!(
                f,
                "crawl [dry-run]: full={} partial={} upToDate={}",
                plan.full, plan.partial, plan.up_to_date
            ),
            Self::Crawl { run, merge, .. } => {
                write!(f, "crawl: ")?;
                if let Some(run) = run {
                    write!(f, "{run}")?;
                }
                if let Some(merge) = merge {
                    write!(f, " written={}", merge.documents_written)?;
                }
                Ok(())
            }
            Self::Prune(report) => write!(f, "prune: {report}"),
        }
    }
}

pub struct SyncRunner<'a> {
    ctx: &'a SyncContext,
}

impl<'a> SyncRunner<'a> {
    pub const fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Fetches every configured market. A failing market degrades to
    /// [`MarketIndex::Failed`]; only an auth failure aborts.
    async fn load_indexes(&self) -> SyncResult<BTreeMap<MarketId, MarketIndex>> {
        let mut indexes = BTreeMap::new();
        for market in self.ctx.config.run_markets() {
            let index = match self.ctx.index_source.fetch_index(market).await {
                Ok(entries) => {
                    info!("📥 Market {}: {} index entries", market, entries.len());
                    MarketIndex::Loaded(entries)
                }
                Err(e @ SyncError::AuthRequired { .. }) => return Err(e),
                Err(e) => {
                    warn!("⚠️ Market {} index failed: {}", market, e);
                    MarketIndex::Failed { reason: e.to_string() }
                }
            };
            indexes.insert(market.clone(), index);
        }
        Ok(indexes)
    }

    /// Stored snapshots. A read error propagates rather than reading as empty.
    async fn load_snapshots(&self) -> SyncResult<BTreeMap<MarketId, MarketSnapshot>> {
        let mut snapshots = BTreeMap::new();
        for market in self.ctx.config.run_markets() {
            let snapshot: Option<MarketSnapshot> =
                self.ctx.store.get_json(&keys::snapshot(market)).await?;
            if let Some(snapshot) = snapshot {
                snapshots.insert(market.clone(), snapshot);
            }
        }
        Ok(snapshots)
    }

    pub async fn diff(&self) -> SyncResult<IndexDiff> {
        let indexes = self.load_indexes().await?;
        let previous = self.load_snapshots().await?;
        Ok(diff_indexes(&indexes, &previous))
    }

    pub async fn run_index(&self) -> SyncResult<StageReport> {
        let diff = self.diff().await?;
        let mut acc = RunAccumulator::new();
        acc.record_index(&diff, self.ctx.now());
        let merge = AggregateMerger::new(self.ctx.store.clone()).merge_all(&acc).await?;
        Ok(StageReport::Index {
            index: IndexSummary::from(&diff),
            merge,
        })
    }

    pub async fn run_crawl(&self, dry_run: bool) -> SyncResult<StageReport> {
        let crawl = &self.ctx.config.crawl;
        let started = self.ctx.now();
        let budget = chrono::Duration::from_std(crawl.dispatch_budget())
            .map_err(|e| SyncError::InvalidInput(format!("dispatch budget out of range: {e}")))?;
        let deadline = started + budget;

        let diff = self.diff().await?;
        let records: AggregateDocument<CrawlRecord> = self
            .ctx
            .store
            .get_json(keys::CRAWL_STATE)
            .await?
            .unwrap_or_default();
        let plan = build_work_plan(&diff, &records, started, crawl);

        if dry_run {
            for entry in &plan.entries {
                info!(
                    "[{}/{}] would {} crawl {} ({:?})",
                    entry.position + 1,
                    plan.len(),
                    entry.mode,
                    entry.id,
                    entry.rule
                );
            }
            return Ok(StageReport::Crawl {
                index: IndexSummary::from(&diff),
                plan: PlanSummary::from(&plan),
                dry_run: true,
                run: None,
                merge: None,
            });
        }

        let mut acc = RunAccumulator::new();
        acc.record_index(&diff, started);
        let executor = WorklistExecutor::new(
            self.ctx.fetcher.clone(),
            self.ctx.clock.clone(),
            crawl.concurrency,
            deadline,
            self.ctx.cancellation_token.clone(),
        );
        let run = executor.execute(&plan, &mut acc).await;
        let merge = AggregateMerger::new(self.ctx.store.clone()).merge_all(&acc).await?;

        if let Some(message) = &run.auth_error {
            warn!("🔒 Run {} halted by authentication failure: {}", self.ctx.run_id, run);
            return Err(SyncError::AuthRequired {
                message: message.clone(),
            });
        }

        Ok(StageReport::Crawl {
            index: IndexSummary::from(&diff),
            plan: PlanSummary::from(&plan),
            dry_run: false,
            run: Some(run),
            merge: Some(merge),
        })
    }

    pub async fn run_prune(&self, confirm: bool) -> SyncResult<StageReport> {
        let config = &self.ctx.config;
        if !config.market_filter.is_empty() {
            warn!(
                "⚠️ Market filter [{}] ignored by retention, every configured market counts",
                config.market_filter.join(", ")
            );
        }
        let pruner = RetentionPruner::new(
            self.ctx.store.clone(),
            self.ctx.index_source.clone(),
            self.ctx.clock.clone(),
            config.markets.clone(),
            config.retention.window_days,
        );
        Ok(StageReport::Prune(pruner.run(confirm).await?))
    }

    pub async fn run(&self, stage: Stage, options: RunOptions) -> SyncResult<StageReport> {
        info!("▶️ Run {} stage {}", self.ctx.run_id, stage);
        let report = match stage {
            Stage::Index => self.run_index().await?,
            Stage::Crawl => self.run_crawl(options.dry_run).await?,
            Stage::Prune => self.run_prune(options.confirm).await?,
        };
        info!("✅ Run {} finished: {}", self.ctx.run_id, report);
        Ok(report)
    }
}
