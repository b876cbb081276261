//! Worklist executor
//!
//! Runs a [`WorkPlan`] with at most `concurrency` fetches in flight on a
//! single logical task. Immediately before a fetch starts it checks the
//! dispatch gate: deadline, quota, auth and shutdown. A closed gate stops new
//! starts only; in-flight fetches always finish. Per-item errors are recorded
//! and never leave the task boundary. Results are folded into the
//! [`RunAccumulator`] as they complete; nothing here touches the store.

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::aggregate_merge::RunAccumulator;
use crate::application::work_plan::{WorkPlan, WorkPlanEntry};
use crate::domain::services::{Clock, ItemDetailFetcher};
use crate::domain::{ItemDetails, ItemId, SyncError};

/// Why dispatch of new tasks stopped before the plan was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Deadline,
    QuotaExhausted,
    AuthRequired,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deadline => "deadline",
            Self::QuotaExhausted => "quota exhausted",
            Self::AuthRequired => "authentication required",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: ItemId,
    pub position: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub planned: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_due_to_time: usize,
    pub deferred_by_quota: usize,
    /// Not started because of auth failure or shutdown.
    pub not_started: usize,
    pub stopped_by: Option<StopReason>,
    pub failures: Vec<ItemFailure>,
    /// Message of the authentication failure that halted the run.
    pub auth_error: Option<String>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "planned={} attempted={} succeeded={} failed={} skippedDueToTime={} deferredByQuota={}",
            self.planned,
            self.attempted,
            self.succeeded,
            self.failed,
            self.skipped_due_to_time,
            self.deferred_by_quota
        )?;
        if self.not_started > 0 {
            write!(f, " notStarted={}", self.not_started)?;
        }
        if let Some(reason) = self.stopped_by {
            write!(f, " (stopped: {reason})")?;
        }
        Ok(())
    }
}

enum TaskOutcome {
    NotStarted(StopReason),
    Succeeded(ItemDetails, DateTime<Utc>),
    Failed(String),
    /// Started and rejected for missing or expired credentials.
    Unauthorized(String),
    /// Started, but the collaborator reported a dispatch-halting condition.
    Halted(StopReason),
}

pub struct WorklistExecutor {
    fetcher: Arc<dyn ItemDetailFetcher>,
    clock: Arc<dyn Clock>,
    concurrency: usize,
    deadline: DateTime<Utc>,
    shutdown: CancellationToken,
}

impl WorklistExecutor {
    pub fn new(
        fetcher: Arc<dyn ItemDetailFetcher>,
        clock: Arc<dyn Clock>,
        concurrency: usize,
        deadline: DateTime<Utc>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            clock,
            concurrency: concurrency.max(1),
            deadline,
            shutdown,
        }
    }

    fn gate(&self, halted: &OnceLock<StopReason>) -> Option<StopReason> {
        if let Some(reason) = halted.get() {
            return Some(*reason);
        }
        if self.shutdown.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if self.clock.now() >= self.deadline {
            return Some(StopReason::Deadline);
        }
        None
    }

    async fn run_task(
        &self,
        entry: &WorkPlanEntry,
        total: usize,
        halted: &OnceLock<StopReason>,
    ) -> TaskOutcome {
        if let Some(reason) = self.gate(halted) {
            return TaskOutcome::NotStarted(reason);
        }

        info!("[{}/{}] 🚀 {} crawl of {}", entry.position + 1, total, entry.mode, entry.id);
        match self.fetcher.fetch_item(&entry.id, &entry.markets, entry.mode).await {
            Ok(details) if details.all_failed() => {
                TaskOutcome::Failed(details.failure_reasons().join("; "))
            }
            Ok(details) => TaskOutcome::Succeeded(details, self.clock.now()),
            Err(SyncError::AuthRequired { message }) => {
                let _ = halted.set(StopReason::AuthRequired);
                error!("🔒 Authentication required while crawling {}: {}", entry.id, message);
                TaskOutcome::Unauthorized(message)
            }
            Err(SyncError::QuotaExhausted { message }) => {
                let _ = halted.set(StopReason::QuotaExhausted);
                warn!("🪫 Quota exhausted at {}: {}", entry.id, message);
                TaskOutcome::Halted(StopReason::QuotaExhausted)
            }
            Err(SyncError::DeadlineExceeded) => TaskOutcome::Halted(StopReason::Deadline),
            Err(e) => TaskOutcome::Failed(e.to_string()),
        }
    }

    pub async fn execute(&self, plan: &WorkPlan, acc: &mut RunAccumulator) -> RunReport {
        let total = plan.len();
        let halted = OnceLock::new();
        let mut report = RunReport {
            planned: total,
            ..RunReport::default()
        };

        info!(
            "⚙️ Executing {} planned items with concurrency {} (deadline {})",
            total, self.concurrency, self.deadline
        );

        let halted_ref = &halted;
        let mut outcomes = stream::iter(&plan.entries)
            .map(|entry| async move {
                let outcome = self.run_task(entry, total, halted_ref).await;
                (entry, outcome)
            })
            .buffer_unordered(self.concurrency);

        while let Some((entry, outcome)) = outcomes.next().await {
            match outcome {
                TaskOutcome::NotStarted(reason) => {
                    report.stopped_by.get_or_insert(reason);
                    match reason {
                        StopReason::Deadline => report.skipped_due_to_time += 1,
                        StopReason::QuotaExhausted => report.deferred_by_quota += 1,
                        StopReason::AuthRequired | StopReason::Cancelled => report.not_started += 1,
                    }
                }
                TaskOutcome::Halted(reason) => {
                    report.attempted += 1;
                    report.stopped_by.get_or_insert(reason);
                    match reason {
                        StopReason::QuotaExhausted => report.deferred_by_quota += 1,
                        _ => report.skipped_due_to_time += 1,
                    }
                }
                TaskOutcome::Succeeded(details, at) => {
                    report.attempted += 1;
                    report.succeeded += 1;
                    info!("[{}/{}] ✅ {}", entry.position + 1, total, entry.id);
                    acc.record_success(entry, details, at);
                }
                TaskOutcome::Unauthorized(reason) => {
                    report.attempted += 1;
                    report.failed += 1;
                    report.auth_error.get_or_insert_with(|| reason.clone());
                    report.stopped_by = Some(StopReason::AuthRequired);
                    report.failures.push(ItemFailure {
                        id: entry.id.clone(),
                        position: entry.position,
                        reason,
                    });
                }
                TaskOutcome::Failed(reason) => {
                    report.attempted += 1;
                    report.failed += 1;
                    warn!("[{}/{}] ❌ {}: {}", entry.position + 1, total, entry.id, reason);
                    report.failures.push(ItemFailure {
                        id: entry.id.clone(),
                        position: entry.position,
                        reason,
                    });
                }
            }
        }

        report.failures.sort_by_key(|failure| failure.position);
        info!("🏁 Worklist finished: {}", report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::crawl_decision::DecisionRule;
    use crate::domain::services::ManualClock;
    use crate::domain::{CrawlMode, FieldResult, MarketId, SnapshotEntry, SyncResult};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Advances the clock one minute per fetch and fails the ids it is told to.
    struct MinuteFetcher {
        clock: ManualClock,
        fail: Vec<(ItemId, SyncError)>,
        started: Mutex<Vec<ItemId>>,
    }

    #[async_trait]
    impl ItemDetailFetcher for MinuteFetcher {
        async fn fetch_item(
            &self,
            id: &ItemId,
            _: &[MarketId],
            _: CrawlMode,
        ) -> SyncResult<ItemDetails> {
            self.started.lock().unwrap().push(id.clone());
            self.clock.advance(Duration::minutes(1));
            if let Some((_, error)) = self.fail.iter().find(|(failing, _)| failing == id) {
                return Err(error.clone());
            }
            Ok(ItemDetails {
                reviews: FieldResult::Captured(Vec::new()),
                description: FieldResult::Captured("d".into()),
                ..ItemDetails::default()
            })
        }
    }

    /// Yields more often for earlier positions, so later items finish first.
    struct OverlappingFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail: Vec<ItemId>,
    }

    #[async_trait]
    impl ItemDetailFetcher for OverlappingFetcher {
        async fn fetch_item(
            &self,
            id: &ItemId,
            _: &[MarketId],
            _: CrawlMode,
        ) -> SyncResult<ItemDetails> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let position: usize = id.trim_start_matches("item-").parse().unwrap_or(0);
            for _ in 0..(20 - position) {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.contains(id) {
                return Err(SyncError::transient(id, "503"));
            }
            Ok(ItemDetails {
                reviews: FieldResult::Captured(Vec::new()),
                description: FieldResult::Captured("d".into()),
                ..ItemDetails::default()
            })
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn plan(size: usize) -> WorkPlan {
        let entries = (0..size)
            .map(|position| WorkPlanEntry {
                id: format!("item-{position:02}"),
                markets: vec!["us".into()],
                mode: CrawlMode::Full,
                position,
                rule: DecisionRule::NewItem,
                current: SnapshotEntry::new("", "sig"),
            })
            .collect();
        WorkPlan { entries, skipped: 0 }
    }

    fn executor(
        fetcher: MinuteFetcher,
        clock: ManualClock,
        deadline_minutes: i64,
    ) -> WorklistExecutor {
        WorklistExecutor::new(
            Arc::new(fetcher),
            Arc::new(clock),
            1,
            start() + Duration::minutes(deadline_minutes),
            CancellationToken::new(),
        )
    }

    fn fetcher(clock: &ManualClock, fail: Vec<(ItemId, SyncError)>) -> MinuteFetcher {
        MinuteFetcher {
            clock: clock.clone(),
            fail,
            started: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn deadline_halfway_skips_the_rest() {
        let clock = ManualClock::new(start());
        let executor = executor(fetcher(&clock, Vec::new()), clock, 5);
        let mut acc = RunAccumulator::new();

        let report = executor.execute(&plan(10), &mut acc).await;
        assert_eq!(report.planned, 10);
        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 5);
        assert_eq!(report.skipped_due_to_time, 5);
        assert_eq!(report.failed, 0);
        assert_eq!(report.stopped_by, Some(StopReason::Deadline));
        assert_eq!(acc.crawl_state.len(), 5);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let clock = ManualClock::new(start());
        let fail = vec![("item-01".to_string(), SyncError::transient("item-01", "503"))];
        let executor = executor(fetcher(&clock, fail), clock, 60);
        let mut acc = RunAccumulator::new();

        let report = executor.execute(&plan(4), &mut acc).await;
        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].id, "item-01");
        assert_eq!(report.stopped_by, None);
    }

    #[tokio::test]
    async fn quota_exhaustion_defers_instead_of_failing() {
        let clock = ManualClock::new(start());
        let fail = vec![(
            "item-02".to_string(),
            SyncError::QuotaExhausted {
                message: "character budget spent".into(),
            },
        )];
        let executor = executor(fetcher(&clock, fail), clock, 60);
        let mut acc = RunAccumulator::new();

        let report = executor.execute(&plan(6), &mut acc).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.deferred_by_quota, 4);
        assert_eq!(report.stopped_by, Some(StopReason::QuotaExhausted));
    }

    #[tokio::test]
    async fn auth_failure_stops_dispatch() {
        let clock = ManualClock::new(start());
        let fail = vec![(
            "item-00".to_string(),
            SyncError::AuthRequired {
                message: "session expired".into(),
            },
        )];
        let executor = executor(fetcher(&clock, fail), clock, 60);
        let mut acc = RunAccumulator::new();

        let report = executor.execute(&plan(3), &mut acc).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.not_started, 2);
        assert_eq!(report.auth_error.as_deref(), Some("session expired"));
        assert_eq!(report.stopped_by, Some(StopReason::AuthRequired));
    }

    #[tokio::test]
    async fn concurrent_fetches_stay_within_the_limit() {
        let fetcher = Arc::new(OverlappingFetcher {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail: vec!["item-02".into(), "item-07".into(), "item-05".into()],
        });
        let clock = ManualClock::new(start());
        let executor = WorklistExecutor::new(
            fetcher.clone(),
            Arc::new(clock),
            3,
            start() + Duration::minutes(60),
            CancellationToken::new(),
        );
        let mut acc = RunAccumulator::new();

        let report = executor.execute(&plan(12), &mut acc).await;
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 3, "peak in-flight fetches was {peak}");
        assert_eq!(fetcher.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(report.attempted, 12);
        assert_eq!(report.succeeded, 9);
        assert_eq!(report.failed, 3);
        assert_eq!(acc.crawl_state.len(), 9);
        let positions: Vec<_> = report.failures.iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![2, 5, 7]);
    }

    #[tokio::test]
    async fn cancelled_token_starts_nothing() {
        let clock = ManualClock::new(start());
        let token = CancellationToken::new();
        token.cancel();
        let executor = WorklistExecutor::new(
            Arc::new(fetcher(&clock, Vec::new())),
            Arc::new(clock),
            3,
            start() + Duration::minutes(60),
            token,
        );
        let mut acc = RunAccumulator::new();
        let report = executor.execute(&plan(3), &mut acc).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.not_started, 3);
        assert!(acc.is_empty());
    }
}
