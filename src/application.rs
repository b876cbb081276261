//! Application layer module
//!
//! Use cases of a sync run, leaves first: index diff, crawl decision, work
//! plan, worklist executor, aggregate merge, retention pruner, and the run
//! orchestration that strings them together over a [`SyncContext`].

pub mod aggregate_merge;
pub mod context;
pub mod crawl_decision;
pub mod index_diff;
pub mod retention_pruner;
pub mod sync_run;
pub mod work_plan;
pub mod worklist_executor;

pub use aggregate_merge::{AggregateMerger, MergeReport, RunAccumulator};
pub use context::SyncContext;
pub use crawl_decision::{DecisionRule, Verdict, decide_crawl};
pub use index_diff::{ChangeReason, DiffItem, IndexDiff, diff_indexes};
pub use retention_pruner::{PruneMode, PrunePlan, PruneReport, RetentionPruner};
pub use sync_run::{RunOptions, Stage, StageReport, SyncRunner};
pub use work_plan::{WorkPlan, WorkPlanEntry, build_work_plan};
pub use worklist_executor::{ItemFailure, RunReport, StopReason, WorklistExecutor};
