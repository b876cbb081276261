//! catalog-sync - incremental multi-market catalog crawl engine
//!
//! Keeps a multi-market product catalog in step with a slow, rate-limited
//! upstream under a hard per-run wall-clock budget: diffs market indexes,
//! decides per item between a full crawl, a reviews-only refresh or nothing,
//! runs the plan under bounded concurrency, merges results into shared
//! aggregate documents once per run, and retires vanished items after a
//! retention grace period.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Scripted collaborators shared by unit and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
