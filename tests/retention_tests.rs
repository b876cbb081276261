//! Retention lifecycle: index, crawl, drop out of the index, prune
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use catalog_sync_lib::application::{PruneMode, PruneReport, StageReport, SyncContext, SyncRunner};
use catalog_sync_lib::domain::services::{DocumentStore, ManualClock};
use catalog_sync_lib::domain::{AggregateDocument, FieldResult, ImageMeta, RetentionMetaEntry, keys};
use catalog_sync_lib::infrastructure::RunOverrides;
use catalog_sync_lib::test_utils::{
    FakeIndexSource, ScriptedFetcher, full_details, index_entry, test_context_with_clock,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 6, 0, 0).unwrap()
}

fn quiet_fetcher() -> Arc<ScriptedFetcher> {
    Arc::new(ScriptedFetcher::new())
}

fn shipping_key(market: &str, id: &str) -> String {
    keys::shipping_detail(&market.to_string(), &id.to_string())
}

fn prune_report(report: StageReport) -> PruneReport {
    match report {
        StageReport::Prune(report) => report,
        other => panic!("expected a prune report, got {other}"),
    }
}

#[tokio::test]
async fn replaced_image_folder_is_orphaned() {
    let clock = ManualClock::new(t0());
    let index =
        Arc::new(FakeIndexSource::new().with_market("us", vec![index_entry("X", "2024-01-01")]));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (ctx, memory) =
        test_context_with_clock(&["us"], index.clone(), fetcher.clone(), clock.clone());
    let runner = SyncRunner::new(&ctx);
    let markets = vec!["us".to_string()];

    let mut first = full_details("X", &markets);
    first.images = FieldResult::Captured(BTreeSet::from(["h-old".to_string()]));
    fetcher.set_result("X", Ok(first));
    runner.run_crawl(false).await.unwrap();
    memory.put("images/h-old/0.webp", vec![0]).await.unwrap();

    // A catalog update brings a new image set.
    clock.advance(Duration::days(1));
    index.set_market("us", vec![index_entry("X", "2024-01-11")]);
    let mut second = full_details("X", &markets);
    second.images = FieldResult::Captured(BTreeSet::from(["h-new".to_string()]));
    fetcher.set_result("X", Ok(second));
    runner.run_crawl(false).await.unwrap();
    memory.put("images/h-new/0.webp", vec![1]).await.unwrap();

    let store: Arc<dyn DocumentStore> = memory.clone();
    let images: AggregateDocument<ImageMeta> =
        store.get_json(keys::IMAGE_META).await.unwrap().unwrap();
    assert_eq!(images["X"].hashes, BTreeSet::from(["h-new".to_string()]));

    let report = prune_report(runner.run_prune(false).await.unwrap());
    assert_eq!(report.mode, PruneMode::DryRun);
    assert_eq!(report.plan.orphan_folders, vec!["h-old".to_string()]);
    assert!(report.plan.expired.is_empty());
    assert!(memory.raw("images/h-old/0.webp").await.is_some());

    let report = prune_report(runner.run_prune(true).await.unwrap());
    assert_eq!(report.deleted_assets, 1);
    assert!(memory.raw("images/h-old/0.webp").await.is_none());
    assert!(memory.raw("images/h-new/0.webp").await.is_some());
}

#[tokio::test]
async fn removed_item_moves_from_grace_to_expired_at_the_window_edge() {
    let clock = ManualClock::new(t0());
    let index = Arc::new(
        FakeIndexSource::new().with_market(
            "us",
            vec![index_entry("R", "2024-01-01"), index_entry("K", "2024-01-01")],
        ),
    );
    let (ctx, memory) =
        test_context_with_clock(&["us"], index.clone(), quiet_fetcher(), clock.clone());
    let runner = SyncRunner::new(&ctx);
    runner.run_crawl(false).await.unwrap();

    // R leaves the catalog; K keeps being listed.
    clock.advance(Duration::hours(1));
    index.set_market("us", vec![index_entry("K", "2024-01-01")]);
    runner.run_index().await.unwrap();

    clock.set(t0() + Duration::days(364));
    let report = prune_report(runner.run_prune(true).await.unwrap());
    assert_eq!(report.plan.grace, vec!["R".to_string()]);
    assert!(report.plan.expired.is_empty());
    assert_eq!(report.deleted_documents, 0);

    clock.set(t0() + Duration::days(366));
    let preview = prune_report(runner.run_prune(false).await.unwrap());
    let report = prune_report(runner.run_prune(true).await.unwrap());
    assert_eq!(preview.plan, report.plan);
    assert_eq!(report.plan.expired, vec!["R".to_string()]);
    assert_eq!(report.plan.active, 1);
    assert!(report.deleted_documents >= 2);

    assert!(memory.raw(&keys::item(&"R".to_string())).await.is_none());
    assert!(memory.raw(&shipping_key("us", "R")).await.is_none());
    assert!(memory.raw(&keys::item(&"K".to_string())).await.is_some());
    let store: Arc<dyn DocumentStore> = memory.clone();
    let meta: AggregateDocument<RetentionMetaEntry> =
        store.get_json(keys::RETENTION_META).await.unwrap().unwrap();
    assert!(!meta.contains_key("R"));
    assert!(meta.contains_key("K"));

    // Nothing left to do on a second confirmed pass.
    let writes = memory.writes();
    let again = prune_report(runner.run_prune(true).await.unwrap());
    assert!(again.plan.expired.is_empty());
    assert_eq!(memory.writes(), writes);
}

#[tokio::test]
async fn market_filter_does_not_shrink_the_retention_union() {
    let clock = ManualClock::new(t0());
    let index = Arc::new(
        FakeIndexSource::new()
            .with_market("us", vec![index_entry("U", "2024-01-01"), index_entry("G", "2024-01-01")])
            .with_market("de", vec![index_entry("D", "2024-01-01")]),
    );
    let (ctx, memory) =
        test_context_with_clock(&["us", "de"], index.clone(), quiet_fetcher(), clock.clone());
    SyncRunner::new(&ctx).run_crawl(false).await.unwrap();

    // G leaves "us"; U stays listed there but is never seen by a "de"-only run.
    index.set_market("us", vec![index_entry("U", "2024-01-01")]);
    clock.set(t0() + Duration::days(10));
    let mut config = ctx.config.as_ref().clone();
    config
        .apply_overrides(&RunOverrides {
            markets: vec!["de".to_string()],
            retention_days: Some(5),
            ..RunOverrides::default()
        })
        .unwrap();
    let filtered = SyncContext::new(
        config,
        memory.clone(),
        index,
        Arc::new(ScriptedFetcher::new()),
        Arc::new(clock),
    );

    let report = prune_report(SyncRunner::new(&filtered).run_prune(true).await.unwrap());
    assert_eq!(report.plan.expired, vec!["G".to_string()]);
    assert_eq!(report.plan.active, 2);
    assert!(memory.raw(&keys::item(&"U".to_string())).await.is_some());
    assert!(memory.raw(&shipping_key("us", "U")).await.is_some());
    assert!(memory.raw(&keys::item(&"G".to_string())).await.is_none());
}
