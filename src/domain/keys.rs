//! Document store key layout
//!
//! All keys are `/`-separated and relative to the store root.

use super::catalog::{ItemId, MarketId};

pub const SNAPSHOTS_PREFIX: &str = "snapshots/";
pub const ITEMS_PREFIX: &str = "items/";
pub const SHIPPING_PREFIX: &str = "shipping/";
pub const IMAGES_PREFIX: &str = "images/";
pub const SHIPPING_SUMMARY_PREFIX: &str = "aggregates/shipping-summary/";

pub const SHARES: &str = "aggregates/shares.json";
pub const SHIPPING_META: &str = "aggregates/shipping-meta.json";
pub const IMAGE_META: &str = "aggregates/image-meta.json";
pub const CRAWL_STATE: &str = "aggregates/crawl-state.json";
pub const RETENTION_META: &str = "aggregates/retention-meta.json";

#[must_use]
pub fn snapshot(market: &MarketId) -> String {
    format!("{SNAPSHOTS_PREFIX}{market}.json")
}

/// Core per-item document.
#[must_use]
pub fn item(id: &ItemId) -> String {
    format!("{ITEMS_PREFIX}{id}.json")
}

/// Per-market shipping detail for one item.
#[must_use]
pub fn shipping_detail(market: &MarketId, id: &ItemId) -> String {
    format!("{SHIPPING_PREFIX}{market}/{id}.json")
}

#[must_use]
pub fn shipping_summary(market: &MarketId) -> String {
    format!("{SHIPPING_SUMMARY_PREFIX}{market}.json")
}

/// Asset folder name (hash) of a key under `images/`, if it is one.
#[must_use]
pub fn image_folder(key: &str) -> Option<&str> {
    key.strip_prefix(IMAGES_PREFIX)
        .and_then(|rest| rest.split('/').next())
        .filter(|folder| !folder.is_empty())
}
