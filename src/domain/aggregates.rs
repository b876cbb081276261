//! Shared aggregate documents and their field-level merge rules
//!
//! Each aggregate is a map keyed by canonical item id. Values merge field by
//! field using one of three rules:
//! - identity/link fields: last write wins (incoming replaces stored)
//! - "first captured" timestamps: earliest wins
//! - "last seen/refreshed" timestamps: latest wins
//!
//! None of the rules count, so merging the same input twice is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use super::catalog::{ItemId, MarketId};

/// One aggregate document: item id -> value.
pub type AggregateDocument<V> = BTreeMap<ItemId, V>;

/// Field-level merge of a stored value with the value produced during a run.
pub trait Mergeable: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync {
    /// Returns the value to store given the `stored` value (`self`) and `incoming`.
    #[must_use]
    fn merge(&self, incoming: &Self) -> Self;
}

#[must_use]
pub fn last_write_wins<T: Clone>(_stored: &T, incoming: &T) -> T {
    incoming.clone()
}

/// Keeps the stored value when the run did not produce one.
#[must_use]
pub fn last_write_wins_opt<T: Clone>(stored: &Option<T>, incoming: &Option<T>) -> Option<T> {
    incoming.clone().or_else(|| stored.clone())
}

#[must_use]
pub fn earliest_wins(
    stored: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (stored, incoming) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[must_use]
pub fn latest_wins(
    stored: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (stored, incoming) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// `aggregates/shares.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareEntry {
    pub link: String,
    #[serde(default)]
    pub first_captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Mergeable for ShareEntry {
    fn merge(&self, incoming: &Self) -> Self {
        Self {
            link: last_write_wins(&self.link, &incoming.link),
            first_captured_at: earliest_wins(self.first_captured_at, incoming.first_captured_at),
            updated_at: latest_wins(self.updated_at, incoming.updated_at),
        }
    }
}

/// `aggregates/shipping-summary/<market>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingSummary {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    pub option_count: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Mergeable for ShippingSummary {
    fn merge(&self, incoming: &Self) -> Self {
        Self {
            min_price: last_write_wins(&self.min_price, &incoming.min_price),
            max_price: last_write_wins(&self.max_price, &incoming.max_price),
            currency: last_write_wins_opt(&self.currency, &incoming.currency),
            option_count: last_write_wins(&self.option_count, &incoming.option_count),
            updated_at: latest_wins(self.updated_at, incoming.updated_at),
        }
    }
}

/// `aggregates/shipping-meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingMeta {
    /// Markets whose shipping detail was captured in the latest crawl.
    pub markets: BTreeSet<MarketId>,
    #[serde(default)]
    pub first_captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_captured_at: Option<DateTime<Utc>>,
}

impl Mergeable for ShippingMeta {
    fn merge(&self, incoming: &Self) -> Self {
        Self {
            markets: last_write_wins(&self.markets, &incoming.markets),
            first_captured_at: earliest_wins(self.first_captured_at, incoming.first_captured_at),
            last_captured_at: latest_wins(self.last_captured_at, incoming.last_captured_at),
        }
    }
}

/// `aggregates/image-meta.json`
///
/// `hashes` is the complete set of asset folders the item references right
/// now. Orphan detection depends on it being replaced, not unioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    pub hashes: BTreeSet<String>,
    #[serde(default)]
    pub first_captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Mergeable for ImageMeta {
    fn merge(&self, incoming: &Self) -> Self {
        Self {
            hashes: last_write_wins(&self.hashes, &incoming.hashes),
            first_captured_at: earliest_wins(self.first_captured_at, incoming.first_captured_at),
            updated_at: latest_wins(self.updated_at, incoming.updated_at),
        }
    }
}
