//! Catalog index entities
//!
//! An index fetch yields [`IndexEntry`] rows per market. They are reduced to a
//! [`SnapshotEntry`] (source timestamp + signature) which is the only thing
//! persisted and diffed between runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub type ItemId = String;
pub type MarketId = String;

/// Persisted diff baseline for one market: item id -> `{lua, sig}`.
pub type MarketSnapshot = BTreeMap<ItemId, SnapshotEntry>;

/// One row of a market's upstream index. Ephemeral, lives for one fetch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: ItemId,
    pub seller_id: String,
    pub price_min: f64,
    pub price_max: f64,
    pub variant_count: u32,
    /// Source-supplied "last updated at". Opaque, may be missing.
    #[serde(default)]
    pub last_updated_at: Option<String>,
}

impl IndexEntry {
    /// `sellerId|priceMin|priceMax|variantCount`
    #[must_use]
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.seller_id, self.price_min, self.price_max, self.variant_count
        )
    }

    #[must_use]
    pub fn to_snapshot_entry(&self) -> SnapshotEntry {
        SnapshotEntry {
            lua: self.last_updated_at.clone().unwrap_or_default(),
            sig: self.signature(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Source "last updated at", empty when the source did not supply one.
    #[serde(default)]
    pub lua: String,
    pub sig: String,
}

impl SnapshotEntry {
    pub fn new(lua: impl Into<String>, sig: impl Into<String>) -> Self {
        Self {
            lua: lua.into(),
            sig: sig.into(),
        }
    }

    /// Index state of an item across every market listing it: the latest
    /// `lua` and the per-market signatures joined as `market=sig;...`.
    ///
    /// Listings must come in market order so the result is stable.
    #[must_use]
    pub fn combined<'a>(listings: impl IntoIterator<Item = (&'a MarketId, &'a Self)>) -> Self {
        let mut lua = String::new();
        let mut parts = Vec::new();
        for (market, entry) in listings {
            if entry.lua > lua {
                lua.clone_from(&entry.lua);
            }
            parts.push(format!("{market}={}", entry.sig));
        }
        Self {
            lua,
            sig: parts.join(";"),
        }
    }
}

/// Result of loading one market's current index.
#[derive(Debug, Clone)]
pub enum MarketIndex {
    Loaded(Vec<IndexEntry>),
    /// Load failed; the market's prior snapshot is carried forward.
    Failed { reason: String },
}

/// Union of ids across market snapshots.
#[must_use]
pub fn union_ids<'a>(snapshots: impl IntoIterator<Item = &'a MarketSnapshot>) -> BTreeSet<ItemId> {
    snapshots
        .into_iter()
        .flat_map(|snapshot| snapshot.keys().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> IndexEntry {
        IndexEntry {
            id: id.into(),
            seller_id: "s-9".into(),
            price_min: 12.5,
            price_max: 20.0,
            variant_count: 3,
            last_updated_at: None,
        }
    }

    #[test]
    fn signature_joins_mutable_fields() {
        assert_eq!(entry("A").signature(), "s-9|12.5|20|3");
    }

    #[test]
    fn missing_lua_becomes_empty() {
        let snap = entry("A").to_snapshot_entry();
        assert_eq!(snap.lua, "");
        assert_eq!(snap.sig, "s-9|12.5|20|3");
    }

    #[test]
    fn combined_entry_covers_every_market() {
        let (de, us) = ("de".to_string(), "us".to_string());
        let de_entry = SnapshotEntry::new("2024-01-05", "s|1|2|1");
        let us_entry = SnapshotEntry::new("", "s|1|9|1");
        let combined = SnapshotEntry::combined([(&de, &de_entry), (&us, &us_entry)]);
        assert_eq!(combined.lua, "2024-01-05");
        assert_eq!(combined.sig, "de=s|1|2|1;us=s|1|9|1");
    }

    #[test]
    fn index_entry_reads_camel_case() {
        let raw = concat!(
            r#"{"id":"A","sellerId":"s","priceMin":1,"priceMax":2,"#,
            r#""variantCount":1,"lastUpdatedAt":"2024-02-01"}"#
        );
        let parsed: IndexEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.last_updated_at.as_deref(), Some("2024-02-01"));
    }
}
