//! Index diff engine
//!
//! Compares each market's freshly fetched index with the snapshot persisted
//! by the previous run and classifies items as new, changed or removed.
//!
//! Rules:
//! - id absent from the market's snapshot: **new**
//! - `lua` differs (and the current one is non-empty) or `sig` differs: **changed**
//! - id in the snapshot but not in the current index: removal candidate for
//!   that market only
//!
//! Across markets, new beats changed, and a removal candidate survives only if
//! the id is in no other market's snapshot and was not new/changed anywhere.
//! A market whose index failed to load keeps its previous snapshot untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::catalog::union_ids;
use crate::domain::{ItemId, MarketId, MarketIndex, MarketSnapshot, SnapshotEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Lua,
    Sig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffItem {
    pub id: ItemId,
    pub markets: BTreeSet<MarketId>,
    /// Empty for new items.
    pub reasons: BTreeSet<ChangeReason>,
}

/// An item seen in at least one successfully loaded market index this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveItem {
    /// Loaded markets listing the item; the fetch targets.
    pub markets: Vec<MarketId>,
    /// Combined entry over every snapshot listing the item, carried-forward
    /// ones included. See [`SnapshotEntry::combined`].
    pub entry: SnapshotEntry,
}

#[derive(Debug, Clone, Default)]
pub struct IndexDiff {
    /// Snapshot to persist per market. Failed markets carry their old one.
    pub snapshots: BTreeMap<MarketId, MarketSnapshot>,
    pub new_items: Vec<DiffItem>,
    pub changed: Vec<DiffItem>,
    pub removed: Vec<DiffItem>,
    pub failed_markets: BTreeMap<MarketId, String>,
    /// Items present in a loaded market index, with their markets.
    pub active: BTreeMap<ItemId, ActiveItem>,
}

impl IndexDiff {
    /// Markets whose index loaded; only their snapshots need writing.
    pub fn loaded_markets(&self) -> impl Iterator<Item = &MarketId> {
        self.snapshots
            .keys()
            .filter(|market| !self.failed_markets.contains_key(*market))
    }

    /// Every id listed by any market snapshot, including carried-forward ones.
    #[must_use]
    pub fn known_ids(&self) -> BTreeSet<ItemId> {
        union_ids(self.snapshots.values())
    }

    /// `lur` value per item that was new or changed this run.
    #[must_use]
    pub fn update_reasons(&self) -> BTreeMap<ItemId, &'static str> {
        use crate::domain::constants::update_reason;

        let changed = self.changed.iter().map(|item| {
            let reason = if item.reasons.contains(&ChangeReason::Sig) {
                update_reason::CHANGED_SIG
            } else {
                update_reason::CHANGED_LUA
            };
            (item.id.clone(), reason)
        });
        let new = self
            .new_items
            .iter()
            .map(|item| (item.id.clone(), update_reason::NEW));
        changed.chain(new).collect()
    }
}

fn snapshot_from_index(entries: &[crate::domain::IndexEntry]) -> MarketSnapshot {
    entries
        .iter()
        .map(|entry| (entry.id.clone(), entry.to_snapshot_entry()))
        .collect()
}

pub fn diff_indexes(
    current: &BTreeMap<MarketId, MarketIndex>,
    previous: &BTreeMap<MarketId, MarketSnapshot>,
) -> IndexDiff {
    let empty = MarketSnapshot::new();
    let mut diff = IndexDiff::default();

    let mut new_markets: BTreeMap<ItemId, BTreeSet<MarketId>> = BTreeMap::new();
    let mut changed: BTreeMap<ItemId, (BTreeSet<MarketId>, BTreeSet<ChangeReason>)> =
        BTreeMap::new();
    let mut removal_candidates: BTreeMap<ItemId, BTreeSet<MarketId>> = BTreeMap::new();
    let mut listed_in: BTreeMap<ItemId, Vec<MarketId>> = BTreeMap::new();

    for (market, index) in current {
        let prior = previous.get(market).unwrap_or(&empty);

        let entries = match index {
            MarketIndex::Loaded(entries) => entries,
            MarketIndex::Failed { reason } => {
                warn!(
                    "⚠️ Market {} index unavailable ({}), carrying forward {} snapshot entries",
                    market,
                    reason,
                    prior.len()
                );
                diff.failed_markets.insert(market.clone(), reason.clone());
                diff.snapshots.insert(market.clone(), prior.clone());
                continue;
            }
        };

        let snapshot = snapshot_from_index(entries);
        for (id, entry) in &snapshot {
            match prior.get(id) {
                None => {
                    new_markets.entry(id.clone()).or_default().insert(market.clone());
                }
                Some(old) => {
                    let lua_changed = !entry.lua.is_empty() && entry.lua != old.lua;
                    let sig_changed = entry.sig != old.sig;
                    if lua_changed || sig_changed {
                        let (markets, reasons) = changed.entry(id.clone()).or_default();
                        markets.insert(market.clone());
                        if lua_changed {
                            reasons.insert(ChangeReason::Lua);
                        }
                        if sig_changed {
                            reasons.insert(ChangeReason::Sig);
                        }
                    }
                }
            }

            listed_in.entry(id.clone()).or_default().push(market.clone());
        }

        for id in prior.keys().filter(|id| !snapshot.contains_key(*id)) {
            removal_candidates.entry(id.clone()).or_default().insert(market.clone());
        }

        diff.snapshots.insert(market.clone(), snapshot);
    }

    for (id, markets) in listed_in {
        let entry = SnapshotEntry::combined(
            diff.snapshots
                .iter()
                .filter_map(|(market, snapshot)| snapshot.get(&id).map(|entry| (market, entry))),
        );
        diff.active.insert(id, ActiveItem { markets, entry });
    }

    // New beats changed; the item keeps every market it was new or changed in.
    for (id, (markets, reasons)) in changed {
        if let Some(new_in) = new_markets.get_mut(&id) {
            new_in.extend(markets);
        } else {
            diff.changed.push(DiffItem { id, markets, reasons });
        }
    }
    diff.new_items = new_markets
        .into_iter()
        .map(|(id, markets)| DiffItem {
            id,
            markets,
            reasons: BTreeSet::new(),
        })
        .collect();

    let still_listed = diff.known_ids();
    diff.removed = removal_candidates
        .into_iter()
        .filter(|(id, _)| !still_listed.contains(id))
        .map(|(id, markets)| DiffItem {
            id,
            markets,
            reasons: BTreeSet::new(),
        })
        .collect();

    info!(
        "🔍 Index diff: {} new, {} changed, {} removed, {} active, {} market(s) failed",
        diff.new_items.len(),
        diff.changed.len(),
        diff.removed.len(),
        diff.active.len(),
        diff.failed_markets.len()
    );
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IndexEntry;
    use proptest::prelude::*;

    fn entry(id: &str, lua: &str, seller: &str) -> IndexEntry {
        IndexEntry {
            id: id.into(),
            seller_id: seller.into(),
            price_min: 1.0,
            price_max: 2.0,
            variant_count: 1,
            last_updated_at: (!lua.is_empty()).then(|| lua.to_string()),
        }
    }

    fn loaded(entries: Vec<IndexEntry>) -> MarketIndex {
        MarketIndex::Loaded(entries)
    }

    fn markets(names: &[&str]) -> BTreeSet<MarketId> {
        names.iter().map(|m| (*m).to_string()).collect()
    }

    #[test]
    fn lua_change_is_reported_with_reason() {
        let current_entry = entry("A", "2024-02-01", "s");
        let sig = current_entry.signature();
        let previous = BTreeMap::from([(
            "us".to_string(),
            MarketSnapshot::from([("A".to_string(), SnapshotEntry::new("2024-01-01", sig))]),
        )]);
        let current = BTreeMap::from([("us".to_string(), loaded(vec![current_entry]))]);

        let diff = diff_indexes(&current, &previous);
        assert!(diff.new_items.is_empty());
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].id, "A");
        assert_eq!(diff.changed[0].reasons, BTreeSet::from([ChangeReason::Lua]));
        assert_eq!(diff.update_reasons()["A"], "changed:lua");
    }

    #[test]
    fn unseen_item_is_new() {
        let current = BTreeMap::from([("us".to_string(), loaded(vec![entry("B", "", "s")]))]);
        let diff = diff_indexes(&current, &BTreeMap::new());
        assert_eq!(diff.new_items.len(), 1);
        assert_eq!(diff.new_items[0].id, "B");
        assert_eq!(diff.update_reasons()["B"], "new");
    }

    #[test]
    fn empty_current_lua_does_not_count_as_change() {
        let current_entry = entry("A", "", "s");
        let previous = BTreeMap::from([(
            "us".to_string(),
            MarketSnapshot::from([(
                "A".to_string(),
                SnapshotEntry::new("2024-01-01", current_entry.signature()),
            )]),
        )]);
        let current = BTreeMap::from([("us".to_string(), loaded(vec![current_entry]))]);
        let diff = diff_indexes(&current, &previous);
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn new_beats_changed_across_markets() {
        let de_entry = entry("A", "2024-01-01", "s");
        let previous = BTreeMap::from([(
            "us".to_string(),
            MarketSnapshot::from([("A".to_string(), SnapshotEntry::new("2024-01-01", "old-sig"))]),
        )]);
        let current = BTreeMap::from([
            ("us".to_string(), loaded(vec![entry("A", "2024-01-01", "s")])),
            ("de".to_string(), loaded(vec![de_entry])),
        ]);

        let diff = diff_indexes(&current, &previous);
        assert!(diff.changed.is_empty());
        assert_eq!(diff.new_items.len(), 1);
        assert_eq!(diff.new_items[0].markets, markets(&["de", "us"]));
        assert_eq!(diff.active["A"].markets, vec!["de".to_string(), "us".to_string()]);
    }

    #[test]
    fn change_in_any_market_reaches_the_active_entry() {
        let de = entry("A", "2024-01-01", "s");
        let mut us = entry("A", "2024-01-01", "s");
        let listing = BTreeMap::from([
            ("de".to_string(), loaded(vec![de.clone()])),
            ("us".to_string(), loaded(vec![us.clone()])),
        ]);
        let first = diff_indexes(&listing, &BTreeMap::new());

        us.price_max = 99.0;
        let repriced = BTreeMap::from([
            ("de".to_string(), loaded(vec![de])),
            ("us".to_string(), loaded(vec![us])),
        ]);
        let second = diff_indexes(&repriced, &first.snapshots);
        assert_eq!(second.changed.len(), 1);
        assert_eq!(second.changed[0].markets, markets(&["us"]));
        assert_ne!(second.active["A"].entry.sig, first.active["A"].entry.sig);
    }

    #[test]
    fn failed_market_keeps_the_active_entry_stable() {
        let listing = BTreeMap::from([
            ("de".to_string(), loaded(vec![entry("A", "2024-01-01", "s")])),
            ("us".to_string(), loaded(vec![entry("A", "2024-01-01", "s")])),
        ]);
        let first = diff_indexes(&listing, &BTreeMap::new());

        let degraded = BTreeMap::from([
            (
                "de".to_string(),
                MarketIndex::Failed {
                    reason: "503".into(),
                },
            ),
            ("us".to_string(), loaded(vec![entry("A", "2024-01-01", "s")])),
        ]);
        let second = diff_indexes(&degraded, &first.snapshots);
        assert_eq!(second.active["A"].markets, vec!["us".to_string()]);
        assert_eq!(second.active["A"].entry, first.active["A"].entry);
    }

    #[test]
    fn removal_dropped_when_still_listed_elsewhere() {
        let e = entry("A", "", "s");
        let snap = MarketSnapshot::from([("A".to_string(), e.to_snapshot_entry())]);
        let previous = BTreeMap::from([
            ("us".to_string(), snap.clone()),
            ("de".to_string(), snap),
        ]);
        let current = BTreeMap::from([
            ("us".to_string(), loaded(vec![])),
            ("de".to_string(), loaded(vec![e])),
        ]);
        let diff = diff_indexes(&current, &previous);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn removal_reported_when_gone_everywhere() {
        let e = entry("A", "", "s");
        let previous = BTreeMap::from([(
            "us".to_string(),
            MarketSnapshot::from([("A".to_string(), e.to_snapshot_entry())]),
        )]);
        let current = BTreeMap::from([("us".to_string(), loaded(vec![]))]);
        let diff = diff_indexes(&current, &previous);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].markets, markets(&["us"]));
    }

    #[test]
    fn failed_market_carries_snapshot_forward() {
        let e = entry("A", "", "s");
        let previous = BTreeMap::from([(
            "us".to_string(),
            MarketSnapshot::from([("A".to_string(), e.to_snapshot_entry())]),
        )]);
        let current = BTreeMap::from([(
            "us".to_string(),
            MarketIndex::Failed {
                reason: "timeout".into(),
            },
        )]);

        let diff = diff_indexes(&current, &previous);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.snapshots["us"], previous["us"]);
        assert!(diff.failed_markets.contains_key("us"));
        assert_eq!(diff.loaded_markets().count(), 0);
        assert!(diff.active.is_empty());
    }

    fn arb_entry() -> impl Strategy<Value = IndexEntry> {
        (
            "[a-f]{1,2}",
            "[a-c]",
            0u32..5,
            proptest::option::of("2024-0[1-9]-0[1-9]"),
        )
            .prop_map(|(id, seller, variants, lua)| IndexEntry {
                id,
                seller_id: seller,
                price_min: 1.0,
                price_max: f64::from(variants) + 1.0,
                variant_count: variants,
                last_updated_at: lua,
            })
    }

    proptest! {
        #[test]
        fn diffing_against_own_snapshot_is_quiet(
            us in proptest::collection::vec(arb_entry(), 0..12),
            de in proptest::collection::vec(arb_entry(), 0..12),
        ) {
            let current = BTreeMap::from([
                ("us".to_string(), MarketIndex::Loaded(us)),
                ("de".to_string(), MarketIndex::Loaded(de)),
            ]);
            let first = diff_indexes(&current, &BTreeMap::new());
            let second = diff_indexes(&current, &first.snapshots);
            prop_assert!(second.new_items.is_empty());
            prop_assert!(second.changed.is_empty());
            prop_assert!(second.removed.is_empty());
            prop_assert_eq!(second.snapshots, first.snapshots);
        }
    }
}
