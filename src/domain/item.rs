//! Item detail payloads and the core per-item document

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregates::latest_wins;
use super::catalog::{ItemId, MarketId};

/// Per-field outcome of an item-detail fetch.
///
/// A missing field is not an item failure; only an item whose every
/// requested field failed counts as failed.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldResult<T> {
    Captured(T),
    /// Not published yet, or not requested in this crawl mode.
    #[default]
    NotYetAvailable,
    Failed(String),
}

impl<T> FieldResult<T> {
    #[must_use]
    pub const fn captured(&self) -> Option<&T> {
        match self {
            Self::Captured(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_captured(self) -> Option<T> {
        match self {
            Self::Captured(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub const fn is_captured(&self) -> bool {
        matches!(self, Self::Captured(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub rating: u8,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOption {
    pub method: String,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub days_min: Option<u32>,
    #[serde(default)]
    pub days_max: Option<u32>,
}

/// Everything one item-detail fetch returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDetails {
    pub reviews: FieldResult<Vec<Review>>,
    pub description: FieldResult<String>,
    pub shipping: BTreeMap<MarketId, FieldResult<Vec<ShippingOption>>>,
    pub share_link: FieldResult<String>,
    /// Asset folder hashes the item's images are stored under.
    pub images: FieldResult<BTreeSet<String>>,
}

impl ItemDetails {
    /// True when at least one field was requested and every requested one failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        let any_captured = self.reviews.is_captured()
            || self.description.is_captured()
            || self.share_link.is_captured()
            || self.images.is_captured()
            || self.shipping.values().any(FieldResult::is_captured);
        let any_failed = self.reviews.is_failed()
            || self.description.is_failed()
            || self.share_link.is_failed()
            || self.images.is_failed()
            || self.shipping.values().any(FieldResult::is_failed);

        any_failed && !any_captured
    }

    /// Reasons of every failed field, for the failure ledger.
    #[must_use]
    pub fn failure_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        let mut push = |field: &str, reason: Option<&String>| {
            if let Some(reason) = reason {
                reasons.push(format!("{field}: {reason}"));
            }
        };
        push("reviews", failed_reason(&self.reviews));
        push("description", failed_reason(&self.description));
        push("share_link", failed_reason(&self.share_link));
        push("images", failed_reason(&self.images));
        for (market, field) in &self.shipping {
            push(&format!("shipping[{market}]"), failed_reason(field));
        }
        reasons
    }
}

const fn failed_reason<T>(field: &FieldResult<T>) -> Option<&String> {
    match field {
        FieldResult::Failed(reason) => Some(reason),
        _ => None,
    }
}

/// `items/<id>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDocument {
    pub id: ItemId,
    pub markets: BTreeSet<MarketId>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields of the core document captured by one crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDocumentPatch {
    pub id: ItemId,
    pub markets: BTreeSet<MarketId>,
    pub description: Option<String>,
    pub reviews: Option<Vec<Review>>,
    pub refreshed_at: DateTime<Utc>,
}

impl ItemDocumentPatch {
    /// Applies the patch over the stored document.
    ///
    /// Reviews are unioned by review id (incoming wins on the same id) and
    /// kept sorted; a description is only replaced when one was captured.
    #[must_use]
    pub fn apply(&self, stored: Option<&ItemDocument>) -> ItemDocument {
        let mut reviews: BTreeMap<String, Review> = stored
            .map(|doc| doc.reviews.iter().map(|r| (r.id.clone(), r.clone())).collect())
            .unwrap_or_default();
        if let Some(incoming) = &self.reviews {
            for review in incoming {
                reviews.insert(review.id.clone(), review.clone());
            }
        }

        ItemDocument {
            id: self.id.clone(),
            markets: self.markets.clone(),
            description: self
                .description
                .clone()
                .or_else(|| stored.and_then(|doc| doc.description.clone())),
            reviews: reviews.into_values().collect(),
            updated_at: latest_wins(stored.and_then(|doc| doc.updated_at), Some(self.refreshed_at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn review(id: &str, rating: u8) -> Review {
        Review {
            id: id.into(),
            rating,
            text: String::new(),
            created_at: None,
        }
    }

    fn markets() -> BTreeSet<MarketId> {
        ["us".to_string()].into_iter().collect()
    }

    #[test]
    fn reviews_only_patch_keeps_description() {
        let at = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let stored = ItemDocument {
            id: "A".into(),
            markets: markets(),
            description: Some("desc".into()),
            reviews: vec![review("r1", 4)],
            updated_at: None,
        };
        let patch = ItemDocumentPatch {
            id: "A".into(),
            markets: markets(),
            description: None,
            reviews: Some(vec![review("r1", 5), review("r2", 3)]),
            refreshed_at: at,
        };
        let merged = patch.apply(Some(&stored));
        assert_eq!(merged.description.as_deref(), Some("desc"));
        assert_eq!(merged.reviews, vec![review("r1", 5), review("r2", 3)]);
        assert_eq!(patch.apply(Some(&merged)), merged);
    }

    #[test]
    fn all_failed_needs_a_failure_and_no_capture() {
        let mut details = ItemDetails {
            reviews: FieldResult::Failed("timeout".into()),
            ..ItemDetails::default()
        };
        assert!(details.all_failed());

        details.description = FieldResult::Captured("d".into());
        assert!(!details.all_failed());

        assert!(!ItemDetails::default().all_failed());
    }

    #[test]
    fn failure_reasons_name_the_field() {
        let mut details = ItemDetails::default();
        details
            .shipping
            .insert("de".into(), FieldResult::Failed("502".into()));
        assert_eq!(details.failure_reasons(), vec!["shipping[de]: 502".to_string()]);
    }
}
