//! Retention metadata and the per-item retention state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::aggregates::{Mergeable, last_write_wins_opt};

/// `aggregates/retention-meta.json` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionMetaEntry {
    /// First seen at.
    pub fsa: DateTime<Utc>,
    /// Last seen in any market index. Never moves backwards.
    #[serde(alias = "lua")]
    pub lsi: DateTime<Utc>,
    /// Last update reason (`new`, `changed:lua`, `changed:sig`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lur: Option<String>,
}

impl RetentionMetaEntry {
    #[must_use]
    pub fn seen_at(now: DateTime<Utc>, reason: Option<String>) -> Self {
        Self {
            fsa: now,
            lsi: now,
            lur: reason,
        }
    }
}

impl Mergeable for RetentionMetaEntry {
    fn merge(&self, incoming: &Self) -> Self {
        Self {
            fsa: self.fsa.min(incoming.fsa),
            lsi: self.lsi.max(incoming.lsi),
            lur: last_write_wins_opt(&self.lur, &incoming.lur),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionState {
    /// Present in at least one current market index.
    Active,
    /// Absent everywhere, but seen within the retention window.
    Grace,
    /// Absent everywhere and last seen before the cutoff.
    Expired,
}

/// Everything last seen strictly before this instant is expired.
#[must_use]
pub fn retention_cutoff(now: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(window_days))
}

#[must_use]
pub fn classify_retention(
    in_active_union: bool,
    lsi: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> RetentionState {
    if in_active_union {
        RetentionState::Active
    } else if lsi < cutoff {
        RetentionState::Expired
    } else {
        RetentionState::Grace
    }
}
