//! Per-item crawl bookkeeping
//!
//! A [`CrawlRecord`] remembers when the item was last fully crawled, last
//! refreshed in any mode, and which index signature the last successful
//! crawl acted upon. Records live in the `crawl-state` aggregate and only the
//! end-of-run merge writes them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregates::{Mergeable, last_write_wins_opt, latest_wins};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Description, reviews, shipping and share link.
    Full,
    /// Reviews only.
    Partial,
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "partial" | "reviews" => Ok(Self::Partial),
            other => Err(format!("unknown crawl mode '{other}' (expected full|partial)")),
        }
    }
}

/// Outcome of the crawl-kind decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlDecision {
    Crawl(CrawlMode),
    Skip,
}

impl CrawlDecision {
    #[must_use]
    pub const fn mode(self) -> Option<CrawlMode> {
        match self {
            Self::Crawl(mode) => Some(mode),
            Self::Skip => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRecord {
    #[serde(default)]
    pub last_full_crawl: Option<DateTime<Utc>>,
    /// Any successful crawl, full or partial.
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_indexed_signature: Option<String>,
    #[serde(default)]
    pub last_indexed_lua: Option<String>,
}

impl Mergeable for CrawlRecord {
    fn merge(&self, incoming: &Self) -> Self {
        Self {
            last_full_crawl: latest_wins(self.last_full_crawl, incoming.last_full_crawl),
            last_refresh: latest_wins(self.last_refresh, incoming.last_refresh),
            last_indexed_signature: last_write_wins_opt(
                &self.last_indexed_signature,
                &incoming.last_indexed_signature,
            ),
            last_indexed_lua: last_write_wins_opt(
                &self.last_indexed_lua,
                &incoming.last_indexed_lua,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mode_parses_aliases() {
        assert_eq!("FULL".parse::<CrawlMode>(), Ok(CrawlMode::Full));
        assert_eq!("reviews".parse::<CrawlMode>(), Ok(CrawlMode::Partial));
        assert!("half".parse::<CrawlMode>().is_err());
    }

    #[test]
    fn partial_refresh_never_rolls_back_full_crawl() {
        let full_at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let refresh_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let stored = CrawlRecord {
            last_full_crawl: Some(full_at),
            last_refresh: Some(full_at),
            last_indexed_signature: Some("S1".into()),
            last_indexed_lua: Some("2024-05-01".into()),
        };
        let partial = CrawlRecord {
            last_refresh: Some(refresh_at),
            ..CrawlRecord::default()
        };
        let merged = stored.merge(&partial);
        assert_eq!(merged.last_full_crawl, Some(full_at));
        assert_eq!(merged.last_refresh, Some(refresh_at));
        assert_eq!(merged.last_indexed_signature.as_deref(), Some("S1"));
    }
}
