//! Collaborator traits used by the sync engine
//!
//! - [`DocumentStore`]: minimal key-value contract over raw bytes
//! - [`IndexSource`]: one market's current upstream index
//! - [`ItemDetailFetcher`]: per-field item detail fetch

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::catalog::{IndexEntry, ItemId, MarketId};
use crate::domain::crawl_record::CrawlMode;
use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::item::ItemDetails;

/// Key-value document store.
///
/// `get` returns `Ok(None)` only for a key that does not exist. Every other
/// failure is an `Err` and must reach the caller, so a flaky read is never
/// mistaken for a missing item.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> SyncResult<()>;

    /// Every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> SyncResult<()>;
}

impl dyn DocumentStore {
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SyncError::Decode {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Serializes with a stable layout so equal values produce equal bytes.
    pub async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> SyncResult<()> {
        let bytes = encode_json(key, value)?;
        self.put(key, bytes).await
    }
}

pub fn encode_json<T: Serialize>(key: &str, value: &T) -> SyncResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| SyncError::Decode {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
pub trait IndexSource: Send + Sync {
    /// Current index entries of one market.
    async fn fetch_index(&self, market: &MarketId) -> SyncResult<Vec<IndexEntry>>;
}

#[async_trait]
pub trait ItemDetailFetcher: Send + Sync {
    /// Fetches the fields `mode` asks for, for every market in `markets`.
    ///
    /// Field-level problems are reported inside [`ItemDetails`]; an `Err`
    /// means the item as a whole could not be fetched.
    async fn fetch_item(
        &self,
        id: &ItemId,
        markets: &[MarketId],
        mode: CrawlMode,
    ) -> SyncResult<ItemDetails>;
}
