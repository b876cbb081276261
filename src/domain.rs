//! Domain module - Core entities of the catalog sync
//!
//! Index snapshots, crawl records, aggregate documents, retention metadata,
//! the error taxonomy and the collaborator traits the engine is written
//! against. Nothing in here performs I/O.

pub mod aggregates;
pub mod catalog;
pub mod constants;
pub mod crawl_record;
pub mod errors;
pub mod item;
pub mod keys;
pub mod retention;
pub mod services;

pub use aggregates::{
    AggregateDocument, ImageMeta, Mergeable, ShareEntry, ShippingMeta, ShippingSummary,
};
pub use catalog::{IndexEntry, ItemId, MarketId, MarketIndex, MarketSnapshot, SnapshotEntry};
pub use crawl_record::{CrawlDecision, CrawlMode, CrawlRecord};
pub use errors::{SyncError, SyncResult};
pub use item::{FieldResult, ItemDetails, ItemDocument, ItemDocumentPatch, Review, ShippingOption};
pub use retention::{RetentionMetaEntry, RetentionState};
