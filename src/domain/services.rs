//! Domain services
//!
//! Collaborator seams the sync engine depends on. Implementations live in the
//! infrastructure layer (or in tests) and are injected through the run context.

pub mod clock;
pub mod sync_services;

pub use clock::{Clock, ManualClock, SystemClock};
pub use sync_services::{DocumentStore, IndexSource, ItemDetailFetcher};
