//! Infrastructure layer for configuration, logging and external integrations
//!
//! Storage backends, the rate-limited HTTP client with its upstream adapters,
//! and the shared retry policy. Business logic only sees the domain traits.

pub mod config;
pub mod document_store;
pub mod http_client;
pub mod logging;
pub mod retry_policy;
pub mod upstream;

pub use config::{AppConfig, ConfigError, RunOverrides};
pub use document_store::{FsDocumentStore, MemoryDocumentStore, build_document_store};
pub use http_client::HttpClient;
pub use logging::init_logging;
pub use retry_policy::RetryPolicy;
pub use upstream::{HttpIndexSource, HttpItemDetailFetcher};
