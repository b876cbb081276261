//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate:
//! 1. Built-in defaults (`defaults` module)
//! 2. Optional config file (TOML/JSON/YAML, picked by extension)
//! 3. `CATALOG_SYNC__*` environment variables (`__` separates sections)
//! 4. Operator overrides from the command line ([`RunOverrides`])

#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::constants::platform;
use crate::domain::{CrawlMode, MarketId};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Default values used when neither file nor environment set a field
pub mod defaults {
    pub const MARKETS: &[&str] = &["us"];

    pub const CONCURRENCY: usize = 4;
    pub const MAX_RUNTIME_SECONDS: u64 = 14 * 60;
    pub const FULL_REFRESH_DAYS: u32 = 80;
    pub const PARTIAL_REFRESH_DAYS: u32 = 7;
    pub const REQUIRE_INITIAL_FULL: bool = true;

    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 500;
    pub const RETRY_MULTIPLIER: f64 = 2.0;
    pub const RETRY_MAX_DELAY_MS: u64 = 8_000;
    pub const RETRY_JITTER: bool = true;

    pub const STORAGE_BACKEND: &str = "fs";
    pub const STORAGE_DIR_NAME: &str = "catalog-sync";

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const MAX_REQUESTS_PER_SECOND: u32 = 4;
    pub const USER_AGENT: &str = "catalog-sync/0.1";
    pub const INDEX_URL_TEMPLATE: &str = "{host}/api/index/{market}";
    pub const DETAIL_URL_TEMPLATE: &str = "{host}/api/items/{id}?markets={markets}&mode={mode}";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_FILE_OUTPUT: bool = false;
    pub const LOG_FILE_NAME: &str = "catalog-sync.log";
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Every market the catalog is listed in, in processing order.
    pub markets: Vec<MarketId>,
    /// Operator restriction of the index and crawl stages to some markets.
    /// Retention always considers every configured market.
    #[serde(skip)]
    pub market_filter: Vec<MarketId>,
    pub crawl: CrawlConfig,
    pub retention: RetentionConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Width of the task pool.
    pub concurrency: usize,

    /// Requested run length; clamped to the platform hard cap.
    pub max_runtime_seconds: u64,

    /// Head-room kept before the clamped runtime ends. Values below the
    /// platform minimum are raised to it.
    pub safety_buffer_seconds: u64,

    /// Full re-crawl once the last full crawl is older than this.
    pub full_refresh_days: u32,

    /// Reviews-only refresh once the last refresh is older than this.
    pub partial_refresh_days: u32,

    /// Crawl every planned item in this mode.
    pub fixed_mode: Option<CrawlMode>,

    /// Full crawl for everything.
    pub force_full: bool,

    /// Items that never completed a full crawl get one before any partial refresh.
    pub require_initial_full: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub window_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One file per key under `root`.
    Fs,
    /// Process-local; nothing survives the run.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the `fs` backend. Defaults to the user data dir.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Primary host first, then alternates tried on retry.
    pub hosts: Vec<String>,
    /// Placeholders: `{host}`, `{market}`.
    pub index_url_template: String,
    /// Placeholders: `{host}`, `{id}`, `{markets}`, `{mode}`.
    pub detail_url_template: String,
    pub request_timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub user_agent: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    /// Also write logs to a daily-rolling file
    pub file_output: bool,

    /// Directory for log files; defaults next to the executable
    pub directory: Option<PathBuf>,

    pub file_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            markets: defaults::MARKETS.iter().map(|m| (*m).to_string()).collect(),
            market_filter: Vec::new(),
            crawl: CrawlConfig::default(),
            retention: RetentionConfig::default(),
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONCURRENCY,
            max_runtime_seconds: defaults::MAX_RUNTIME_SECONDS,
            safety_buffer_seconds: platform::SAFETY_BUFFER_SECONDS,
            full_refresh_days: defaults::FULL_REFRESH_DAYS,
            partial_refresh_days: defaults::PARTIAL_REFRESH_DAYS,
            fixed_mode: None,
            force_full: false,
            require_initial_full: defaults::REQUIRE_INITIAL_FULL,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_days: crate::domain::constants::retention::DEFAULT_WINDOW_DAYS,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            multiplier: defaults::RETRY_MULTIPLIER,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            jitter: defaults::RETRY_JITTER,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: None,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            index_url_template: defaults::INDEX_URL_TEMPLATE.to_string(),
            detail_url_template: defaults::DETAIL_URL_TEMPLATE.to_string(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            file_output: defaults::LOG_FILE_OUTPUT,
            directory: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
        }
    }
}

impl CrawlConfig {
    /// Wall-clock budget for dispatching new tasks:
    /// `min(max_runtime, hard_cap) - max(safety_buffer, platform minimum)`.
    #[must_use]
    pub fn dispatch_budget(&self) -> Duration {
        let runtime = self.max_runtime_seconds.min(platform::HARD_CAP_SECONDS);
        let buffer = self.safety_buffer_seconds.max(platform::SAFETY_BUFFER_SECONDS);
        Duration::from_secs(runtime.saturating_sub(buffer))
    }
}

/// Command-line overrides applied over the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    /// Restrict the run to these markets (must be configured ones).
    pub markets: Vec<MarketId>,
    pub concurrency: Option<usize>,
    pub force_full: bool,
    pub fixed_mode: Option<CrawlMode>,
    pub retention_days: Option<u32>,
}

impl AppConfig {
    /// Loads defaults, then the optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_path = path.map(Path::to_path_buf).or_else(Self::default_config_path);

        let mut builder = config::Config::builder();
        if let Some(file_path) = &file_path {
            builder = builder.add_source(
                config::File::from(file_path.as_path()).required(path.is_some()),
            );
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("CATALOG_SYNC")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("markets")
                    .with_list_parse_key("upstream.hosts"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        info!(
            "⚙️ Configuration loaded (file: {:?}, markets: {:?})",
            file_path, config.markets
        );
        Ok(config)
    }

    /// `<user config dir>/catalog-sync/config.toml`
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(defaults::STORAGE_DIR_NAME).join("config.toml"))
    }

    /// Root directory of the `fs` storage backend.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.storage.root.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(defaults::STORAGE_DIR_NAME)
                .join("store")
        })
    }

    pub fn apply_overrides(&mut self, overrides: &RunOverrides) -> Result<(), ConfigError> {
        if !overrides.markets.is_empty() {
            if let Some(unknown) = overrides.markets.iter().find(|m| !self.markets.contains(m)) {
                return Err(ConfigError::Validation {
                    message: format!("market filter names unconfigured market '{}'", unknown),
                });
            }
            self.market_filter.clone_from(&overrides.markets);
        }
        if let Some(concurrency) = overrides.concurrency {
            self.crawl.concurrency = concurrency;
        }
        if overrides.force_full {
            self.crawl.force_full = true;
        }
        if overrides.fixed_mode.is_some() {
            self.crawl.fixed_mode = overrides.fixed_mode;
        }
        if let Some(days) = overrides.retention_days {
            self.retention.window_days = days;
        }
        self.validate()
    }

    /// Markets the index and crawl stages work on: the filter when set,
    /// otherwise every configured market.
    pub fn run_markets(&self) -> impl Iterator<Item = &MarketId> {
        let filter = &self.market_filter;
        self.markets
            .iter()
            .filter(move |market| filter.is_empty() || filter.contains(market))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if self.markets.is_empty() {
            return fail("at least one market must be configured");
        }
        if self.crawl.concurrency == 0 {
            return fail("crawl.concurrency must be greater than 0");
        }
        if self.crawl.partial_refresh_days >= self.crawl.full_refresh_days {
            return fail("crawl.partial_refresh_days must be smaller than crawl.full_refresh_days");
        }
        if self.crawl.dispatch_budget().is_zero() {
            return fail("crawl.safety_buffer_seconds leaves no time to dispatch work");
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1");
        }
        if self.retry.multiplier < 1.0 {
            return fail("retry.multiplier must be >= 1.0");
        }
        if self.upstream.max_requests_per_second == 0 {
            return fail("upstream.max_requests_per_second must be greater than 0");
        }
        Ok(())
    }
}
