//! catalog-sync operator entry point
//!
//! Loads configuration, applies command-line overrides, wires the run context
//! and executes one stage. The process exits non-zero only for authentication,
//! configuration and persistence failures.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use catalog_sync_lib::application::{RunOptions, Stage, SyncContext, SyncRunner};
use catalog_sync_lib::domain::{CrawlMode, SyncError};
use catalog_sync_lib::infrastructure::{AppConfig, ConfigError, RunOverrides, init_logging};

#[derive(Parser, Debug)]
#[command(
    name = "catalog-sync",
    version,
    about = "Incremental multi-market catalog crawl and retention"
)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML). Defaults to the user config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stage to run: index, crawl or prune.
    #[arg(long, default_value = "crawl")]
    stage: Stage,

    /// Restrict the run to this market; repeatable.
    #[arg(long = "market")]
    markets: Vec<String>,

    /// Concurrent item fetches.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Full crawl for every planned item.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Fixed crawl mode for every item (full | partial).
    #[arg(long)]
    mode: Option<CrawlMode>,

    /// crawl: build and report the plan without fetching or writing.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Retention window in days.
    #[arg(long)]
    retention_days: Option<u32>,

    /// Required for prune to delete anything.
    #[arg(long, default_value_t = false)]
    confirm: bool,

    /// Print the stage report as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl Cli {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            markets: self.markets.clone(),
            concurrency: self.concurrency,
            force_full: self.force,
            fixed_mode: self.mode,
            retention_days: self.retention_days,
        }
    }
}

/// Whether a failed run should fail the process.
fn is_fatal(error: &anyhow::Error) -> bool {
    if error.downcast_ref::<ConfigError>().is_some() {
        return true;
    }
    match error.downcast_ref::<SyncError>() {
        Some(
            SyncError::AuthRequired { .. }
            | SyncError::Persistence { .. }
            | SyncError::Decode { .. }
            | SyncError::InvalidInput(_),
        ) => true,
        Some(_) => false,
        None => true,
    }
}

fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, no new items will be started");
            token.cancel();
        }
    });
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&cli.overrides())?;
    init_logging(&config.logging).context("failed to initialize logging")?;
    info!("🚀 catalog-sync {} starting stage {}", env!("CARGO_PKG_VERSION"), cli.stage);

    let token = CancellationToken::new();
    spawn_shutdown_listener(token.clone());
    let context = SyncContext::from_config(config)?.with_cancellation_token(token);

    let options = RunOptions {
        dry_run: cli.dry_run,
        confirm: cli.confirm,
    };
    if cli.stage == Stage::Prune && !cli.confirm {
        info!("🔎 Prune runs as dry-run; pass --confirm to delete");
    }

    let report = SyncRunner::new(&context).run(cli.stage, options).await?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to encode report")?
        );
    } else {
        println!("{report}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_fatal(&e) => {
            error!("❌ Run failed: {:#}", e);
            eprintln!("catalog-sync: {e:#}");
            ExitCode::FAILURE
        }
        Err(e) => {
            warn!("⚠️ Run ended early: {:#}", e);
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_operator_flags() {
        let cli = Cli::try_parse_from([
            "catalog-sync",
            "--stage",
            "prune",
            "--market",
            "us",
            "--market",
            "de",
            "--retention-days",
            "30",
            "--mode",
            "reviews",
            "--confirm",
        ])
        .unwrap();
        assert_eq!(cli.stage, Stage::Prune);
        assert_eq!(cli.markets, vec!["us".to_string(), "de".to_string()]);
        let overrides = cli.overrides();
        assert_eq!(overrides.retention_days, Some(30));
        assert_eq!(overrides.fixed_mode, Some(CrawlMode::Partial));
        assert!(cli.confirm);
    }

    #[test]
    fn only_auth_config_and_persistence_are_fatal() {
        let auth = anyhow::Error::new(SyncError::AuthRequired { message: "x".into() });
        let transient = anyhow::Error::new(SyncError::transient("us", "503"));
        let config = anyhow::Error::new(ConfigError::Validation { message: "x".into() });
        assert!(is_fatal(&auth));
        assert!(is_fatal(&config));
        assert!(!is_fatal(&transient));
    }
}
