//! Whalewatch - Whale Accumulation Tracker
//!
//! Tracks native, wrapped and liquid-staked balances of a whale universe on
//! EVM chains and scores accumulation against stored history.

mod adapters;
mod application;
mod config;
mod domain;
mod ports;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::HashSet;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::adapters::cli::{AnalyzeCmd, CliApp, Command, SnapshotCmd};
use crate::adapters::evm::MulticallBalanceClient;
use crate::adapters::store::JsonlSnapshotStore;
use crate::application::{summary, AccountSetProvider, AccumulationEngine, RunParams};
use crate::config::load_config;
use crate::domain::{AccountBalance, BalanceSnapshot};
use crate::ports::chain::ChainReader;
use crate::ports::store::SnapshotStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (secrets go here, not in config.toml)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();

    match app.command {
        Command::Analyze(cmd) => analyze_command(cmd, app.verbose, app.debug).await,
        Command::Snapshot(cmd) => snapshot_command(cmd, app.verbose, app.debug).await,
    }
}

/// Verbosity flags escalate past the configured level; without them the
/// `[logging]` section decides.
fn init_logging(verbose: bool, debug: bool, config_level: &str) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::new(config_level)
    };

    fmt().with_env_filter(filter).init();
}

async fn analyze_command(cmd: AnalyzeCmd, verbose: bool, debug: bool) -> Result<()> {
    let config = load_config(&cmd.config).context("Failed to load configuration")?;
    init_logging(verbose, debug, &config.logging.level);

    let chain = Arc::new(
        MulticallBalanceClient::new(&config.network.get_rpc_url(), config.multicall_config()?)
            .context("Failed to create chain client")?,
    );
    let store = Arc::new(
        JsonlSnapshotStore::open(config.storage.resolved_snapshot_path())
            .context("Failed to open snapshot store")?,
    );

    let exclusions: HashSet<_> = config.exclusion_addresses()?.into_iter().collect();
    let provider =
        AccountSetProvider::new(chain.clone(), config.universe_addresses()?, exclusions);

    let engine = AccumulationEngine::new(chain, store, provider, config.engine_config()?);
    let params = RunParams {
        exchange_rate: cmd.rate,
        price_trend_pct: cmd.price_trend,
    };

    let metric = engine.run(&params).await.context("Analysis failed")?;

    println!("{}", summary(&metric));

    if let Some(path) = cmd.output {
        let json = serde_json::to_string_pretty(&metric)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write metric to {}", path.display()))?;
        tracing::info!(path = %path.display(), "metric exported");
    }

    Ok(())
}

async fn snapshot_command(cmd: SnapshotCmd, verbose: bool, debug: bool) -> Result<()> {
    let config = load_config(&cmd.config).context("Failed to load configuration")?;
    init_logging(verbose, debug, &config.logging.level);

    let chain =
        MulticallBalanceClient::new(&config.network.get_rpc_url(), config.multicall_config()?)
            .context("Failed to create chain client")?;
    let store = JsonlSnapshotStore::open(config.storage.resolved_snapshot_path())
        .context("Failed to open snapshot store")?;

    let exclusions: HashSet<_> = config.exclusion_addresses()?.into_iter().collect();
    let addresses: Vec<_> = config
        .universe_addresses()?
        .into_iter()
        .filter(|a| !exclusions.contains(a))
        .collect();

    let block = chain
        .get_reference_point()
        .await
        .context("Failed to read chain head")?;
    let balances = chain
        .get_native_balances(&addresses)
        .await
        .context("Balance snapshot failed")?;

    // Failed lookups are not persisted; a snapshot never contains a balance
    // we could not verify.
    let now = Utc::now();
    let records: Vec<BalanceSnapshot> = balances
        .iter()
        .filter_map(|(address, lookup)| {
            lookup.value().map(|raw| {
                let observed = AccountBalance {
                    address: *address,
                    raw,
                    as_of_block: block,
                    network: config.network.network.clone(),
                };
                BalanceSnapshot::from_balance(&observed, now, now)
            })
        })
        .collect();
    let failed = addresses.len() - records.len();

    let saved = store
        .save_batch(&records)
        .await
        .context("Failed to persist snapshot")?;

    println!(
        "Snapshot at block {}: {} balances saved, {} lookups failed",
        block, saved, failed
    );
    Ok(())
}
