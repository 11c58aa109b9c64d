//! CLI Command Definitions
//!
//! Argument parsing for the whalewatch binary.

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

/// Whalewatch - whale accumulation tracker for EVM chains
#[derive(Parser, Debug)]
#[command(
    name = "whalewatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Whale accumulation tracker for EVM chains",
    long_about = "Whalewatch snapshots the balances of a configured whale universe and \
                  compares current holdings (native, wrapped and liquid-staked) against \
                  history to score accumulation and tag notable behavior."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one accumulation analysis against stored history
    Analyze(AnalyzeCmd),

    /// Take a balance snapshot of the whale universe and persist it
    Snapshot(SnapshotCmd),
}

/// Run one analysis pass
#[derive(Parser, Debug)]
pub struct AnalyzeCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Staked-derivative to native exchange rate
    #[arg(long, value_name = "RATE", default_value = "1.0")]
    pub rate: Decimal,

    /// Native asset price change over the lookback window, percent
    #[arg(long, value_name = "PCT")]
    pub price_trend: Option<Decimal>,

    /// Write the full metric as JSON to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Persist one balance snapshot
#[derive(Parser, Debug)]
pub struct SnapshotCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}
