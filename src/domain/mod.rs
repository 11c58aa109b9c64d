//! Domain Layer - Core business logic for the accumulation tracker
//!
//! This module contains pure domain types and logic with no external I/O.
//! All network and persistence interactions happen through the ports layer.
//!
//! - `types`: Balance records, per-address lookup outcomes, the metric
//! - `stats`: Gini, median, MAD and zero-guarded scoring
//! - `tags`: Ordered data-driven tag rule table

pub mod types;
pub mod stats;
pub mod tags;

pub use types::{
    AccountBalance, AccumulationMetric, BalanceLookup, BalanceSnapshot, MetricTag,
    WealthBreakdown,
};
