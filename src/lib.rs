//! Whalewatch - Whale Accumulation Tracker Library
//!
//! Tracks the largest holders of a native EVM asset, snapshots their balances
//! and scores whether large holders are net accumulating or distributing over
//! a lookback window.
//!
//! # Modules
//!
//! - `domain`: Core types and pure logic (balances, metric, statistics, tag rules)
//! - `ports`: Trait abstractions (ChainReader, SnapshotStore)
//! - `adapters`: External implementations (Multicall3 client, JSONL store)
//! - `config`: Configuration loading and validation
//! - `application`: AccountSetProvider and the AccumulationEngine pipeline

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
