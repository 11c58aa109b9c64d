//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - EVM: Multicall3 batched balance client
//! - Store: append-only JSONL snapshot persistence
//! - CLI: argument parsing for the binary

pub mod cli;
pub mod evm;
pub mod store;

pub use evm::MulticallBalanceClient;
pub use store::JsonlSnapshotStore;
