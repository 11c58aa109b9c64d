//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - Batched on-chain balance reads (Multicall3 in production)
//! - Snapshot persistence (append, nearest-timestamp, density, ranking)

pub mod chain;
pub mod store;
pub mod mocks;

pub use chain::{ChainError, ChainReader};
pub use store::{SnapshotStore, StoreError};
