//! Snapshot persistence adapters.

pub mod jsonl;

pub use jsonl::JsonlSnapshotStore;
