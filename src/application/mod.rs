//! Application Layer - use cases composed from ports.

pub mod provider;
pub mod engine;

pub use engine::{summary, AccumulationEngine, AnalysisError, EngineConfig, RunParams};
pub use provider::AccountSetProvider;
