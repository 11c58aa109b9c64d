//! EVM chain access via the Multicall3 aggregator.

pub mod multicall;

pub use multicall::{MulticallBalanceClient, MulticallConfig, DEFAULT_MULTICALL3_ADDRESS};
