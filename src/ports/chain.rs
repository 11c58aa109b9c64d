use async_trait::async_trait;
use ethers::types::Address;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::types::BalanceLookup;

/// Chain read error type
#[derive(Debug, Error, Clone)]
pub enum ChainError {
    #[error("RPC provider error: {0}")]
    Provider(String),

    #[error("batch resource limit: {0}")]
    ResourceLimit(String),

    #[error("malformed batch response: {0}")]
    InvalidResponse(String),

    #[error("invalid RPC endpoint: {0}")]
    Endpoint(String),
}

/// Read-only access to current on-chain balances.
///
/// All calls are independent, idempotent reads; implementations are free to
/// issue them concurrently. Every requested address appears exactly once in
/// the returned map, either with a verified value or as
/// [`BalanceLookup::Failed`] - never silently dropped, never coerced to zero.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Fetch native-asset balances for many addresses.
    async fn get_native_balances(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, BalanceLookup>, ChainError>;

    /// Fetch ERC20 balances of `token` for many addresses.
    async fn get_token_balances(
        &self,
        addresses: &[Address],
        token: Address,
    ) -> Result<HashMap<Address, BalanceLookup>, ChainError>;

    /// Monotonically increasing reference point (the chain head block).
    async fn get_reference_point(&self) -> Result<u64, ChainError>;
}
