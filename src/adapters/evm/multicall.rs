//! Multicall3 batched balance client.
//!
//! Fetches balances for many addresses per network round-trip through the
//! Multicall3 `aggregate3` entrypoint (`allowFailure = true` per call). When
//! a provider rejects a batch for resource reasons, the chunk is halved and
//! both halves retried concurrently down to a floor; at the floor every
//! address in the sub-chunk is marked failed, never zero.

use ethers::abi::Abi;
use ethers::contract::Contract;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes, U256};
use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::types::BalanceLookup;
use crate::ports::chain::{ChainError, ChainReader};

use async_trait::async_trait;

const MULTICALL3_ABI: &str = r#"[{"inputs":[{"components":[{"internalType":"address","name":"target","type":"address"},{"internalType":"bool","name":"allowFailure","type":"bool"},{"internalType":"bytes","name":"callData","type":"bytes"}],"internalType":"struct Multicall3.Call3[]","name":"calls","type":"tuple[]"}],"name":"aggregate3","outputs":[{"components":[{"internalType":"bool","name":"success","type":"bool"},{"internalType":"bytes","name":"returnData","type":"bytes"}],"internalType":"struct Multicall3.Result[]","name":"returnData","type":"tuple[]"}],"stateMutability":"payable","type":"function"}]"#;

/// Canonical Multicall3 deployment, same address on all major networks.
pub const DEFAULT_MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// `getEthBalance(address)` on the Multicall3 contract itself.
const GET_ETH_BALANCE_SELECTOR: [u8; 4] = [0x4d, 0x23, 0x01, 0xcc];
/// ERC20 `balanceOf(address)`.
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Provider error fragments that mean "the batch was too big", the only
/// condition worth an adaptive retry. Anything else fails the chunk
/// immediately so genuine protocol errors are never masked as transient.
const RESOURCE_LIMIT_PATTERNS: &[&str] = &[
    "out of gas",
    "gas limit",
    "gas required exceeds",
    "execution reverted",
    "request entity too large",
    "response size",
    "query timeout",
    "timed out",
];

pub fn is_resource_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    RESOURCE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Decode one per-address `aggregate3` result.
///
/// Maps to zero only for a verified 32-byte success word of zero; a failed
/// call or malformed return data is an explicit failure marker.
pub fn decode_balance_result(success: bool, data: &[u8]) -> BalanceLookup {
    if !success {
        return BalanceLookup::Failed;
    }
    if data.len() != 32 {
        return BalanceLookup::Failed;
    }
    BalanceLookup::Value(U256::from_big_endian(data))
}

fn encode_call(selector: [u8; 4], address: Address) -> Bytes {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(address.as_bytes());
    Bytes::from(data)
}

pub fn encode_native_balance_call(holder: Address) -> Bytes {
    encode_call(GET_ETH_BALANCE_SELECTOR, holder)
}

pub fn encode_erc20_balance_call(holder: Address) -> Bytes {
    encode_call(BALANCE_OF_SELECTOR, holder)
}

/// Which balance a batch is after.
#[derive(Debug, Clone, Copy)]
enum CallKind {
    Native,
    Token(Address),
}

#[derive(Debug, Clone)]
pub struct MulticallConfig {
    pub multicall_address: Address,
    /// Addresses per `aggregate3` request before any adaptive shrink.
    pub chunk_size: usize,
    /// Floor for the adaptive shrink; below this the sub-chunk fails.
    pub min_chunk_size: usize,
    pub network: String,
}

impl Default for MulticallConfig {
    fn default() -> Self {
        Self {
            multicall_address: DEFAULT_MULTICALL3_ADDRESS.parse().expect("const address"),
            chunk_size: 500,
            min_chunk_size: 50,
            network: "mainnet".to_string(),
        }
    }
}

/// Batched balance client over a single HTTP provider.
#[derive(Clone)]
pub struct MulticallBalanceClient {
    provider: Arc<Provider<Http>>,
    contract: Contract<Provider<Http>>,
    config: MulticallConfig,
}

impl MulticallBalanceClient {
    pub fn new(rpc_url: &str, config: MulticallConfig) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Endpoint(e.to_string()))?;
        let provider = Arc::new(provider);
        let abi: Abi = serde_json::from_str(MULTICALL3_ABI)
            .map_err(|e| ChainError::Endpoint(format!("Multicall3 ABI: {}", e)))?;
        let contract = Contract::new(config.multicall_address, abi, provider.clone());
        Ok(Self {
            provider,
            contract,
            config,
        })
    }

    /// Issue exactly one `aggregate3` request for `chunk`.
    async fn aggregate(
        &self,
        chunk: &[Address],
        kind: CallKind,
    ) -> Result<Vec<(bool, Bytes)>, ChainError> {
        let calls: Vec<(Address, bool, Bytes)> = chunk
            .iter()
            .map(|&holder| match kind {
                CallKind::Native => (
                    self.config.multicall_address,
                    true,
                    encode_native_balance_call(holder),
                ),
                CallKind::Token(token) => (token, true, encode_erc20_balance_call(holder)),
            })
            .collect();

        let response: Vec<(bool, Bytes)> = self
            .contract
            .method::<(Vec<(Address, bool, Bytes)>,), Vec<(bool, Bytes)>>("aggregate3", (calls,))
            .map_err(|e| ChainError::Provider(e.to_string()))?
            .call()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if is_resource_limit(&msg) {
                    ChainError::ResourceLimit(msg)
                } else {
                    ChainError::Provider(msg)
                }
            })?;

        if response.len() != chunk.len() {
            return Err(ChainError::InvalidResponse(format!(
                "expected {} results, got {}",
                chunk.len(),
                response.len()
            )));
        }
        Ok(response)
    }

    async fn fetch_all(
        &self,
        addresses: &[Address],
        kind: CallKind,
    ) -> HashMap<Address, BalanceLookup> {
        let chunk_futures = addresses.chunks(self.config.chunk_size).map(|chunk| async move {
            let issue = |addrs: Vec<Address>| async move { self.aggregate(&addrs, kind).await };
            fetch_with(
                chunk,
                self.config.chunk_size,
                self.config.min_chunk_size,
                &issue,
            )
            .await
        });

        let mut merged = HashMap::with_capacity(addresses.len());
        for partial in join_all(chunk_futures).await {
            merged.extend(partial);
        }
        merged
    }
}

/// Recursive chunk-split fetch: a pure `(chunk) -> partial map` function with
/// no shared accumulator, so both halves of a split run concurrently and the
/// partial maps merge by plain union.
fn fetch_with<'a, F, Fut>(
    chunk: &'a [Address],
    size: usize,
    min_size: usize,
    issue: &'a F,
) -> BoxFuture<'a, HashMap<Address, BalanceLookup>>
where
    F: Fn(Vec<Address>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<(bool, Bytes)>, ChainError>> + Send + 'a,
{
    Box::pin(async move {
        if chunk.is_empty() {
            return HashMap::new();
        }
        match issue(chunk.to_vec()).await {
            Ok(results) => {
                let mut out = HashMap::with_capacity(chunk.len());
                for (addr, (success, data)) in chunk.iter().zip(results) {
                    let lookup = decode_balance_result(success, data.as_ref());
                    match lookup {
                        BalanceLookup::Value(v) if v.is_zero() => {
                            debug!(address = ?addr, "verified zero balance");
                        }
                        BalanceLookup::Failed => {
                            debug!(address = ?addr, "per-address lookup failed in batch");
                        }
                        _ => {}
                    }
                    out.insert(*addr, lookup);
                }
                out
            }
            Err(ChainError::ResourceLimit(msg)) => {
                let next = size / 2;
                if next < min_size || chunk.len() <= 1 {
                    warn!(
                        addresses = chunk.len(),
                        "resource limit at minimum chunk size, marking sub-chunk failed: {}", msg
                    );
                    return chunk.iter().map(|a| (*a, BalanceLookup::Failed)).collect();
                }
                warn!(
                    addresses = chunk.len(),
                    next_size = next,
                    "resource limit hit, splitting chunk: {}", msg
                );
                let (left, right) = chunk.split_at(chunk.len() / 2);
                let (l, r) = tokio::join!(
                    fetch_with(left, next, min_size, issue),
                    fetch_with(right, next, min_size, issue)
                );
                let mut out = l;
                out.extend(r);
                out
            }
            Err(err) => {
                error!(
                    addresses = chunk.len(),
                    "batch call failed, no retry: {}", err
                );
                chunk.iter().map(|a| (*a, BalanceLookup::Failed)).collect()
            }
        }
    })
}

#[async_trait]
impl ChainReader for MulticallBalanceClient {
    async fn get_native_balances(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, BalanceLookup>, ChainError> {
        Ok(self.fetch_all(addresses, CallKind::Native).await)
    }

    async fn get_token_balances(
        &self,
        addresses: &[Address],
        token: Address,
    ) -> Result<HashMap<Address, BalanceLookup>, ChainError> {
        Ok(self.fetch_all(addresses, CallKind::Token(token)).await)
    }

    async fn get_reference_point(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| ChainError::Provider(e.to_string()))
    }
}
