//! Hand-rolled port mocks with configured responses and recorded calls.
//!
//! Used by unit tests here and by the integration tests under `tests/`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::types::{BalanceLookup, BalanceSnapshot};
use crate::ports::chain::{ChainError, ChainReader};
use crate::ports::store::{SnapshotStore, StoreError};

/// Mock chain reader.
///
/// Native balances default to `Failed` for unconfigured addresses (forcing
/// tests to be explicit about what the chain returned); token balances
/// default to a verified zero, matching ERC20 `balanceOf` semantics for
/// non-holders.
#[derive(Debug, Default)]
pub struct MockChainReader {
    native: Arc<Mutex<HashMap<Address, BalanceLookup>>>,
    tokens: Arc<Mutex<HashMap<Address, HashMap<Address, BalanceLookup>>>>,
    reference_point: Arc<Mutex<u64>>,
    native_error: Arc<Mutex<Option<ChainError>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_native_balance(self, address: Address, raw: U256) -> Self {
        self.native
            .lock()
            .unwrap()
            .insert(address, BalanceLookup::Value(raw));
        self
    }

    pub fn with_native_failed(self, address: Address) -> Self {
        self.native
            .lock()
            .unwrap()
            .insert(address, BalanceLookup::Failed);
        self
    }

    pub fn with_token_balance(self, token: Address, holder: Address, raw: U256) -> Self {
        self.tokens
            .lock()
            .unwrap()
            .entry(token)
            .or_default()
            .insert(holder, BalanceLookup::Value(raw));
        self
    }

    pub fn with_token_failed(self, token: Address, holder: Address) -> Self {
        self.tokens
            .lock()
            .unwrap()
            .entry(token)
            .or_default()
            .insert(holder, BalanceLookup::Failed);
        self
    }

    pub fn with_reference_point(self, block: u64) -> Self {
        *self.reference_point.lock().unwrap() = block;
        self
    }

    /// Make the next native-balance call fail wholesale.
    pub fn with_native_error(self, error: ChainError) -> Self {
        *self.native_error.lock().unwrap() = Some(error);
        self
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn get_native_balances(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, BalanceLookup>, ChainError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("native:{}", addresses.len()));
        if let Some(err) = self.native_error.lock().unwrap().clone() {
            return Err(err);
        }
        let configured = self.native.lock().unwrap();
        Ok(addresses
            .iter()
            .map(|a| {
                (
                    *a,
                    configured.get(a).copied().unwrap_or(BalanceLookup::Failed),
                )
            })
            .collect())
    }

    async fn get_token_balances(
        &self,
        addresses: &[Address],
        token: Address,
    ) -> Result<HashMap<Address, BalanceLookup>, ChainError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("token:{:#x}:{}", token, addresses.len()));
        let configured = self.tokens.lock().unwrap();
        let holders = configured.get(&token);
        Ok(addresses
            .iter()
            .map(|a| {
                (
                    *a,
                    holders
                        .and_then(|h| h.get(a).copied())
                        .unwrap_or(BalanceLookup::Value(U256::zero())),
                )
            })
            .collect())
    }

    async fn get_reference_point(&self) -> Result<u64, ChainError> {
        Ok(*self.reference_point.lock().unwrap())
    }
}

/// Mock snapshot store with canned responses.
#[derive(Debug, Default)]
pub struct MockSnapshotStore {
    saved: Arc<Mutex<Vec<BalanceSnapshot>>>,
    nearest: Arc<Mutex<HashMap<Address, BalanceSnapshot>>>,
    members: Arc<Mutex<Vec<(Address, U256)>>>,
    density_error: Arc<Mutex<Option<StoreError>>>,
    batch_error: Arc<Mutex<Option<StoreError>>>,
}

impl MockSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the historical record returned for an address.
    pub fn with_nearest(self, snapshot: BalanceSnapshot) -> Self {
        self.nearest
            .lock()
            .unwrap()
            .insert(snapshot.address, snapshot);
        self
    }

    /// Configure the ranked member list returned by `get_members_at`.
    pub fn with_members(self, members: Vec<(Address, U256)>) -> Self {
        *self.members.lock().unwrap() = members;
        self
    }

    pub fn with_density_error(self, error: StoreError) -> Self {
        *self.density_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_batch_error(self, error: StoreError) -> Self {
        *self.batch_error.lock().unwrap() = Some(error);
        self
    }

    pub fn saved_records(&self) -> Vec<BalanceSnapshot> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotStore for MockSnapshotStore {
    async fn save_batch(&self, records: &[BalanceSnapshot]) -> Result<usize, StoreError> {
        self.saved.lock().unwrap().extend_from_slice(records);
        Ok(records.len())
    }

    async fn get_nearest(
        &self,
        address: Address,
        _target: DateTime<Utc>,
        _tolerance: Duration,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        Ok(self.nearest.lock().unwrap().get(&address).cloned())
    }

    async fn get_batch_nearest_at(
        &self,
        addresses: &[Address],
        _target: DateTime<Utc>,
        _tolerance: Duration,
        _max_drift_pct: f64,
        _now: DateTime<Utc>,
    ) -> Result<HashMap<Address, BalanceSnapshot>, StoreError> {
        if let Some(err) = self.batch_error.lock().unwrap().clone() {
            return Err(err);
        }
        let configured = self.nearest.lock().unwrap();
        Ok(addresses
            .iter()
            .filter_map(|a| configured.get(a).map(|s| (*a, s.clone())))
            .collect())
    }

    async fn validate_density_at(
        &self,
        _addresses: &[Address],
        _lookback_hours: i64,
        _min_coverage_pct: f64,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self.density_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get_members_at(
        &self,
        _time: DateTime<Utc>,
        limit: usize,
        _tolerance: Duration,
    ) -> Result<Vec<(Address, U256)>, StoreError> {
        let mut members = self.members.lock().unwrap().clone();
        members.truncate(limit);
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    #[tokio::test]
    async fn test_mock_chain_defaults() {
        let mock = MockChainReader::new().with_native_balance(addr(1), U256::from(100u64));

        let balances = mock.get_native_balances(&[addr(1), addr(2)]).await.unwrap();
        assert_eq!(
            balances[&addr(1)],
            BalanceLookup::Value(U256::from(100u64))
        );
        // Unconfigured native address is a failure, never a zero
        assert_eq!(balances[&addr(2)], BalanceLookup::Failed);

        let token = addr(0xee);
        let tokens = mock.get_token_balances(&[addr(2)], token).await.unwrap();
        assert_eq!(tokens[&addr(2)], BalanceLookup::Value(U256::zero()));

        assert_eq!(mock.recorded_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_store_batch_error_propagates() {
        let mock = MockSnapshotStore::new().with_batch_error(StoreError::StaleData {
            drift_secs: 100,
            allowed_secs: 50,
        });
        let err = mock
            .get_batch_nearest(&[addr(1)], Utc::now(), Duration::hours(2), 10.0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleData { .. }));
    }
}
