//! Account Set Provider
//!
//! Resolves the current top-N whale set from the configured candidate
//! universe: batch native lookup, drop exclusions and failed lookups, apply
//! the minimum threshold, rank deterministically.

use ethers::types::{Address, U256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::ports::chain::{ChainError, ChainReader};

pub struct AccountSetProvider {
    chain: Arc<dyn ChainReader>,
    candidates: Vec<Address>,
    exclusions: HashSet<Address>,
}

impl AccountSetProvider {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        candidates: Vec<Address>,
        exclusions: HashSet<Address>,
    ) -> Self {
        Self {
            chain,
            candidates,
            exclusions,
        }
    }

    pub fn is_excluded(&self, address: &Address) -> bool {
        self.exclusions.contains(address)
    }

    /// Ordered top-`limit` candidates by native balance.
    ///
    /// Failed lookups are dropped, never counted as zero. Ties are broken by
    /// address order so repeated runs over identical balances rank
    /// identically.
    pub async fn get_top(
        &self,
        limit: usize,
        min_balance: U256,
    ) -> Result<Vec<(Address, U256)>, ChainError> {
        let eligible: Vec<Address> = self
            .candidates
            .iter()
            .filter(|a| !self.exclusions.contains(a))
            .copied()
            .collect();
        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        let balances = self.chain.get_native_balances(&eligible).await?;

        let mut failed = 0usize;
        let mut ranked: Vec<(Address, U256)> = Vec::with_capacity(eligible.len());
        for address in &eligible {
            match balances.get(address).and_then(|l| l.value()) {
                Some(balance) if balance >= min_balance => ranked.push((*address, balance)),
                Some(_) => {}
                None => failed += 1,
            }
        }
        if failed > 0 {
            debug!(failed, "candidate lookups failed, dropped from top set");
        }

        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked)
    }
}
