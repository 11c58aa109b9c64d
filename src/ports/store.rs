use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ethers::types::{Address, U256};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::types::BalanceSnapshot;

/// Snapshot store error type
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// The nearest matches drifted too far from the requested target. Fatal
    /// to the calling run: approximating it away would silently stretch the
    /// lookback window and invalidate every percentage threshold downstream.
    #[error("stale snapshot data: worst drift {drift_secs}s, allowed {allowed_secs}s")]
    StaleData { drift_secs: i64, allowed_secs: i64 },

    /// The time series has too many gaps over the lookback window. Fatal to
    /// the calling run.
    #[error(
        "insufficient snapshot coverage: {found}/{expected} records ({coverage_pct:.1}%), need > {required_pct:.1}%"
    )]
    InsufficientCoverage {
        found: usize,
        expected: usize,
        coverage_pct: f64,
        required_pct: f64,
    },

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("snapshot serialization error: {0}")]
    Serialization(String),
}

/// Persistence for point-in-time balance records.
///
/// Append-only; records are written by a periodic ingestion job and read many
/// times. The ingestion cadence is one snapshot per address per hour, which
/// `validate_density` checks against.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a batch of records, all-or-nothing. Returns the count written.
    async fn save_batch(&self, records: &[BalanceSnapshot]) -> Result<usize, StoreError>;

    /// Record for `address` nearest to `target`, or `None` when nothing
    /// falls within `tolerance`.
    async fn get_nearest(
        &self,
        address: Address,
        target: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Option<BalanceSnapshot>, StoreError>;

    /// Nearest records for a batch of addresses. Fails the entire batch with
    /// [`StoreError::StaleData`] when the worst found drift reaches
    /// `max_drift_pct` of the elapsed time between now and `target`
    /// (inclusive boundary). Addresses with no record within `tolerance` are
    /// simply absent from the map.
    async fn get_batch_nearest(
        &self,
        addresses: &[Address],
        target: DateTime<Utc>,
        tolerance: Duration,
        max_drift_pct: f64,
    ) -> Result<HashMap<Address, BalanceSnapshot>, StoreError> {
        self.get_batch_nearest_at(addresses, target, tolerance, max_drift_pct, Utc::now())
            .await
    }

    /// [`SnapshotStore::get_batch_nearest`] with an explicit clock, so the
    /// inclusive drift boundary is exactly testable.
    async fn get_batch_nearest_at(
        &self,
        addresses: &[Address],
        target: DateTime<Utc>,
        tolerance: Duration,
        max_drift_pct: f64,
        now: DateTime<Utc>,
    ) -> Result<HashMap<Address, BalanceSnapshot>, StoreError>;

    /// Compare found snapshot count over the lookback window against the
    /// expected count (addresses x lookback_hours). Passes only when
    /// coverage is strictly greater than `min_coverage_pct`.
    async fn validate_density(
        &self,
        addresses: &[Address],
        lookback_hours: i64,
        min_coverage_pct: f64,
    ) -> Result<(), StoreError> {
        self.validate_density_at(addresses, lookback_hours, min_coverage_pct, Utc::now())
            .await
    }

    /// [`SnapshotStore::validate_density`] with an explicit clock.
    async fn validate_density_at(
        &self,
        addresses: &[Address],
        lookback_hours: i64,
        min_coverage_pct: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Top-`limit` addresses by recorded balance near `time`, descending,
    /// ties broken by address order.
    async fn get_members_at(
        &self,
        time: DateTime<Utc>,
        limit: usize,
        tolerance: Duration,
    ) -> Result<Vec<(Address, U256)>, StoreError>;
}
