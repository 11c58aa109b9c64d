//! Append-only JSON Lines snapshot store.
//!
//! One serialized [`BalanceSnapshot`] per line. The full time index is kept
//! in memory (per-address BTreeMap keyed by snapshot time) and rebuilt from
//! the file on open. Batch writes serialize every record before the single
//! append, and a short append is truncated back to the pre-batch length, so
//! a failed batch leaves neither file nor index partially updated.

use chrono::{DateTime, Duration, Utc};
use ethers::types::{Address, U256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::types::BalanceSnapshot;
use crate::ports::store::{SnapshotStore, StoreError};

use async_trait::async_trait;

#[derive(Debug, Default)]
struct Index {
    by_address: HashMap<Address, BTreeMap<i64, BalanceSnapshot>>,
    record_count: usize,
}

impl Index {
    fn insert(&mut self, snapshot: BalanceSnapshot) {
        let ts = snapshot.snapshot_time.timestamp();
        self.by_address
            .entry(snapshot.address)
            .or_default()
            .insert(ts, snapshot);
        self.record_count += 1;
    }

    /// Closest record to `target_ts` within `tolerance_secs`, resolving
    /// multiple records per address by recency to the target.
    fn nearest(
        &self,
        address: &Address,
        target_ts: i64,
        tolerance_secs: i64,
    ) -> Option<&BalanceSnapshot> {
        let records = self.by_address.get(address)?;
        let before = records.range(..=target_ts).next_back();
        let after = records.range(target_ts + 1..).next();

        let best = match (before, after) {
            (Some((bt, b)), Some((at, a))) => {
                if (target_ts - bt) <= (at - target_ts) {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some((_, b)), None) => Some(b),
            (None, Some((_, a))) => Some(a),
            (None, None) => None,
        }?;

        let drift = (best.snapshot_time.timestamp() - target_ts).abs();
        if drift <= tolerance_secs {
            Some(best)
        } else {
            None
        }
    }
}

/// File-backed snapshot store; `in_memory` mode backs the test suites.
pub struct JsonlSnapshotStore {
    path: Option<PathBuf>,
    index: RwLock<Index>,
}

impl JsonlSnapshotStore {
    /// Open (or start) a store at `path`, rebuilding the index from any
    /// existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut index = Index::default();

        if path.exists() {
            let content =
                fs::read_to_string(&path).map_err(|e| StoreError::Io(e.to_string()))?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let snapshot: BalanceSnapshot = serde_json::from_str(line)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                index.insert(snapshot);
            }
            info!(
                records = index.record_count,
                path = %path.display(),
                "snapshot store index rebuilt"
            );
        }

        Ok(Self {
            path: Some(path),
            index: RwLock::new(index),
        })
    }

    /// Store with no backing file. Records live only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            index: RwLock::new(Index::default()),
        }
    }

    pub async fn record_count(&self) -> usize {
        self.index.read().await.record_count
    }
}

#[async_trait]
impl SnapshotStore for JsonlSnapshotStore {
    async fn save_batch(&self, records: &[BalanceSnapshot]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        // Serialize the whole batch before touching file or index.
        let mut buf = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            let committed_len = file
                .metadata()
                .map_err(|e| StoreError::Io(e.to_string()))?
                .len();
            if let Err(e) = file.write_all(buf.as_bytes()) {
                // A short write (disk full, interrupted) can land a prefix of
                // the batch on disk. Roll the file back so a rebuilt index
                // never contains records the caller was told failed to save.
                let _ = file.set_len(committed_len);
                return Err(StoreError::Io(e.to_string()));
            }
        }

        let mut index = self.index.write().await;
        for record in records {
            index.insert(record.clone());
        }
        debug!(count = records.len(), "snapshot batch appended");
        Ok(records.len())
    }

    async fn get_nearest(
        &self,
        address: Address,
        target: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        let index = self.index.read().await;
        Ok(index
            .nearest(&address, target.timestamp(), tolerance.num_seconds())
            .cloned())
    }

    async fn get_batch_nearest_at(
        &self,
        addresses: &[Address],
        target: DateTime<Utc>,
        tolerance: Duration,
        max_drift_pct: f64,
        now: DateTime<Utc>,
    ) -> Result<HashMap<Address, BalanceSnapshot>, StoreError> {
        let index = self.index.read().await;
        let target_ts = target.timestamp();
        let tolerance_secs = tolerance.num_seconds();

        let mut found = HashMap::new();
        let mut worst_drift: i64 = 0;
        for address in addresses {
            if let Some(snapshot) = index.nearest(address, target_ts, tolerance_secs) {
                let drift = (snapshot.snapshot_time.timestamp() - target_ts).abs();
                worst_drift = worst_drift.max(drift);
                found.insert(*address, snapshot.clone());
            }
        }

        let elapsed_secs = (now - target).num_seconds();
        if !found.is_empty() && elapsed_secs > 0 {
            let allowed_secs = elapsed_secs as f64 * max_drift_pct / 100.0;
            // Drift exactly at the threshold also fails.
            if worst_drift as f64 >= allowed_secs {
                return Err(StoreError::StaleData {
                    drift_secs: worst_drift,
                    allowed_secs: allowed_secs as i64,
                });
            }
        }

        Ok(found)
    }

    async fn validate_density_at(
        &self,
        addresses: &[Address],
        lookback_hours: i64,
        min_coverage_pct: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let expected = addresses.len() * lookback_hours.max(0) as usize;
        if expected == 0 {
            return Ok(());
        }

        let window_start = (now - Duration::hours(lookback_hours)).timestamp();
        let window_end = now.timestamp();

        let index = self.index.read().await;
        let found: usize = addresses
            .iter()
            .filter_map(|a| index.by_address.get(a))
            .map(|records| records.range(window_start..=window_end).count())
            .sum();

        let coverage_pct = found as f64 * 100.0 / expected as f64;
        // Coverage exactly at the threshold also fails.
        if coverage_pct > min_coverage_pct {
            Ok(())
        } else {
            Err(StoreError::InsufficientCoverage {
                found,
                expected,
                coverage_pct,
                required_pct: min_coverage_pct,
            })
        }
    }

    async fn get_members_at(
        &self,
        time: DateTime<Utc>,
        limit: usize,
        tolerance: Duration,
    ) -> Result<Vec<(Address, U256)>, StoreError> {
        let index = self.index.read().await;
        let target_ts = time.timestamp();
        let tolerance_secs = tolerance.num_seconds();

        let mut members: Vec<(Address, U256)> = index
            .by_address
            .keys()
            .filter_map(|address| {
                index
                    .nearest(address, target_ts, tolerance_secs)
                    .map(|s| (*address, s.raw))
            })
            .collect();

        members.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        members.truncate(limit);
        Ok(members)
    }
}
