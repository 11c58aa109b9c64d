//! Core data model for the accumulation tracker.
//!
//! Balance records are immutable once constructed. Raw balances stay in the
//! chain's smallest unit (`U256`) until the statistics layer rescales them to
//! native units as `Decimal`.

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point-in-time balance of one address, as observed on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    pub address: Address,
    /// Balance in the smallest unit (wei for the native asset).
    pub raw: U256,
    pub as_of_block: u64,
    pub network: String,
}

/// A persisted balance record. Keyed by (address, network, snapshot_time);
/// multiple records per address are resolved at read time by recency to the
/// requested target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub address: Address,
    pub network: String,
    /// Persisted as a decimal string so the store schema never loses precision.
    #[serde(with = "raw_as_text")]
    pub raw: U256,
    pub as_of_block: u64,
    pub snapshot_time: DateTime<Utc>,
    pub ingestion_time: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn from_balance(
        balance: &AccountBalance,
        snapshot_time: DateTime<Utc>,
        ingestion_time: DateTime<Utc>,
    ) -> Self {
        Self {
            address: balance.address,
            network: balance.network.clone(),
            raw: balance.raw,
            as_of_block: balance.as_of_block,
            snapshot_time,
            ingestion_time,
        }
    }
}

/// Outcome of a single per-address balance lookup.
///
/// A failed lookup is a distinct variant, never a zero. Conflating the two
/// would make an RPC outage look like mass selling, so downstream code can
/// only get at the number by acknowledging the failure case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceLookup {
    /// Verified on-chain value; zero is a legitimate value here.
    Value(U256),
    /// The lookup did not produce a trustworthy value.
    Failed,
}

impl BalanceLookup {
    pub fn value(&self) -> Option<U256> {
        match self {
            BalanceLookup::Value(v) => Some(*v),
            BalanceLookup::Failed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BalanceLookup::Failed)
    }
}

/// One address's wealth split across the three tracked assets, in native
/// units. Staked derivative amounts are still denominated in the derivative
/// token; conversion happens via the exchange rate at aggregation time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WealthBreakdown {
    pub native: Decimal,
    pub wrapped: Decimal,
    pub staked: Decimal,
}

impl WealthBreakdown {
    pub fn new(native: Decimal, wrapped: Decimal, staked: Decimal) -> Self {
        Self { native, wrapped, staked }
    }

    /// Aggregated wealth: native + wrapped + staked converted at `rate`.
    pub fn total(&self, rate: Decimal) -> Decimal {
        self.native + self.wrapped + self.staked * rate
    }
}

/// Detects a balance migration between the three asset forms.
///
/// Fires when the net change (staked converted at the current rate) is within
/// `tolerance` of zero while at least one component individually moved by more
/// than the tolerance. Covers any pairwise shuffle, including wrapped<->staked
/// on a wallet that never held native balance.
pub fn is_migration(
    current: &WealthBreakdown,
    historical: &WealthBreakdown,
    rate: Decimal,
    tolerance: Decimal,
) -> bool {
    let d_native = current.native - historical.native;
    let d_wrapped = current.wrapped - historical.wrapped;
    let d_staked = (current.staked - historical.staked) * rate;

    let net = d_native + d_wrapped + d_staked;
    let any_component_moved = d_native.abs() > tolerance
        || d_wrapped.abs() > tolerance
        || d_staked.abs() > tolerance;

    net.abs() <= tolerance && any_component_moved
}

/// Interpretation tags attached to a metric.
///
/// The two data-quality tags are terminal: a metric carrying one of them
/// never carries any interpretive tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricTag {
    #[serde(rename = "Incomplete Data")]
    IncompleteData,
    #[serde(rename = "Insufficient Data")]
    InsufficientData,
    #[serde(rename = "Organic Accumulation")]
    OrganicAccumulation,
    #[serde(rename = "Concentrated Signal")]
    ConcentratedSignal,
    #[serde(rename = "Bullish Divergence")]
    BullishDivergence,
    #[serde(rename = "LST Migration")]
    LstMigration,
    #[serde(rename = "High Conviction")]
    HighConviction,
    #[serde(rename = "Depeg Risk")]
    DepegRisk,
    #[serde(rename = "Anomaly Alert")]
    AnomalyAlert,
    #[serde(rename = "Technical Activity")]
    TechnicalActivity,
}

impl MetricTag {
    pub fn is_data_quality(&self) -> bool {
        matches!(self, MetricTag::IncompleteData | MetricTag::InsufficientData)
    }
}

impl std::fmt::Display for MetricTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricTag::IncompleteData => "Incomplete Data",
            MetricTag::InsufficientData => "Insufficient Data",
            MetricTag::OrganicAccumulation => "Organic Accumulation",
            MetricTag::ConcentratedSignal => "Concentrated Signal",
            MetricTag::BullishDivergence => "Bullish Divergence",
            MetricTag::LstMigration => "LST Migration",
            MetricTag::HighConviction => "High Conviction",
            MetricTag::DepegRisk => "Depeg Risk",
            MetricTag::AnomalyAlert => "Anomaly Alert",
            MetricTag::TechnicalActivity => "Technical Activity",
        };
        write!(f, "{}", s)
    }
}

/// The computed artifact of one engine run. Created once, never mutated.
///
/// Invariant: `signals_used + signals_excluded == whale_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccumulationMetric {
    pub network: String,
    /// Size of the current/historical top-set union.
    pub whale_count: usize,
    /// Totals in native units over valid signals only.
    pub current_native_total: Decimal,
    pub historical_native_total: Decimal,
    pub current_aggregated_total: Decimal,
    pub historical_aggregated_total: Decimal,
    /// Percent change of native totals, zero-guarded.
    pub native_score: Decimal,
    /// Percent change of aggregated totals, zero-guarded.
    pub aggregated_score: Decimal,
    /// Gini coefficient over current aggregated wealth, in [0, 1].
    pub gini: Decimal,
    pub anomaly_detected: bool,
    /// Address driving the largest outlier deviation, if any.
    pub anomaly_driver: Option<Address>,
    /// The outlier cutoff actually used (multiplier x MAD of percent changes).
    pub mad_threshold: Decimal,
    pub signals_used: usize,
    pub signals_excluded: usize,
    pub migration_count: usize,
    pub looping_count: usize,
    pub exchange_rate: Decimal,
    pub tags: Vec<MetricTag>,
    pub lookback_hours: i64,
    pub current_block: u64,
    /// Highest as-of block among matched historical snapshots; 0 when the
    /// union had no history.
    pub historical_block: u64,
    /// Historical wrapped/staked balances were assumed equal to current
    /// values. Accuracy gap whenever those positions actually changed.
    pub derivative_history_approximated: bool,
    pub created_at: DateTime<Utc>,
}

mod raw_as_text {
    use ethers::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let s = String::deserialize(d)?;
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}
