//! Accumulation Engine
//!
//! Composes the chain reader, snapshot store and account set provider into
//! one pipeline run producing an immutable [`AccumulationMetric`].
//!
//! The union of current and historical top sets (not the intersection)
//! corrects survival bias: an address that fell out of the top-N still
//! counts as a distributor. Stale or sparse history aborts the run before
//! any score is computed; per-address lookup failures degrade the run by
//! exclusion instead.

use chrono::{Duration, Utc};
use ethers::types::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::provider::AccountSetProvider;
use crate::domain::stats::{gini, mad, median, pct_score, raw_to_native};
use crate::domain::tags::{evaluate_tags, TagContext};
use crate::domain::types::{is_migration, AccumulationMetric, WealthBreakdown};
use crate::ports::chain::{ChainError, ChainReader};
use crate::ports::store::{SnapshotStore, StoreError};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Thresholds and identifiers for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub network: String,
    pub top_n: usize,
    pub lookback_hours: i64,
    /// Candidates below this native balance (in wei) never rank.
    pub min_whale_balance: ethers::types::U256,
    /// How far a historical snapshot may sit from the lookback target.
    pub snapshot_tolerance: Duration,
    pub max_drift_pct: f64,
    pub min_coverage_pct: f64,
    /// Interpretive tagging requires at least this fraction of the union to
    /// have valid current lookups.
    pub min_signal_fraction: Decimal,
    /// Fraction of the union that must have any historical record at all.
    pub min_history_fraction: Decimal,
    pub organic_accumulation_pct: Decimal,
    pub gini_concentrated: Decimal,
    pub depeg_rate: Decimal,
    /// Net-change tolerance for migration classification, native units.
    pub migration_tolerance: Decimal,
    /// Wrapped + staked holdings above this (native units) count as looping.
    pub looping_balance_threshold: Decimal,
    pub looping_fraction: Decimal,
    pub mad_multiplier: Decimal,
    pub native_decimals: u32,
    pub wrapped_token: Address,
    pub staked_token: Address,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            top_n: 100,
            lookback_hours: 24,
            min_whale_balance: ethers::types::U256::zero(),
            snapshot_tolerance: Duration::hours(2),
            max_drift_pct: 25.0,
            min_coverage_pct: 85.0,
            min_signal_fraction: dec!(0.70),
            min_history_fraction: dec!(0.50),
            organic_accumulation_pct: dec!(25),
            gini_concentrated: dec!(0.85),
            depeg_rate: dec!(0.98),
            migration_tolerance: dec!(0.01),
            looping_balance_threshold: dec!(100),
            looping_fraction: dec!(0.30),
            mad_multiplier: dec!(3),
            native_decimals: 18,
            wrapped_token: Address::zero(),
            staked_token: Address::zero(),
        }
    }
}

/// Externally supplied oracle inputs for one run. This core never fetches
/// rates or price trends itself.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Staked-derivative to native exchange rate.
    pub exchange_rate: Decimal,
    /// Price change over the lookback window, percent.
    pub price_trend_pct: Option<Decimal>,
}

/// One valid per-address observation pair.
struct Signal {
    address: Address,
    current: WealthBreakdown,
    historical: WealthBreakdown,
}

pub struct AccumulationEngine {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn SnapshotStore>,
    provider: AccountSetProvider,
    config: EngineConfig,
}

impl AccumulationEngine {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn SnapshotStore>,
        provider: AccountSetProvider,
        config: EngineConfig,
    ) -> Self {
        Self {
            chain,
            store,
            provider,
            config,
        }
    }

    /// Run the full pipeline once.
    pub async fn run(&self, params: &RunParams) -> Result<AccumulationMetric, AnalysisError> {
        let cfg = &self.config;
        if cfg.lookback_hours <= 0 {
            return Err(AnalysisError::InvalidInput(
                "lookback hours must be positive".to_string(),
            ));
        }
        if params.exchange_rate <= Decimal::ZERO {
            return Err(AnalysisError::InvalidInput(
                "exchange rate must be positive".to_string(),
            ));
        }
        let rate = params.exchange_rate;
        let now = Utc::now();
        let hist_time = now - Duration::hours(cfg.lookback_hours);

        // Step 1: union of current and historical top sets.
        let current_top = self
            .provider
            .get_top(cfg.top_n, cfg.min_whale_balance)
            .await?;
        let historical_top = self
            .store
            .get_members_at(hist_time, cfg.top_n, cfg.snapshot_tolerance)
            .await?;

        let mut union: BTreeSet<Address> = current_top.iter().map(|(a, _)| *a).collect();
        union.extend(historical_top.iter().map(|(a, _)| *a));
        union.retain(|a| !self.provider.is_excluded(a));
        if union.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "empty candidate union, nothing to analyze".to_string(),
            ));
        }
        let union: Vec<Address> = union.into_iter().collect();
        let whale_count = union.len();
        info!(
            whale_count,
            current = current_top.len(),
            historical = historical_top.len(),
            "analyzing union of top sets"
        );

        // Step 2: current balances, then historical state with its gates.
        let current_block = self.chain.get_reference_point().await?;
        let native = self.chain.get_native_balances(&union).await?;
        let wrapped = self
            .chain
            .get_token_balances(&union, cfg.wrapped_token)
            .await?;
        let staked = self
            .chain
            .get_token_balances(&union, cfg.staked_token)
            .await?;

        self.store
            .validate_density(&union, cfg.lookback_hours, cfg.min_coverage_pct)
            .await?;
        let history = self
            .store
            .get_batch_nearest(&union, hist_time, cfg.snapshot_tolerance, cfg.max_drift_pct)
            .await?;

        let history_fraction =
            Decimal::from(history.len() as u64) / Decimal::from(whale_count as u64);
        let history_coverage_failed = history_fraction < cfg.min_history_fraction;
        let historical_block = history.values().map(|s| s.as_of_block).max().unwrap_or(0);

        // Steps 3 and 6: valid signals, failed lookups excluded.
        // Historical wrapped/staked default to current values; the metric
        // carries the caveat flag for this approximation.
        let mut signals: Vec<Signal> = Vec::with_capacity(whale_count);
        for address in &union {
            let current = match (
                native.get(address).and_then(|l| l.value()),
                wrapped.get(address).and_then(|l| l.value()),
                staked.get(address).and_then(|l| l.value()),
            ) {
                (Some(n), Some(w), Some(s)) => {
                    match (
                        raw_to_native(n, cfg.native_decimals),
                        raw_to_native(w, cfg.native_decimals),
                        raw_to_native(s, cfg.native_decimals),
                    ) {
                        (Some(n), Some(w), Some(s)) => WealthBreakdown::new(n, w, s),
                        _ => {
                            warn!(address = ?address, "balance exceeds representable range, excluding");
                            continue;
                        }
                    }
                }
                _ => {
                    debug!(address = ?address, "current lookup failed, excluding from signals");
                    continue;
                }
            };

            let hist_native = history
                .get(address)
                .and_then(|s| raw_to_native(s.raw, cfg.native_decimals))
                .unwrap_or(Decimal::ZERO);
            let historical =
                WealthBreakdown::new(hist_native, current.wrapped, current.staked);

            signals.push(Signal {
                address: *address,
                current,
                historical,
            });
        }
        let signals_used = signals.len();
        let signals_excluded = whale_count - signals_used;
        let signal_fraction =
            Decimal::from(signals_used as u64) / Decimal::from(whale_count as u64);

        // Steps 4 and 5: zero-guarded scores over valid signals.
        let current_native_total: Decimal = signals.iter().map(|s| s.current.native).sum();
        let historical_native_total: Decimal =
            signals.iter().map(|s| s.historical.native).sum();
        let current_aggregated_total: Decimal =
            signals.iter().map(|s| s.current.total(rate)).sum();
        let historical_aggregated_total: Decimal =
            signals.iter().map(|s| s.historical.total(rate)).sum();

        let native_score = pct_score(current_native_total, historical_native_total);
        let aggregated_score = pct_score(current_aggregated_total, historical_aggregated_total);

        // Step 7: robust outlier detection over per-address percent changes.
        let changes: Vec<(Address, Decimal)> = signals
            .iter()
            .filter_map(|s| {
                let hist = s.historical.total(rate);
                if hist > Decimal::ZERO {
                    Some((s.address, pct_score(s.current.total(rate), hist)))
                } else {
                    None
                }
            })
            .collect();
        let change_values: Vec<Decimal> = changes.iter().map(|(_, c)| *c).collect();
        let change_median = median(&change_values).unwrap_or(Decimal::ZERO);
        let change_mad = mad(&change_values).unwrap_or(Decimal::ZERO);
        let mad_threshold = cfg.mad_multiplier * change_mad;

        let (anomaly_detected, anomaly_driver) = if change_mad > Decimal::ZERO {
            let driver = changes
                .iter()
                .filter(|(_, c)| (*c - change_median).abs() > mad_threshold)
                .max_by_key(|(_, c)| (*c - change_median).abs());
            (driver.is_some(), driver.map(|(a, _)| *a))
        } else {
            (false, None)
        };

        // Step 8: Gini over current aggregated wealth, valid signals only.
        // Balances are already rescaled to native units by this point.
        let current_wealth: Vec<Decimal> =
            signals.iter().map(|s| s.current.total(rate)).collect();
        let gini_value = gini(&current_wealth);

        // Step 9: migration detection across all three balance forms. The
        // store only holds native history, so the baseline assumes zero
        // derivative holdings at the historical point: a native drop fully
        // absorbed by current wrapped/staked positions nets to zero. A whale
        // that sold native while holding an old, unchanged derivative
        // position reads as migrated too; that is the gap the
        // `derivative_history_approximated` flag discloses.
        let migrated: Vec<bool> = signals
            .iter()
            .map(|s| {
                let baseline =
                    WealthBreakdown::new(s.historical.native, Decimal::ZERO, Decimal::ZERO);
                is_migration(&s.current, &baseline, rate, cfg.migration_tolerance)
            })
            .collect();
        let migration_count = migrated.iter().filter(|m| **m).count();

        // Step 10: looping heuristic.
        let looping_count = signals
            .iter()
            .filter(|s| s.current.wrapped + s.current.staked * rate > cfg.looping_balance_threshold)
            .count();
        let looping_flagged = Decimal::from(looping_count as u64)
            / Decimal::from(whale_count as u64)
            > cfg.looping_fraction;

        // Migrated wallets are neither accumulators nor distributors.
        let (accumulators, _distributors, _neutral) = classify_changes(
            signals
                .iter()
                .zip(&migrated)
                .filter(|(_, m)| !**m)
                .map(|(s, _)| s.current.total(rate) - s.historical.total(rate)),
        );
        let accumulator_pct = if signals_used > 0 {
            Decimal::from(accumulators as u64) / Decimal::from(signals_used as u64)
                * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        // Dominance shares the zero-derivative baseline: without derivative
        // history, every current staked position counts toward the measured
        // change, so a score carried mostly by staked holdings reads as
        // technical churn rather than conviction.
        let staked_component: Decimal =
            signals.iter().map(|s| s.current.staked * rate).sum();
        let baseline_delta = current_aggregated_total - historical_native_total;
        let staked_dominates = baseline_delta != Decimal::ZERO
            && staked_component.abs() / baseline_delta.abs() > dec!(0.5);

        // Step 11: ordered rule table with short-circuit and revocation.
        let ctx = TagContext {
            history_coverage_failed,
            signal_fraction,
            min_signal_fraction: cfg.min_signal_fraction,
            signals_used,
            accumulator_pct,
            gini: gini_value,
            aggregated_score,
            price_trend_pct: params.price_trend_pct,
            migration_count,
            mad_threshold,
            staked_dominates,
            exchange_rate: rate,
            anomaly_detected,
            looping_flagged,
            organic_accumulation_pct: cfg.organic_accumulation_pct,
            gini_concentrated: cfg.gini_concentrated,
            depeg_rate: cfg.depeg_rate,
        };
        let tags = evaluate_tags(&ctx);

        let derivative_history_approximated = signals
            .iter()
            .any(|s| s.current.wrapped > Decimal::ZERO || s.current.staked > Decimal::ZERO);

        let metric = AccumulationMetric {
            network: cfg.network.clone(),
            whale_count,
            current_native_total,
            historical_native_total,
            current_aggregated_total,
            historical_aggregated_total,
            native_score,
            aggregated_score,
            gini: gini_value,
            anomaly_detected,
            anomaly_driver,
            mad_threshold,
            signals_used,
            signals_excluded,
            migration_count,
            looping_count,
            exchange_rate: rate,
            tags,
            lookback_hours: cfg.lookback_hours,
            current_block,
            historical_block,
            derivative_history_approximated,
            created_at: now,
        };
        info!(
            native_score = %metric.native_score.round_dp(4),
            aggregated_score = %metric.aggregated_score.round_dp(4),
            signals_used,
            signals_excluded,
            "accumulation run complete"
        );
        Ok(metric)
    }
}

/// Count net accumulators, distributors and neutral wallets from per-address
/// aggregated wealth deltas.
fn classify_changes(deltas: impl Iterator<Item = Decimal>) -> (usize, usize, usize) {
    let mut accumulators = 0;
    let mut distributors = 0;
    let mut neutral = 0;
    for delta in deltas {
        if delta > Decimal::ZERO {
            accumulators += 1;
        } else if delta < Decimal::ZERO {
            distributors += 1;
        } else {
            neutral += 1;
        }
    }
    (accumulators, distributors, neutral)
}

/// Deterministic text summary built only from metric fields.
pub fn summary(metric: &AccumulationMetric) -> String {
    let tags = if metric.tags.is_empty() {
        "none".to_string()
    } else {
        metric
            .tags
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let anomaly = match metric.anomaly_driver {
        Some(driver) => format!("yes, driver {:#x}", driver),
        None => "no".to_string(),
    };
    let mut lines = vec![
        format!(
            "Whale accumulation report [{}] lookback {}h",
            metric.network, metric.lookback_hours
        ),
        format!(
            "whales: {} (signals used {}, excluded {})",
            metric.whale_count, metric.signals_used, metric.signals_excluded
        ),
        format!(
            "native score: {}% | aggregated score: {}%",
            metric.native_score.round_dp(4),
            metric.aggregated_score.round_dp(4)
        ),
        format!(
            "native total: {} -> {} | aggregated: {} -> {}",
            metric.historical_native_total.round_dp(4),
            metric.current_native_total.round_dp(4),
            metric.historical_aggregated_total.round_dp(4),
            metric.current_aggregated_total.round_dp(4)
        ),
        format!(
            "gini: {} | migrations: {} | looping wallets: {}",
            metric.gini.round_dp(4),
            metric.migration_count,
            metric.looping_count
        ),
        format!(
            "anomaly: {} | exchange rate: {} | blocks {} -> {}",
            anomaly,
            metric.exchange_rate,
            metric.historical_block,
            metric.current_block
        ),
        format!("tags: {}", tags),
    ];
    if metric.derivative_history_approximated {
        lines.push(
            "caveat: historical wrapped/staked balances approximated by current values"
                .to_string(),
        );
    }
    lines.join("\n")
}
