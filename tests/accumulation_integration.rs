//! Accumulation Pipeline Integration Tests
//!
//! Integration tests that verify the tracker components work together:
//! 1. JSONL snapshot store -> AccumulationEngine history flow
//! 2. AccountSetProvider -> engine union construction
//! 3. End-to-end tagging over realistic balance movements
//!
//! All tests are deterministic (no real network calls); the chain side is a
//! configured mock, the store side is the real JSONL adapter.

use chrono::{Duration, Utc};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;

use whalewatch::adapters::store::JsonlSnapshotStore;
use whalewatch::application::{
    AccountSetProvider, AccumulationEngine, AnalysisError, EngineConfig, RunParams,
};
use whalewatch::domain::{BalanceSnapshot, MetricTag};
use whalewatch::ports::mocks::MockChainReader;
use whalewatch::ports::store::{SnapshotStore, StoreError};

// ============================================================================
// Test Fixtures
// ============================================================================

fn addr(b: u8) -> Address {
    Address::repeat_byte(b)
}

/// Whole native units to wei.
fn eth(whole: u64) -> U256 {
    U256::exp10(18) * U256::from(whole)
}

/// Seed hourly snapshots over the last `hours` for each (address, balance)
/// pair, so density validation sees full coverage.
async fn seed_hourly_history(
    store: &JsonlSnapshotStore,
    balances: &[(Address, U256)],
    hours: i64,
) {
    let now = Utc::now();
    let mut records = Vec::new();
    for i in 0..hours {
        let snapshot_time = now - Duration::hours(i) - Duration::minutes(5);
        for (address, raw) in balances {
            records.push(BalanceSnapshot {
                address: *address,
                network: "mainnet".to_string(),
                raw: *raw,
                as_of_block: 18_000_000 + (hours - i) as u64,
                snapshot_time,
                ingestion_time: snapshot_time,
            });
        }
    }
    store.save_batch(&records).await.unwrap();
}

fn engine_with(
    chain: MockChainReader,
    store: JsonlSnapshotStore,
    candidates: Vec<Address>,
) -> AccumulationEngine {
    engine_with_config(chain, store, candidates, EngineConfig::default())
}

fn engine_with_config(
    chain: MockChainReader,
    store: JsonlSnapshotStore,
    candidates: Vec<Address>,
    config: EngineConfig,
) -> AccumulationEngine {
    let chain = Arc::new(chain);
    let provider = AccountSetProvider::new(chain.clone(), candidates, HashSet::new());
    AccumulationEngine::new(chain, Arc::new(store), provider, config)
}

/// Engine config with distinct wrapped/staked token contracts, so the mock
/// serves separate balance maps for the two lookups.
fn tokens_config() -> EngineConfig {
    EngineConfig {
        wrapped_token: addr(0xaa),
        staked_token: addr(0xbb),
        ..EngineConfig::default()
    }
}

fn params(rate: Decimal) -> RunParams {
    RunParams {
        exchange_rate: rate,
        price_trend_pct: None,
    }
}

// ============================================================================
// Store -> Engine Flow
// ============================================================================

#[tokio::test]
async fn test_accumulation_scored_from_stored_history() {
    let store = JsonlSnapshotStore::in_memory();
    let whales = [
        (addr(1), eth(100)),
        (addr(2), eth(100)),
        (addr(3), eth(100)),
    ];
    seed_hourly_history(&store, &whales, 24).await;

    // Everyone added 10% over the window.
    let chain = MockChainReader::new()
        .with_native_balance(addr(1), eth(110))
        .with_native_balance(addr(2), eth(110))
        .with_native_balance(addr(3), eth(110))
        .with_reference_point(19_000_000);

    let engine = engine_with(chain, store, vec![addr(1), addr(2), addr(3)]);
    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();

    assert_eq!(metric.whale_count, 3);
    assert_eq!(metric.signals_used, 3);
    assert_eq!(metric.signals_excluded, 0);
    assert_eq!(metric.native_score, dec!(10));
    assert_eq!(metric.aggregated_score, dec!(10));
    // All three accumulated, well past the organic threshold.
    assert!(metric.tags.contains(&MetricTag::OrganicAccumulation));
    assert!(metric.tags.iter().all(|t| !t.is_data_quality()));
    assert_eq!(
        metric.signals_used + metric.signals_excluded,
        metric.whale_count
    );
}

#[tokio::test]
async fn test_balanced_shuffle_scores_zero_end_to_end() {
    let store = JsonlSnapshotStore::in_memory();
    let whales = [
        (addr(1), eth(100)),
        (addr(2), eth(100)),
        (addr(3), eth(100)),
    ];
    seed_hourly_history(&store, &whales, 24).await;

    // One gained exactly what another lost.
    let chain = MockChainReader::new()
        .with_native_balance(addr(1), eth(110))
        .with_native_balance(addr(2), eth(100))
        .with_native_balance(addr(3), eth(90))
        .with_reference_point(19_000_000);

    let engine = engine_with(chain, store, vec![addr(1), addr(2), addr(3)]);
    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();

    assert_eq!(metric.native_score, Decimal::ZERO);
    assert_eq!(metric.aggregated_score, Decimal::ZERO);
}

#[tokio::test]
async fn test_distribution_scores_negative() {
    let store = JsonlSnapshotStore::in_memory();
    let whales = [(addr(1), eth(200)), (addr(2), eth(200))];
    seed_hourly_history(&store, &whales, 24).await;

    let chain = MockChainReader::new()
        .with_native_balance(addr(1), eth(100))
        .with_native_balance(addr(2), eth(200))
        .with_reference_point(19_000_000);

    let engine = engine_with(chain, store, vec![addr(1), addr(2)]);
    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();

    // (300 - 400) / 400 * 100
    assert_eq!(metric.native_score, dec!(-25));
    assert!(!metric.tags.contains(&MetricTag::OrganicAccumulation));
}

#[tokio::test]
async fn test_sparse_history_aborts_with_coverage_error() {
    let store = JsonlSnapshotStore::in_memory();
    // Only 6 of the expected 24 hourly snapshots exist.
    let whales = [(addr(1), eth(100)), (addr(2), eth(100))];
    seed_hourly_history(&store, &whales, 6).await;

    let chain = MockChainReader::new()
        .with_native_balance(addr(1), eth(100))
        .with_native_balance(addr(2), eth(100))
        .with_reference_point(19_000_000);

    let engine = engine_with(chain, store, vec![addr(1), addr(2)]);
    let err = engine.run(&params(Decimal::ONE)).await.unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::Store(StoreError::InsufficientCoverage { .. })
    ));
}

// ============================================================================
// Union Construction
// ============================================================================

#[tokio::test]
async fn test_dropped_whale_still_counts_as_distributor() {
    let store = JsonlSnapshotStore::in_memory();
    // addr(9) was the largest holder 24h ago and has since dumped below
    // the ranking threshold; survival bias would hide the selling.
    let whales = [
        (addr(1), eth(1000)),
        (addr(2), eth(1000)),
        (addr(9), eth(2000)),
    ];
    seed_hourly_history(&store, &whales, 24).await;

    let chain = MockChainReader::new()
        .with_native_balance(addr(1), eth(1000))
        .with_native_balance(addr(2), eth(1000))
        .with_native_balance(addr(9), eth(10))
        .with_reference_point(19_000_000);

    let config = EngineConfig {
        top_n: 2,
        min_whale_balance: eth(100),
        ..EngineConfig::default()
    };
    let chain = Arc::new(chain);
    let provider = AccountSetProvider::new(
        chain.clone(),
        vec![addr(1), addr(2), addr(9)],
        HashSet::new(),
    );
    let engine = AccumulationEngine::new(chain, Arc::new(store), provider, config);

    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();

    assert_eq!(metric.whale_count, 3);
    // (2010 - 4000) / 4000 * 100 = -49.75%
    assert_eq!(metric.native_score, dec!(-49.75));
}

#[tokio::test]
async fn test_exclusions_never_enter_the_union() {
    let store = JsonlSnapshotStore::in_memory();
    let whales = [(addr(1), eth(100)), (addr(2), eth(100))];
    seed_hourly_history(&store, &whales, 24).await;

    let chain = Arc::new(
        MockChainReader::new()
            .with_native_balance(addr(1), eth(100))
            .with_native_balance(addr(2), eth(100))
            .with_reference_point(19_000_000),
    );
    // addr(2) is a bridge: excluded even though it ranks historically.
    let exclusions: HashSet<Address> = [addr(2)].into_iter().collect();
    let provider = AccountSetProvider::new(chain.clone(), vec![addr(1), addr(2)], exclusions);
    let engine = AccumulationEngine::new(
        chain,
        Arc::new(store),
        provider,
        EngineConfig::default(),
    );

    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();
    assert_eq!(metric.whale_count, 1);
}

// ============================================================================
// Derivative Balances and Tagging
// ============================================================================

#[tokio::test]
async fn test_native_to_staked_migration_tagged_not_scored() {
    let config = tokens_config();

    let store = JsonlSnapshotStore::in_memory();
    let whales = [(addr(1), eth(100)), (addr(2), eth(100))];
    seed_hourly_history(&store, &whales, 24).await;

    // addr(1) staked its entire native position; aggregated wealth unchanged.
    // Wrapped balances default to verified zero in the mock.
    let chain = MockChainReader::new()
        .with_native_balance(addr(1), U256::zero())
        .with_native_balance(addr(2), eth(100))
        .with_token_balance(config.staked_token, addr(1), eth(100))
        .with_reference_point(19_000_000);

    let engine = engine_with_config(chain, store, vec![addr(1), addr(2)], config);
    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();

    assert_eq!(metric.migration_count, 1);
    assert!(metric.tags.contains(&MetricTag::LstMigration));
    assert_eq!(metric.native_score, dec!(-50));
    // The staked position is double-counted on the historical side (the
    // documented approximation), so the aggregated score dips instead of
    // staying flat; the migration tag is what explains the dip.
    assert_eq!(metric.aggregated_score.round_dp(2), dec!(-33.33));
    assert!(metric.derivative_history_approximated);
    // A migrated wallet is neither an accumulator nor a distributor.
    assert!(!metric.tags.contains(&MetricTag::OrganicAccumulation));
}

#[tokio::test]
async fn test_looping_cohort_tagged_as_technical_activity() {
    let store = JsonlSnapshotStore::in_memory();
    let whales = [(addr(1), eth(500)), (addr(2), eth(500))];
    seed_hourly_history(&store, &whales, 24).await;

    let config = EngineConfig::default();
    // Both whales hold large wrapped positions: 100% looping cohort.
    let chain = MockChainReader::new()
        .with_native_balance(addr(1), eth(500))
        .with_native_balance(addr(2), eth(500))
        .with_token_balance(config.wrapped_token, addr(1), eth(150))
        .with_token_balance(config.wrapped_token, addr(2), eth(150))
        .with_reference_point(19_000_000);

    let engine = engine_with(chain, store, vec![addr(1), addr(2)]);
    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();

    assert_eq!(metric.looping_count, 2);
    assert!(metric.tags.contains(&MetricTag::TechnicalActivity));
}

#[tokio::test]
async fn test_failed_token_lookup_excludes_the_signal() {
    let store = JsonlSnapshotStore::in_memory();
    let whales = [
        (addr(1), eth(100)),
        (addr(2), eth(100)),
        (addr(3), eth(100)),
        (addr(4), eth(100)),
    ];
    seed_hourly_history(&store, &whales, 24).await;

    let config = EngineConfig::default();
    // addr(4)'s staked lookup failed: its signal must vanish entirely
    // rather than contribute a fabricated zero.
    let chain = MockChainReader::new()
        .with_native_balance(addr(1), eth(100))
        .with_native_balance(addr(2), eth(100))
        .with_native_balance(addr(3), eth(100))
        .with_native_balance(addr(4), eth(100))
        .with_token_failed(config.staked_token, addr(4))
        .with_reference_point(19_000_000);

    let engine = engine_with(chain, store, vec![addr(1), addr(2), addr(3), addr(4)]);
    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();

    assert_eq!(metric.whale_count, 4);
    assert_eq!(metric.signals_used, 3);
    assert_eq!(metric.signals_excluded, 1);
    // 3/4 = 75% valid signals clears the 70% floor: no data-quality tag.
    assert!(metric.tags.iter().all(|t| !t.is_data_quality()));
    assert_eq!(metric.current_native_total, dec!(300));
}

// ============================================================================
// Persistence Round Trip
// ============================================================================

#[tokio::test]
async fn test_analysis_survives_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshots.jsonl");

    {
        let store = JsonlSnapshotStore::open(&path).unwrap();
        let whales = [(addr(1), eth(100)), (addr(2), eth(100))];
        seed_hourly_history(&store, &whales, 24).await;
    }

    // Fresh process: index rebuilt from disk.
    let store = JsonlSnapshotStore::open(&path).unwrap();
    let chain = MockChainReader::new()
        .with_native_balance(addr(1), eth(120))
        .with_native_balance(addr(2), eth(120))
        .with_reference_point(19_000_000);

    let engine = engine_with(chain, store, vec![addr(1), addr(2)]);
    let metric = engine.run(&params(Decimal::ONE)).await.unwrap();

    assert_eq!(metric.native_score, dec!(20));
    assert_eq!(metric.signals_used, 2);
}
