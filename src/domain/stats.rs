//! Statistics for the accumulation pipeline.
//!
//! Every monetary computation runs on `rust_decimal::Decimal` after raw
//! integer balances are rescaled to native units. Mixing float and
//! fixed-point types here is what causes overflow and precision loss at
//! whale-sized magnitudes, so the raw `U256` boundary is crossed exactly
//! once, in `raw_to_native`.

use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Rescale a raw smallest-unit balance to native units.
///
/// Splits the integer division so the fractional part never leaves the
/// `u128` range. Returns `None` when the whole-unit part exceeds what
/// `Decimal` can represent (absurd for real balances) or `decimals` exceeds
/// `Decimal`'s scale limit.
pub fn raw_to_native(raw: U256, decimals: u32) -> Option<Decimal> {
    if decimals > 28 {
        return None;
    }
    let scale = U256::exp10(decimals as usize);
    let (whole, frac) = raw.div_mod(scale);
    let whole = Decimal::from_str(&whole.to_string()).ok()?;
    let frac = Decimal::from_i128_with_scale(frac.as_u128() as i128, decimals);
    whole.checked_add(frac)
}

/// Percent change score, zero-guarded: a zero (or negative) historical
/// denominator yields 0 for any current total, never an error.
pub fn pct_score(current: Decimal, historical: Decimal) -> Decimal {
    if historical <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (current - historical)
        .checked_div(historical)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

/// Median of a set of values. `None` on empty input.
pub fn median(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / Decimal::TWO)
    }
}

/// Median Absolute Deviation, the robust dispersion measure behind the
/// outlier cutoff. `None` on empty input.
pub fn mad(values: &[Decimal]) -> Option<Decimal> {
    let med = median(values)?;
    let deviations: Vec<Decimal> = values.iter().map(|v| (*v - med).abs()).collect();
    median(&deviations)
}

/// Gini coefficient over non-negative balances, clamped to [0, 1].
///
/// Weighted-rank form over ascending-sorted values:
/// `G = sum_i (2i - n - 1) * x_i / (n * sum(x))`, 1-based i.
/// Callers must rescale to native units first; Gini is scale-invariant, and
/// the rescale keeps the rank sum far from Decimal's ceiling.
pub fn gini(balances: &[Decimal]) -> Decimal {
    let mut sorted = balances.to_vec();
    sorted.sort();

    let n = sorted.len();
    let total: Decimal = sorted.iter().sum();
    if n == 0 || total <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let n_dec = Decimal::from(n);
    let mut weighted = Decimal::ZERO;
    for (i, value) in sorted.iter().enumerate() {
        let rank = Decimal::from(i + 1);
        weighted += (Decimal::TWO * rank - n_dec - Decimal::ONE) * value;
    }

    let g = weighted / (n_dec * total);
    g.clamp(Decimal::ZERO, Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn close(a: Decimal, b: Decimal) -> bool {
        (a - b).abs() < dec!(0.000001)
    }

    #[test]
    fn test_raw_to_native_whole_and_fraction() {
        let raw = U256::from_dec_str("1500000000000000000").unwrap(); // 1.5 ETH
        assert_eq!(raw_to_native(raw, 18).unwrap(), dec!(1.5));
    }

    #[test]
    fn test_raw_to_native_zero() {
        assert_eq!(raw_to_native(U256::zero(), 18).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_raw_to_native_whale_magnitude() {
        // 10 million ETH in wei, well past u64 range
        let raw = U256::from_dec_str("10000000000000000000000000").unwrap();
        assert_eq!(raw_to_native(raw, 18).unwrap(), dec!(10000000));
    }

    #[test]
    fn test_raw_to_native_rejects_oversized_scale() {
        assert!(raw_to_native(U256::one(), 29).is_none());
    }

    #[test]
    fn test_score_zero_denominator_returns_zero() {
        assert_eq!(pct_score(dec!(500), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(pct_score(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_score_percent_change() {
        assert_eq!(pct_score(dec!(110), dec!(100)), dec!(10));
        assert_eq!(pct_score(dec!(90), dec!(100)), dec!(-10));
        assert_eq!(pct_score(dec!(100), dec!(100)), Decimal::ZERO);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[dec!(3), dec!(1), dec!(2)]).unwrap(), dec!(2));
        assert_eq!(
            median(&[dec!(1), dec!(2), dec!(3), dec!(4)]).unwrap(),
            dec!(2.5)
        );
        assert!(median(&[]).is_none());
    }

    #[test]
    fn test_median_matches_reference_implementation() {
        use rust_decimal::prelude::ToPrimitive;
        use statrs::statistics::{Data, Median};

        let values = [dec!(12), dec!(3.5), dec!(7), dec!(42), dec!(1), dec!(0.25)];
        let ours = median(&values).unwrap().to_f64().unwrap();
        let floats: Vec<f64> = values.iter().map(|v| v.to_f64().unwrap()).collect();
        let reference = Data::new(floats).median();
        approx::assert_relative_eq!(ours, reference);
    }

    #[test]
    fn test_mad_known_values() {
        // median 5, abs deviations [4, 3, 0, 2, 4] -> median 3
        let values = [dec!(1), dec!(2), dec!(5), dec!(7), dec!(9)];
        assert_eq!(mad(&values).unwrap(), dec!(3));
    }

    #[test]
    fn test_gini_uniform_distribution_is_zero() {
        let balances = vec![dec!(42); 10];
        assert_eq!(gini(&balances), Decimal::ZERO);
    }

    #[test]
    fn test_gini_single_dominant_holder() {
        // One holder owns everything among n=4: G = (n-1)/n = 0.75
        let balances = [dec!(0), dec!(0), dec!(0), dec!(100)];
        assert!(close(gini(&balances), dec!(0.75)));
    }

    #[test]
    fn test_gini_approaches_one_with_dominance() {
        let mut balances = vec![Decimal::ZERO; 99];
        balances.push(dec!(1000000));
        assert!(gini(&balances) > dec!(0.98));
    }

    #[test]
    fn test_gini_scale_invariance() {
        let balances = [dec!(5), dec!(10), dec!(20), dec!(40), dec!(80)];
        let scaled: Vec<Decimal> = balances.iter().map(|b| *b * dec!(1000)).collect();
        assert!(close(gini(&balances), gini(&scaled)));
    }

    #[test]
    fn test_gini_empty_and_zero_total() {
        assert_eq!(gini(&[]), Decimal::ZERO);
        assert_eq!(gini(&[Decimal::ZERO, Decimal::ZERO]), Decimal::ZERO);
    }

    #[test]
    fn test_gini_bounded() {
        let balances = [dec!(1), dec!(2), dec!(1000000), dec!(3)];
        let g = gini(&balances);
        assert!(g >= Decimal::ZERO && g <= Decimal::ONE);
    }
}
