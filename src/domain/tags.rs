//! Ordered tag rule table.
//!
//! Tags are assigned by walking a fixed rule table once per run instead of
//! nested conditionals. A terminal rule short-circuits the walk (the
//! data-quality tags), a revoking rule removes an earlier tag (depeg risk
//! cancels high conviction), and duplicate tags are merged.

use rust_decimal::Decimal;

use crate::domain::types::MetricTag;

/// Everything the rule predicates look at, computed once by the engine.
#[derive(Debug, Clone)]
pub struct TagContext {
    /// Too few union members had any historical record.
    pub history_coverage_failed: bool,
    /// signals_used / whale_count.
    pub signal_fraction: Decimal,
    pub min_signal_fraction: Decimal,
    pub signals_used: usize,
    /// Percent of valid signals that net-accumulated.
    pub accumulator_pct: Decimal,
    pub gini: Decimal,
    pub aggregated_score: Decimal,
    /// Externally supplied price trend, percent. None when the oracle had
    /// no trend to report.
    pub price_trend_pct: Option<Decimal>,
    pub migration_count: usize,
    /// Outlier cutoff (multiplier x MAD of per-address percent changes).
    pub mad_threshold: Decimal,
    /// Staked-derivative movement dominates the aggregate change.
    pub staked_dominates: bool,
    pub exchange_rate: Decimal,
    pub anomaly_detected: bool,
    pub looping_flagged: bool,
    pub organic_accumulation_pct: Decimal,
    pub gini_concentrated: Decimal,
    pub depeg_rate: Decimal,
}

impl TagContext {
    fn insufficient_signals(&self) -> bool {
        self.signals_used == 0 || self.signal_fraction < self.min_signal_fraction
    }

    fn score_exceeds_mad(&self) -> bool {
        self.mad_threshold > Decimal::ZERO && self.aggregated_score > self.mad_threshold
    }
}

struct TagRule {
    tag: MetricTag,
    /// Terminal rules replace everything and stop evaluation.
    terminal: bool,
    /// Tag removed when this rule fires.
    revokes: Option<MetricTag>,
    applies: fn(&TagContext) -> bool,
}

const RULES: &[TagRule] = &[
    TagRule {
        tag: MetricTag::IncompleteData,
        terminal: true,
        revokes: None,
        applies: |ctx| ctx.history_coverage_failed,
    },
    TagRule {
        tag: MetricTag::InsufficientData,
        terminal: true,
        revokes: None,
        applies: |ctx| ctx.insufficient_signals(),
    },
    TagRule {
        tag: MetricTag::OrganicAccumulation,
        terminal: false,
        revokes: None,
        applies: |ctx| ctx.accumulator_pct > ctx.organic_accumulation_pct,
    },
    TagRule {
        tag: MetricTag::ConcentratedSignal,
        terminal: false,
        revokes: None,
        applies: |ctx| ctx.gini > ctx.gini_concentrated,
    },
    TagRule {
        tag: MetricTag::BullishDivergence,
        terminal: false,
        revokes: None,
        applies: |ctx| {
            ctx.aggregated_score > Decimal::ZERO
                && ctx
                    .price_trend_pct
                    .map(|trend| trend < Decimal::ZERO)
                    .unwrap_or(false)
        },
    },
    TagRule {
        tag: MetricTag::LstMigration,
        terminal: false,
        revokes: None,
        applies: |ctx| ctx.migration_count > 0,
    },
    TagRule {
        tag: MetricTag::HighConviction,
        terminal: false,
        revokes: None,
        applies: |ctx| ctx.score_exceeds_mad() && !ctx.staked_dominates,
    },
    // Staked-dominated spikes read as technical churn, not conviction.
    TagRule {
        tag: MetricTag::TechnicalActivity,
        terminal: false,
        revokes: None,
        applies: |ctx| ctx.score_exceeds_mad() && ctx.staked_dominates,
    },
    TagRule {
        tag: MetricTag::DepegRisk,
        terminal: false,
        revokes: Some(MetricTag::HighConviction),
        applies: |ctx| ctx.exchange_rate < ctx.depeg_rate,
    },
    TagRule {
        tag: MetricTag::AnomalyAlert,
        terminal: false,
        revokes: None,
        applies: |ctx| ctx.anomaly_detected,
    },
    TagRule {
        tag: MetricTag::TechnicalActivity,
        terminal: false,
        revokes: None,
        applies: |ctx| ctx.looping_flagged,
    },
];

/// Walk the rule table once and return the final tag list.
pub fn evaluate_tags(ctx: &TagContext) -> Vec<MetricTag> {
    let mut tags: Vec<MetricTag> = Vec::new();

    for rule in RULES {
        if !(rule.applies)(ctx) {
            continue;
        }
        if rule.terminal {
            return vec![rule.tag];
        }
        if let Some(revoked) = rule.revokes {
            tags.retain(|t| *t != revoked);
        }
        if !tags.contains(&rule.tag) {
            tags.push(rule.tag);
        }
    }

    tags
}
