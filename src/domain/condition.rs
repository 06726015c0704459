//! Condition tree data structures.
//!
//! Every predicate a strategy can use is a variant of [`Condition`] carrying
//! its parameters as plain data. Composite nodes (`AllOf`/`AnyOf`) nest
//! arbitrarily. Trees are built once when a strategy is loaded and are shared
//! read-only between jobs; evaluation lives in `condition_eval`.

use crate::domain::bar_series::{is_price_column, ATR_COLUMN};
use std::collections::BTreeSet;

/// Right-hand side of a comparison: another column or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Ref {
    Column(String),
    Value(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    CrossesAbove { col: String, reference: Ref },
    CrossesBelow { col: String, reference: Ref },
    Above { col: String, reference: Ref },
    Below { col: String, reference: Ref },

    Rising { col: String, n: usize },
    Falling { col: String, n: usize },

    PullbackTo { level_col: String, tolerance_atr_mult: f64 },
    PullbackBelow { level_col: String, tolerance_atr_mult: f64 },

    BullishDivergence { indicator_col: String, lookback: usize },
    BearishDivergence { indicator_col: String, lookback: usize },

    CandleBullish { pattern_col: String },
    CandleBearish { pattern_col: String },

    ConsecutiveHigherCloses { n: usize },
    ConsecutiveLowerCloses { n: usize },

    Squeeze { width_col: String, lookback: usize },
    RangeExceedsAtr { multiplier: f64 },
    NarrowestRange { lookback: usize },

    BreaksAboveLevel { level_col: String },
    BreaksBelowLevel { level_col: String },

    InTopPctOfRange { pct: f64 },
    InBottomPctOfRange { pct: f64 },

    GapUp { atr_mult: f64 },
    GapDown { atr_mult: f64 },

    DeviationBelow { col: String, ref_col: String, atr_mult: f64 },
    DeviationAbove { col: String, ref_col: String, atr_mult: f64 },

    WasBelowThenCrossesAbove { col: String, threshold: f64, lookback: usize },
    WasAboveThenCrossesBelow { col: String, threshold: f64, lookback: usize },

    HeldAbove { col: String, threshold: f64, n: usize },
    HeldBelow { col: String, threshold: f64, n: usize },

    BbWidthIncreasing { n: usize },
    AdxInRange { low: f64, high: f64 },

    CloseAboveUpperChannel { col: String, multiplier: f64 },
    CloseBelowLowerChannel { col: String, multiplier: f64 },
    BreaksAboveSmaEnvelope { col: String, multiplier: f64 },
    BreaksBelowSmaEnvelope { col: String, multiplier: f64 },

    DoubleTapBelowBb { lookback: usize },
    DoubleTapAboveBb { lookback: usize },

    FlatSlope { col: String, epsilon: f64 },
    AtrBelowContractedSma { factor: f64 },
    MeanRevLong { ref_col: String, multiplier: f64 },
    MeanRevShort { ref_col: String, multiplier: f64 },

    MajorityBull,
    MajorityBear,

    AllOf(Vec<Condition>),
    AnyOf(Vec<Condition>),
}

pub const ADX_COLUMN: &str = "adx_14";
pub const BB_WIDTH_COLUMN: &str = "bb_width";
pub const BB_LOWER_COLUMN: &str = "bb_lower";
pub const BB_UPPER_COLUMN: &str = "bb_upper";
pub const ATR_SMA_COLUMN: &str = "atr_sma_50";
pub const MAJORITY_COLUMNS: [&str; 4] = ["ema_20", "ema_50", "rsi_14", "macd_hist"];

impl Condition {
    /// Non-price columns this node (and its children) read, implicit ones included.
    pub fn collect_columns(&self, out: &mut BTreeSet<String>) {
        if let Condition::AllOf(children) | Condition::AnyOf(children) = self {
            for child in children {
                child.collect_columns(out);
            }
            return;
        }
        let mut add = |c: &str| {
            if !is_price_column(c) {
                out.insert(c.to_string());
            }
        };
        match self {
            Condition::CrossesAbove { col, reference }
            | Condition::CrossesBelow { col, reference }
            | Condition::Above { col, reference }
            | Condition::Below { col, reference } => {
                add(col);
                if let Ref::Column(r) = reference {
                    add(r);
                }
            }
            Condition::Rising { col, .. }
            | Condition::Falling { col, .. }
            | Condition::WasBelowThenCrossesAbove { col, .. }
            | Condition::WasAboveThenCrossesBelow { col, .. }
            | Condition::HeldAbove { col, .. }
            | Condition::HeldBelow { col, .. }
            | Condition::FlatSlope { col, .. } => add(col),
            Condition::PullbackTo { level_col, .. } | Condition::PullbackBelow { level_col, .. } => {
                add(level_col);
                add(ATR_COLUMN);
            }
            Condition::BullishDivergence { indicator_col, .. }
            | Condition::BearishDivergence { indicator_col, .. } => add(indicator_col),
            Condition::CandleBullish { pattern_col } | Condition::CandleBearish { pattern_col } => {
                add(pattern_col)
            }
            Condition::ConsecutiveHigherCloses { .. }
            | Condition::ConsecutiveLowerCloses { .. }
            | Condition::InTopPctOfRange { .. }
            | Condition::InBottomPctOfRange { .. } => {}
            Condition::NarrowestRange { .. } => {}
            Condition::Squeeze { width_col, .. } => add(width_col),
            Condition::RangeExceedsAtr { .. } | Condition::GapUp { .. } | Condition::GapDown { .. } => {
                add(ATR_COLUMN)
            }
            Condition::BreaksAboveLevel { level_col } | Condition::BreaksBelowLevel { level_col } => {
                add(level_col)
            }
            Condition::DeviationBelow { col, ref_col, .. }
            | Condition::DeviationAbove { col, ref_col, .. } => {
                add(col);
                add(ref_col);
                add(ATR_COLUMN);
            }
            Condition::BbWidthIncreasing { .. } => add(BB_WIDTH_COLUMN),
            Condition::AdxInRange { .. } => add(ADX_COLUMN),
            Condition::CloseAboveUpperChannel { col, .. }
            | Condition::CloseBelowLowerChannel { col, .. }
            | Condition::BreaksAboveSmaEnvelope { col, .. }
            | Condition::BreaksBelowSmaEnvelope { col, .. } => {
                add(col);
                add(ATR_COLUMN);
            }
            Condition::DoubleTapBelowBb { .. } => add(BB_LOWER_COLUMN),
            Condition::DoubleTapAboveBb { .. } => add(BB_UPPER_COLUMN),
            Condition::AtrBelowContractedSma { .. } => {
                add(ATR_COLUMN);
                add(ATR_SMA_COLUMN);
            }
            Condition::MeanRevLong { ref_col, .. } | Condition::MeanRevShort { ref_col, .. } => {
                add(ref_col);
                add(ATR_COLUMN);
            }
            Condition::MajorityBull | Condition::MajorityBear => {
                for c in MAJORITY_COLUMNS {
                    add(c);
                }
            }
            Condition::AllOf(_) | Condition::AnyOf(_) => {}
        }
    }

    /// Short operator name, matching the DSL `op` field.
    pub fn op_name(&self) -> &'static str {
        match self {
            Condition::CrossesAbove { .. } => "crosses_above",
            Condition::CrossesBelow { .. } => "crosses_below",
            Condition::Above { .. } => "above",
            Condition::Below { .. } => "below",
            Condition::Rising { .. } => "rising",
            Condition::Falling { .. } => "falling",
            Condition::PullbackTo { .. } => "pullback_to",
            Condition::PullbackBelow { .. } => "pullback_below",
            Condition::BullishDivergence { .. } => "bullish_divergence",
            Condition::BearishDivergence { .. } => "bearish_divergence",
            Condition::CandleBullish { .. } => "candle_bullish",
            Condition::CandleBearish { .. } => "candle_bearish",
            Condition::ConsecutiveHigherCloses { .. } => "consecutive_higher_closes",
            Condition::ConsecutiveLowerCloses { .. } => "consecutive_lower_closes",
            Condition::Squeeze { .. } => "squeeze",
            Condition::RangeExceedsAtr { .. } => "range_exceeds_atr",
            Condition::NarrowestRange { .. } => "narrowest_range",
            Condition::BreaksAboveLevel { .. } => "breaks_above_level",
            Condition::BreaksBelowLevel { .. } => "breaks_below_level",
            Condition::InTopPctOfRange { .. } => "in_top_pct_of_range",
            Condition::InBottomPctOfRange { .. } => "in_bottom_pct_of_range",
            Condition::GapUp { .. } => "gap_up",
            Condition::GapDown { .. } => "gap_down",
            Condition::DeviationBelow { .. } => "deviation_below",
            Condition::DeviationAbove { .. } => "deviation_above",
            Condition::WasBelowThenCrossesAbove { .. } => "was_below_then_crosses_above",
            Condition::WasAboveThenCrossesBelow { .. } => "was_above_then_crosses_below",
            Condition::HeldAbove { .. } => "held_above",
            Condition::HeldBelow { .. } => "held_below",
            Condition::BbWidthIncreasing { .. } => "bb_width_increasing",
            Condition::AdxInRange { .. } => "adx_in_range",
            Condition::CloseAboveUpperChannel { .. } => "close_above_upper_channel",
            Condition::CloseBelowLowerChannel { .. } => "close_below_lower_channel",
            Condition::BreaksAboveSmaEnvelope { .. } => "breaks_above_sma_envelope",
            Condition::BreaksBelowSmaEnvelope { .. } => "breaks_below_sma_envelope",
            Condition::DoubleTapBelowBb { .. } => "double_tap_below_bb",
            Condition::DoubleTapAboveBb { .. } => "double_tap_above_bb",
            Condition::FlatSlope { .. } => "flat_slope",
            Condition::AtrBelowContractedSma { .. } => "atr_below_contracted_sma",
            Condition::MeanRevLong { .. } => "mean_rev_long",
            Condition::MeanRevShort { .. } => "mean_rev_short",
            Condition::MajorityBull => "majority_bull",
            Condition::MajorityBear => "majority_bear",
            Condition::AllOf(_) => "all_of",
            Condition::AnyOf(_) => "any_of",
        }
    }
}

/// All non-price columns referenced by a list of conditions.
pub fn required_columns(conditions: &[Condition]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for c in conditions {
        c.collect_columns(&mut out);
    }
    out
}
