//! Condition evaluation.
//!
//! # Evaluation semantics
//!
//! - Every leaf reads through a [`SeriesView`], so only bars at or before the
//!   evaluated index are reachable.
//! - A missing, NaN or infinite input makes the leaf `false`.
//! - Cross and breakout leaves need a previous bar and are `false` at index 0.
//! - `AllOf` short-circuits on the first `false`, `AnyOf` on the first `true`.

use crate::domain::bar_series::{BarSeries, SeriesView};
use crate::domain::condition::{
    ADX_COLUMN, ATR_SMA_COLUMN, BB_LOWER_COLUMN, BB_UPPER_COLUMN, BB_WIDTH_COLUMN, Condition, Ref,
};

/// Evaluate `condition` at bar `index`. Indices past the end are `false`.
pub fn evaluate(condition: &Condition, series: &BarSeries, index: usize) -> bool {
    match series.view(index) {
        Some(view) => evaluate_view(condition, &view),
        None => false,
    }
}

/// True when every condition holds. An empty list never fires.
pub fn all_hold(conditions: &[Condition], view: &SeriesView<'_>) -> bool {
    !conditions.is_empty() && conditions.iter().all(|c| evaluate_view(c, view))
}

/// True when at least one condition holds.
pub fn any_holds(conditions: &[Condition], view: &SeriesView<'_>) -> bool {
    conditions.iter().any(|c| evaluate_view(c, view))
}

pub fn evaluate_view(condition: &Condition, view: &SeriesView<'_>) -> bool {
    eval(condition, view).unwrap_or(false)
}

fn resolve(view: &SeriesView<'_>, reference: &Ref, back: usize) -> Option<f64> {
    match reference {
        Ref::Column(col) => view.value(col, back),
        Ref::Value(v) => Some(*v),
    }
}

/// `Some(result)` when all inputs were usable, `None` otherwise.
fn eval(condition: &Condition, view: &SeriesView<'_>) -> Option<bool> {
    match condition {
        Condition::CrossesAbove { col, reference } => {
            let curr_a = view.value(col, 0)?;
            let prev_a = view.value(col, 1)?;
            let curr_b = resolve(view, reference, 0)?;
            let prev_b = resolve(view, reference, 1)?;
            Some(prev_a <= prev_b && curr_a > curr_b)
        }
        Condition::CrossesBelow { col, reference } => {
            let curr_a = view.value(col, 0)?;
            let prev_a = view.value(col, 1)?;
            let curr_b = resolve(view, reference, 0)?;
            let prev_b = resolve(view, reference, 1)?;
            Some(prev_a >= prev_b && curr_a < curr_b)
        }
        Condition::Above { col, reference } => {
            Some(view.value(col, 0)? > resolve(view, reference, 0)?)
        }
        Condition::Below { col, reference } => {
            Some(view.value(col, 0)? < resolve(view, reference, 0)?)
        }
        Condition::Rising { col, n } => steps(view, col, *n, |curr, prev| curr > prev),
        Condition::Falling { col, n } => steps(view, col, *n, |curr, prev| curr < prev),
        Condition::PullbackTo {
            level_col,
            tolerance_atr_mult,
        } => {
            let bar = view.bar(0)?;
            let level = view.value(level_col, 0)?;
            let tolerance = tolerance_atr_mult * view.atr(0)?;
            Some(bar.low <= level + tolerance && bar.close > level)
        }
        Condition::PullbackBelow {
            level_col,
            tolerance_atr_mult,
        } => {
            let bar = view.bar(0)?;
            let level = view.value(level_col, 0)?;
            let tolerance = tolerance_atr_mult * view.atr(0)?;
            Some(bar.high >= level - tolerance && bar.close < level)
        }
        Condition::BullishDivergence {
            indicator_col,
            lookback,
        } => {
            let price_now = view.bar(0)?.low;
            let price_prev = view.bar(*lookback)?.low;
            let ind_now = view.value(indicator_col, 0)?;
            let ind_prev = view.value(indicator_col, *lookback)?;
            Some(price_now < price_prev && ind_now > ind_prev)
        }
        Condition::BearishDivergence {
            indicator_col,
            lookback,
        } => {
            let price_now = view.bar(0)?.high;
            let price_prev = view.bar(*lookback)?.high;
            let ind_now = view.value(indicator_col, 0)?;
            let ind_prev = view.value(indicator_col, *lookback)?;
            Some(price_now > price_prev && ind_now < ind_prev)
        }
        Condition::CandleBullish { pattern_col } => Some(view.value(pattern_col, 0)? > 0.0),
        Condition::CandleBearish { pattern_col } => Some(view.value(pattern_col, 0)? < 0.0),
        Condition::ConsecutiveHigherCloses { n } => {
            steps(view, "close", *n, |curr, prev| curr > prev)
        }
        Condition::ConsecutiveLowerCloses { n } => {
            steps(view, "close", *n, |curr, prev| curr < prev)
        }
        Condition::Squeeze {
            width_col,
            lookback,
        } => {
            if view.index() < *lookback {
                return Some(false);
            }
            let current = view.value(width_col, 0)?;
            for back in 1..*lookback {
                if view.value(width_col, back)? < current {
                    return Some(false);
                }
            }
            Some(true)
        }
        Condition::RangeExceedsAtr { multiplier } => {
            Some(view.bar(0)?.range() > multiplier * view.atr(0)?)
        }
        Condition::NarrowestRange { lookback } => {
            let current = view.bar(0)?.range();
            for back in 1..*lookback {
                if view.bar(back)?.range() < current {
                    return Some(false);
                }
            }
            Some(true)
        }
        Condition::BreaksAboveLevel { level_col } => {
            let close_now = view.bar(0)?.close;
            let close_prev = view.bar(1)?.close;
            let level_now = view.value(level_col, 0)?;
            let level_prev = view.value(level_col, 1)?;
            Some(close_prev <= level_prev && close_now > level_now)
        }
        Condition::BreaksBelowLevel { level_col } => {
            let close_now = view.bar(0)?.close;
            let close_prev = view.bar(1)?.close;
            let level_now = view.value(level_col, 0)?;
            let level_prev = view.value(level_col, 1)?;
            Some(close_prev >= level_prev && close_now < level_now)
        }
        Condition::InTopPctOfRange { pct } => {
            let position = range_position(view)?;
            Some(position >= 1.0 - pct)
        }
        Condition::InBottomPctOfRange { pct } => {
            let position = range_position(view)?;
            Some(position <= *pct)
        }
        Condition::GapUp { atr_mult } => {
            let open_now = view.bar(0)?.open;
            let close_prev = view.bar(1)?.close;
            Some(open_now > close_prev + atr_mult * view.atr(0)?)
        }
        Condition::GapDown { atr_mult } => {
            let open_now = view.bar(0)?.open;
            let close_prev = view.bar(1)?.close;
            Some(open_now < close_prev - atr_mult * view.atr(0)?)
        }
        Condition::DeviationBelow {
            col,
            ref_col,
            atr_mult,
        } => {
            let v = view.value(col, 0)?;
            let r = view.value(ref_col, 0)?;
            Some(r - v > atr_mult * view.atr(0)?)
        }
        Condition::DeviationAbove {
            col,
            ref_col,
            atr_mult,
        } => {
            let v = view.value(col, 0)?;
            let r = view.value(ref_col, 0)?;
            Some(v - r > atr_mult * view.atr(0)?)
        }
        Condition::WasBelowThenCrossesAbove {
            col,
            threshold,
            lookback,
        } => {
            if view.index() < *lookback {
                return Some(false);
            }
            let curr = view.value(col, 0)?;
            let prev = view.value(col, 1)?;
            if !(prev <= *threshold && curr > *threshold) {
                return Some(false);
            }
            Some((1..=*lookback).any(|back| matches!(view.value(col, back), Some(v) if v < *threshold)))
        }
        Condition::WasAboveThenCrossesBelow {
            col,
            threshold,
            lookback,
        } => {
            if view.index() < *lookback {
                return Some(false);
            }
            let curr = view.value(col, 0)?;
            let prev = view.value(col, 1)?;
            if !(prev >= *threshold && curr < *threshold) {
                return Some(false);
            }
            Some((1..=*lookback).any(|back| matches!(view.value(col, back), Some(v) if v > *threshold)))
        }
        Condition::HeldAbove { col, threshold, n } => held(view, col, *n, |v| v > *threshold),
        Condition::HeldBelow { col, threshold, n } => held(view, col, *n, |v| v < *threshold),
        Condition::BbWidthIncreasing { n } => {
            let curr = view.value(BB_WIDTH_COLUMN, 0)?;
            let prev = view.value(BB_WIDTH_COLUMN, *n)?;
            Some(curr > prev)
        }
        Condition::AdxInRange { low, high } => {
            let adx = view.value(ADX_COLUMN, 0)?;
            Some(adx >= *low && adx <= *high)
        }
        Condition::CloseAboveUpperChannel { col, multiplier } => {
            let close = view.bar(0)?.close;
            Some(close > view.value(col, 0)? + multiplier * view.atr(0)?)
        }
        Condition::CloseBelowLowerChannel { col, multiplier } => {
            let close = view.bar(0)?.close;
            Some(close < view.value(col, 0)? - multiplier * view.atr(0)?)
        }
        Condition::BreaksAboveSmaEnvelope { col, multiplier } => {
            let upper_now = view.value(col, 0)? + multiplier * view.atr(0)?;
            let upper_prev = view.value(col, 1)? + multiplier * view.atr(1)?;
            Some(view.bar(1)?.close <= upper_prev && view.bar(0)?.close > upper_now)
        }
        Condition::BreaksBelowSmaEnvelope { col, multiplier } => {
            let lower_now = view.value(col, 0)? - multiplier * view.atr(0)?;
            let lower_prev = view.value(col, 1)? - multiplier * view.atr(1)?;
            Some(view.bar(1)?.close >= lower_prev && view.bar(0)?.close < lower_now)
        }
        Condition::DoubleTapBelowBb { lookback } => {
            double_tap(view, BB_LOWER_COLUMN, *lookback, |close, band| close < band)
        }
        Condition::DoubleTapAboveBb { lookback } => {
            double_tap(view, BB_UPPER_COLUMN, *lookback, |close, band| close > band)
        }
        Condition::FlatSlope { col, epsilon } => Some(view.value(col, 0)?.abs() < *epsilon),
        Condition::AtrBelowContractedSma { factor } => {
            Some(view.atr(0)? < factor * view.value(ATR_SMA_COLUMN, 0)?)
        }
        Condition::MeanRevLong {
            ref_col,
            multiplier,
        } => {
            let close = view.bar(0)?.close;
            Some(view.value(ref_col, 0)? - close > multiplier * view.atr(0)?)
        }
        Condition::MeanRevShort {
            ref_col,
            multiplier,
        } => {
            let close = view.bar(0)?.close;
            Some(close - view.value(ref_col, 0)? > multiplier * view.atr(0)?)
        }
        Condition::MajorityBull => {
            let [ema20, ema50, rsi, hist] = majority_inputs(view)?;
            let votes = [ema20 > ema50, rsi > 55.0, hist > 0.0];
            Some(votes.iter().filter(|v| **v).count() >= 2)
        }
        Condition::MajorityBear => {
            let [ema20, ema50, rsi, hist] = majority_inputs(view)?;
            let votes = [ema20 < ema50, rsi < 45.0, hist < 0.0];
            Some(votes.iter().filter(|v| **v).count() >= 2)
        }
        Condition::AllOf(children) => Some(children.iter().all(|c| evaluate_view(c, view))),
        Condition::AnyOf(children) => Some(children.iter().any(|c| evaluate_view(c, view))),
    }
}

/// Each of the last `n` step-to-step changes in `col` satisfies `cmp(curr, prev)`.
fn steps(view: &SeriesView<'_>, col: &str, n: usize, cmp: impl Fn(f64, f64) -> bool) -> Option<bool> {
    if view.index() < n {
        return Some(false);
    }
    for back in 0..n {
        let curr = view.value(col, back)?;
        let prev = view.value(col, back + 1)?;
        if !cmp(curr, prev) {
            return Some(false);
        }
    }
    Some(true)
}

/// The last `n` values of `col` (current included) all satisfy `check`.
fn held(view: &SeriesView<'_>, col: &str, n: usize, check: impl Fn(f64) -> bool) -> Option<bool> {
    if n == 0 || view.index() + 1 < n {
        return Some(false);
    }
    for back in 0..n {
        if !check(view.value(col, back)?) {
            return Some(false);
        }
    }
    Some(true)
}

fn double_tap(
    view: &SeriesView<'_>,
    band_col: &str,
    lookback: usize,
    outside: impl Fn(f64, f64) -> bool,
) -> Option<bool> {
    if view.index() < lookback {
        return Some(false);
    }
    let mut count = 0;
    for back in 1..=lookback {
        let close = view.bar(back)?.close;
        if let Some(band) = view.value(band_col, back) {
            if outside(close, band) {
                count += 1;
            }
        }
    }
    Some(count >= 2)
}

fn range_position(view: &SeriesView<'_>) -> Option<f64> {
    let bar = view.bar(0)?;
    if bar.high == bar.low {
        return None;
    }
    Some((bar.close - bar.low) / (bar.high - bar.low))
}

fn majority_inputs(view: &SeriesView<'_>) -> Option<[f64; 4]> {
    Some([
        view.value("ema_20", 0)?,
        view.value("ema_50", 0)?,
        view.value("rsi_14", 0)?,
        view.value("macd_hist", 0)?,
    ])
}
