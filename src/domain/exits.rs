//! Mechanical exits for one open position.
//!
//! Checked once per bar after the fill bar, in fixed priority:
//! stop, target, trailing stop, time stop.

use crate::domain::risk::ExitDistances;
use crate::domain::strategy::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitReason {
    SignalExit,
    StopLoss,
    Target,
    TrailingStop,
    TimeStop,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::SignalExit => "signal_exit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Target => "target",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TimeStop => "time_stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signal_exit" => Some(ExitReason::SignalExit),
            "stop_loss" => Some(ExitReason::StopLoss),
            "target" => Some(ExitReason::Target),
            "trailing_stop" => Some(ExitReason::TrailingStop),
            "time_stop" => Some(ExitReason::TimeStop),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ExitManager {
    entry_price: f64,
    direction: Direction,
    atr: f64,
    distances: ExitDistances,
    bars_held: u32,
    best_price: f64,
    worst_price: f64,
    trailing_level: Option<f64>,
    bar_pnls: Vec<f64>,
}

impl ExitManager {
    pub fn new(entry_price: f64, direction: Direction, atr: f64, distances: ExitDistances) -> Self {
        let trailing_level = distances.trail.map(|trail| match direction {
            Direction::Long => entry_price - trail,
            Direction::Short => entry_price + trail,
        });
        Self {
            entry_price,
            direction,
            atr,
            distances,
            bars_held: 0,
            best_price: entry_price,
            worst_price: entry_price,
            trailing_level,
            bar_pnls: Vec::with_capacity(64),
        }
    }

    pub fn bars_held(&self) -> u32 {
        self.bars_held
    }

    pub fn distances(&self) -> &ExitDistances {
        &self.distances
    }

    pub fn atr(&self) -> f64 {
        self.atr
    }

    pub fn trailing_level(&self) -> Option<f64> {
        self.trailing_level
    }

    /// Record one held bar and return the first exit that fires, if any.
    pub fn check(&mut self, high: f64, low: f64, close: f64) -> Option<ExitReason> {
        self.bars_held += 1;

        match self.direction {
            Direction::Long => {
                self.best_price = self.best_price.max(high);
                self.worst_price = self.worst_price.min(low);
            }
            Direction::Short => {
                self.best_price = self.best_price.min(low);
                self.worst_price = self.worst_price.max(high);
            }
        }
        self.bar_pnls.push(self.pnl_pct_at(close));

        if let Some(stop) = self.distances.stop {
            let hit = match self.direction {
                Direction::Long => low <= self.entry_price - stop,
                Direction::Short => high >= self.entry_price + stop,
            };
            if hit {
                return Some(ExitReason::StopLoss);
            }
        }

        if let Some(target) = self.distances.target {
            let hit = match self.direction {
                Direction::Long => high >= self.entry_price + target,
                Direction::Short => low <= self.entry_price - target,
            };
            if hit {
                return Some(ExitReason::Target);
            }
        }

        if let (Some(trail), Some(level)) = (self.distances.trail, self.trailing_level) {
            let (level, hit) = match self.direction {
                Direction::Long => {
                    let level = level.max(high - trail);
                    (level, low <= level)
                }
                Direction::Short => {
                    let level = level.min(low + trail);
                    (level, high >= level)
                }
            };
            self.trailing_level = Some(level);
            if hit {
                return Some(ExitReason::TrailingStop);
            }
        }

        if let Some(limit) = self.distances.time_limit {
            if self.bars_held >= limit {
                return Some(ExitReason::TimeStop);
            }
        }

        None
    }

    /// Fill price for `reason`: the level itself for price exits, the close otherwise.
    pub fn exit_price(&self, reason: ExitReason, close: f64) -> f64 {
        let sign = match self.direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        };
        match reason {
            ExitReason::StopLoss => self
                .distances
                .stop
                .map_or(close, |d| self.entry_price - sign * d),
            ExitReason::Target => self
                .distances
                .target
                .map_or(close, |d| self.entry_price + sign * d),
            ExitReason::TrailingStop => self.trailing_level.unwrap_or(close),
            ExitReason::SignalExit | ExitReason::TimeStop => close,
        }
    }

    /// Largest adverse move from entry, as a fraction of entry price.
    pub fn max_drawdown_pct(&self) -> f64 {
        match self.direction {
            Direction::Long => (self.entry_price - self.worst_price) / self.entry_price,
            Direction::Short => (self.worst_price - self.entry_price) / self.entry_price,
        }
    }

    /// Largest favourable move from entry, as a fraction of entry price.
    pub fn max_profit_pct(&self) -> f64 {
        match self.direction {
            Direction::Long => (self.best_price - self.entry_price) / self.entry_price,
            Direction::Short => (self.entry_price - self.best_price) / self.entry_price,
        }
    }

    /// Population std of the per-bar close P&L; 0 with fewer than two bars.
    pub fn pnl_std(&self) -> f64 {
        population_std(&self.bar_pnls)
    }

    fn pnl_pct_at(&self, price: f64) -> f64 {
        pnl_pct(self.entry_price, price, self.direction)
    }
}

pub fn pnl_pct(entry: f64, exit: f64, direction: Direction) -> f64 {
    match direction {
        Direction::Long => (exit - entry) / entry,
        Direction::Short => (entry - exit) / entry,
    }
}

/// Population standard deviation; 0 for fewer than two values.
pub fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn distances(stop: f64, target: f64, trail: f64, time: u32) -> ExitDistances {
        let opt = |v: f64| (v > 0.0).then_some(v);
        ExitDistances {
            stop: opt(stop),
            target: opt(target),
            trail: opt(trail),
            time_limit: (time > 0).then_some(time),
        }
    }

    #[test]
    fn long_stop_fires_at_level() {
        let mut em = ExitManager::new(100.0, Direction::Long, 2.0, distances(4.0, 0.0, 0.0, 0));
        assert_eq!(em.check(101.0, 97.0, 100.0), None);
        assert_eq!(em.check(100.0, 96.0, 97.0), Some(ExitReason::StopLoss));
        assert_relative_eq!(em.exit_price(ExitReason::StopLoss, 97.0), 96.0);
        assert_eq!(em.bars_held(), 2);
    }

    #[test]
    fn short_target_fires_at_level() {
        let mut em = ExitManager::new(100.0, Direction::Short, 2.0, distances(0.0, 5.0, 0.0, 0));
        assert_eq!(em.check(101.0, 95.0, 96.0), Some(ExitReason::Target));
        assert_relative_eq!(em.exit_price(ExitReason::Target, 96.0), 95.0);
    }

    #[test]
    fn stop_wins_when_stop_and_target_hit_same_bar() {
        let mut em = ExitManager::new(100.0, Direction::Long, 1.0, distances(2.0, 2.0, 0.0, 0));
        assert_eq!(em.check(103.0, 97.0, 100.0), Some(ExitReason::StopLoss));
    }

    #[test]
    fn trailing_level_ratchets_up_for_longs() {
        let mut em = ExitManager::new(100.0, Direction::Long, 1.0, distances(0.0, 0.0, 3.0, 0));
        assert_eq!(em.trailing_level(), Some(97.0));
        assert_eq!(em.check(105.0, 103.0, 104.0), None);
        assert_eq!(em.trailing_level(), Some(102.0));
        // lower high must not lower the level
        assert_eq!(em.check(104.0, 102.5, 103.0), None);
        assert_eq!(em.trailing_level(), Some(102.0));
        assert_eq!(em.check(103.0, 101.0, 101.5), Some(ExitReason::TrailingStop));
        assert_relative_eq!(em.exit_price(ExitReason::TrailingStop, 101.5), 102.0);
    }

    #[test]
    fn trailing_level_ratchets_down_for_shorts() {
        let mut em = ExitManager::new(100.0, Direction::Short, 1.0, distances(0.0, 0.0, 2.0, 0));
        assert_eq!(em.check(96.5, 95.0, 96.0), None);
        assert_eq!(em.trailing_level(), Some(97.0));
        assert_eq!(em.check(97.5, 96.0, 97.0), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn time_stop_after_limit_bars() {
        let mut em = ExitManager::new(100.0, Direction::Long, 1.0, distances(0.0, 0.0, 0.0, 3));
        assert_eq!(em.check(101.0, 99.0, 100.0), None);
        assert_eq!(em.check(101.0, 99.0, 100.0), None);
        assert_eq!(em.check(101.0, 99.0, 100.5), Some(ExitReason::TimeStop));
        assert_relative_eq!(em.exit_price(ExitReason::TimeStop, 100.5), 100.5);
    }

    #[test]
    fn excursions_track_best_and_worst() {
        let mut em = ExitManager::new(100.0, Direction::Long, 1.0, distances(0.0, 0.0, 0.0, 0));
        em.check(110.0, 95.0, 105.0);
        em.check(108.0, 98.0, 99.0);
        assert_relative_eq!(em.max_profit_pct(), 0.10);
        assert_relative_eq!(em.max_drawdown_pct(), 0.05);
        // per-bar pnls 0.05 and -0.01 -> std 0.03
        assert_relative_eq!(em.pnl_std(), 0.03, epsilon = 1e-12);
    }

    #[test]
    fn short_excursions_are_mirrored() {
        let mut em = ExitManager::new(100.0, Direction::Short, 1.0, distances(0.0, 0.0, 0.0, 0));
        em.check(104.0, 90.0, 95.0);
        assert_relative_eq!(em.max_profit_pct(), 0.10);
        assert_relative_eq!(em.max_drawdown_pct(), 0.04);
        assert_eq!(em.pnl_std(), 0.0);
    }

    #[test]
    fn no_exits_configured_never_fires() {
        let mut em = ExitManager::new(100.0, Direction::Long, 1.0, ExitDistances::default());
        for _ in 0..50 {
            assert_eq!(em.check(200.0, 1.0, 100.0), None);
        }
    }

    #[test]
    fn pnl_pct_by_direction() {
        assert_relative_eq!(pnl_pct(100.0, 110.0, Direction::Long), 0.10);
        assert_relative_eq!(pnl_pct(100.0, 110.0, Direction::Short), -0.10);
    }

    #[test]
    fn reason_strings_round_trip() {
        for r in [
            ExitReason::SignalExit,
            ExitReason::StopLoss,
            ExitReason::Target,
            ExitReason::TrailingStop,
            ExitReason::TimeStop,
        ] {
            assert_eq!(ExitReason::parse(r.as_str()), Some(r));
        }
    }
}
