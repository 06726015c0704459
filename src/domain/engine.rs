//! Bar-by-bar simulation of one strategy on one series.
//!
//! # State machine
//!
//! ```text
//! Flat --signal on bar i--> PendingEntry --open of bar i+1--> InPosition
//! InPosition --exit on bar j--> Flat (bar j may signal again)
//! ```
//!
//! - At most one position is open; signals while in a position are ignored.
//! - A signal on the last bar has no fill bar and is never acted on.
//! - A position still open at end of data is discarded.

use crate::domain::bar_series::{BarSeries, SeriesView};
use crate::domain::cancel::CancelToken;
use crate::domain::error::ProbeError;
use crate::domain::exits::{pnl_pct, ExitManager, ExitReason};
use crate::domain::risk::RiskProfile;
use crate::domain::strategy::{Direction, StrategyDefinition};
use chrono::NaiveDateTime;
use std::sync::Arc;

const MAX_JUSTIFICATION_VALUES: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    pub direction: Direction,
    pub signal_index: usize,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl_pct: f64,
    pub bars_held: u32,
    pub max_drawdown_pct: f64,
    pub max_profit_pct: f64,
    pub pnl_std: f64,
    pub exit_reason: ExitReason,
    pub entry_justification: String,
    pub exit_justification: String,
}

struct OpenPosition {
    direction: Direction,
    signal_index: usize,
    entry_index: usize,
    entry_price: f64,
    exits: ExitManager,
    entry_justification: String,
}

enum PositionState {
    Flat,
    PendingEntry {
        direction: Direction,
        signal_index: usize,
    },
    InPosition(Box<OpenPosition>),
}

pub struct SimulationEngine {
    strategy: Arc<StrategyDefinition>,
    risk: RiskProfile,
}

impl SimulationEngine {
    pub fn new(strategy: Arc<StrategyDefinition>, risk: RiskProfile) -> Self {
        Self { strategy, risk }
    }

    pub fn strategy(&self) -> &StrategyDefinition {
        &self.strategy
    }

    pub fn risk(&self) -> &RiskProfile {
        &self.risk
    }

    /// Run the strategy over every bar and return closed trades in exit order.
    pub fn run(
        &self,
        series: &BarSeries,
        cancel: &CancelToken,
    ) -> Result<Vec<TradeResult>, ProbeError> {
        let n = series.len();
        let mut trades = Vec::new();
        let mut state = PositionState::Flat;

        for i in 0..n {
            if cancel.poll(i) {
                return Err(ProbeError::Cancelled);
            }
            let Some(view) = series.view(i) else { break };
            let Some(bar) = view.bar(0) else { break };

            // Fill bar: open the position and evaluate nothing else.
            if let PositionState::PendingEntry {
                direction,
                signal_index,
            } = state
            {
                state = match view.atr(0).filter(|atr| *atr > 0.0) {
                    Some(atr) => {
                        let entry_price = bar.open;
                        let distances = self.risk.distances(&self.strategy.exits, atr);
                        tracing::debug!(bar = i, direction = %direction, price = entry_price, atr, "fill");
                        PositionState::InPosition(Box::new(OpenPosition {
                            direction,
                            signal_index,
                            entry_index: i,
                            entry_price,
                            exits: ExitManager::new(entry_price, direction, atr, distances),
                            entry_justification: self.entry_justification(
                                direction,
                                entry_price,
                                atr,
                                &view,
                            ),
                        }))
                    }
                    None => {
                        tracing::debug!(bar = i, "entry dropped: no usable ATR at fill");
                        PositionState::Flat
                    }
                };
                continue;
            }

            if let PositionState::InPosition(pos) = &mut state {
                let reason = if self.strategy.check_exit(pos.direction, &view) {
                    Some(ExitReason::SignalExit)
                } else {
                    pos.exits.check(bar.high, bar.low, bar.close)
                };
                if let Some(reason) = reason {
                    let exit_price = pos.exits.exit_price(reason, bar.close);
                    let first = series.bar(pos.entry_index).map(|b| b.timestamp);
                    let trade = TradeResult {
                        direction: pos.direction,
                        signal_index: pos.signal_index,
                        entry_index: pos.entry_index,
                        exit_index: i,
                        entry_time: first.unwrap_or(bar.timestamp),
                        exit_time: bar.timestamp,
                        entry_price: pos.entry_price,
                        exit_price,
                        pnl_pct: pnl_pct(pos.entry_price, exit_price, pos.direction),
                        bars_held: pos.exits.bars_held(),
                        max_drawdown_pct: pos.exits.max_drawdown_pct(),
                        max_profit_pct: pos.exits.max_profit_pct(),
                        pnl_std: pos.exits.pnl_std(),
                        exit_reason: reason,
                        entry_justification: std::mem::take(&mut pos.entry_justification),
                        exit_justification: exit_justification(
                            reason,
                            pos,
                            exit_price,
                            bar.close,
                        ),
                    };
                    tracing::debug!(bar = i, reason = %reason, pnl_pct = trade.pnl_pct, "exit");
                    trades.push(trade);
                    state = PositionState::Flat;
                }
            }

            if matches!(state, PositionState::Flat) && i + 1 < n {
                for direction in [Direction::Long, Direction::Short] {
                    if self.strategy.check_entry(direction, &view) {
                        state = PositionState::PendingEntry {
                            direction,
                            signal_index: i,
                        };
                        break;
                    }
                }
            }
        }

        if let PositionState::InPosition(pos) = &state {
            tracing::debug!(direction = %pos.direction, "open position discarded at end of data");
        }
        Ok(trades)
    }

    fn entry_justification(
        &self,
        direction: Direction,
        entry_price: f64,
        atr: f64,
        view: &SeriesView<'_>,
    ) -> String {
        let mut text = format!(
            "Strategy '{}' {} entry at {:.4} (ATR={:.4}, risk={})",
            self.strategy.display_name, direction, entry_price, atr, self.risk.name
        );
        let snapshot: Vec<String> = self
            .strategy
            .required_indicators()
            .iter()
            .filter_map(|col| view.value(col, 0).map(|v| format!("{col}={v:.4}")))
            .take(MAX_JUSTIFICATION_VALUES)
            .collect();
        if !snapshot.is_empty() {
            text.push_str(&format!(" [{}]", snapshot.join(", ")));
        }
        text
    }
}

fn exit_justification(reason: ExitReason, pos: &OpenPosition, exit_price: f64, close: f64) -> String {
    let exits = &pos.exits;
    let atr_multiple = |d: f64| if exits.atr() > 0.0 { d / exits.atr() } else { 0.0 };
    let detail = match reason {
        ExitReason::StopLoss => exits.distances().stop.map(|d| {
            format!("stop distance={:.4} ({:.1}x ATR)", d, atr_multiple(d))
        }),
        ExitReason::Target => exits.distances().target.map(|d| {
            format!("target distance={:.4} ({:.1}x ATR)", d, atr_multiple(d))
        }),
        ExitReason::TrailingStop => exits
            .trailing_level()
            .map(|level| format!("trailing stop at {level:.4}")),
        ExitReason::TimeStop => Some(format!(
            "after {} bars (limit={})",
            exits.bars_held(),
            exits.distances().time_limit.unwrap_or(0)
        )),
        ExitReason::SignalExit => Some(format!("signal-based exit at close={close:.4}")),
    };
    let pnl = pnl_pct(pos.entry_price, exit_price, pos.direction) * 100.0;
    let mut parts = vec![format!("Exit reason: {reason}")];
    parts.extend(detail);
    parts.push(format!("exit_price={exit_price:.4}, pnl={pnl:+.2}%"));
    parts.join("; ")
}
