//! Aggregation of closed trades into per-group result rows.

use crate::domain::engine::TradeResult;
use crate::domain::exits::population_std;
use crate::domain::strategy::Direction;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::collections::BTreeMap;

/// Grouping dimensions of an aggregate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub open_day: NaiveDate,
    pub open_hour: u32,
    pub direction: Direction,
}

impl GroupKey {
    pub fn of(entry_time: NaiveDateTime, direction: Direction) -> Self {
        Self {
            open_day: entry_time.date(),
            open_hour: entry_time.hour(),
            direction,
        }
    }
}

/// Identity of one (run, symbol, strategy, timeframe, risk) simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub run_id: String,
    pub symbol: String,
    pub strategy_id: u32,
    pub timeframe: String,
    pub risk_profile: String,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub run_id: String,
    pub symbol: String,
    pub strategy_id: u32,
    pub timeframe: String,
    pub risk_profile: String,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
    pub key: GroupKey,
    pub trade_count: u32,
    pub pnl_mean: f64,
    pub pnl_std: f64,
    pub max_drawdown: f64,
    pub max_profit: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub key: GroupKey,
    pub ticker: String,
    pub open_timestamp: NaiveDateTime,
    pub close_timestamp: NaiveDateTime,
    pub direction: Direction,
    pub open_justification: String,
    pub close_justification: String,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub bars_held: u32,
    pub max_drawdown: f64,
    pub max_profit: f64,
    pub pnl_std: f64,
    pub exit_reason: String,
}

/// Group trades by entry date, entry hour and direction. Rows come back in
/// ascending key order; no trades means no rows.
pub fn aggregate_trades(trades: &[TradeResult], ctx: &JobContext) -> Vec<AggregateRow> {
    let mut groups: BTreeMap<GroupKey, Vec<&TradeResult>> = BTreeMap::new();
    for t in trades {
        groups
            .entry(GroupKey::of(t.entry_time, t.direction))
            .or_default()
            .push(t);
    }

    let symbol = ctx.symbol.to_uppercase();
    groups
        .into_iter()
        .map(|(key, group)| {
            let pnls: Vec<f64> = group.iter().map(|t| t.pnl_pct).collect();
            let n = pnls.len() as f64;
            AggregateRow {
                run_id: ctx.run_id.clone(),
                symbol: symbol.clone(),
                strategy_id: ctx.strategy_id,
                timeframe: ctx.timeframe.clone(),
                risk_profile: ctx.risk_profile.clone(),
                period_start: ctx.period_start,
                period_end: ctx.period_end,
                key,
                trade_count: group.len() as u32,
                pnl_mean: pnls.iter().sum::<f64>() / n,
                pnl_std: population_std(&pnls),
                max_drawdown: group
                    .iter()
                    .map(|t| t.max_drawdown_pct)
                    .fold(f64::NEG_INFINITY, f64::max),
                max_profit: group
                    .iter()
                    .map(|t| t.max_profit_pct)
                    .fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect()
}

/// Persistable trade rows, each tagged with the key of its aggregate row.
pub fn build_trade_records(trades: &[TradeResult], symbol: &str) -> Vec<TradeRecord> {
    let ticker = symbol.to_uppercase();
    trades
        .iter()
        .map(|t| TradeRecord {
            key: GroupKey::of(t.entry_time, t.direction),
            ticker: ticker.clone(),
            open_timestamp: t.entry_time,
            close_timestamp: t.exit_time,
            direction: t.direction,
            open_justification: t.entry_justification.clone(),
            close_justification: t.exit_justification.clone(),
            pnl: t.pnl_pct * t.entry_price,
            pnl_pct: t.pnl_pct,
            bars_held: t.bars_held,
            max_drawdown: t.max_drawdown_pct,
            max_profit: t.max_profit_pct,
            pnl_std: t.pnl_std,
            exit_reason: t.exit_reason.as_str().to_string(),
        })
        .collect()
}
