//! Units of work handed between the runner, tracker and result store.

use crate::domain::aggregator::{AggregateRow, JobContext, TradeRecord};
use std::fmt;

/// Idempotency key: one simulation of one strategy on one series at one risk level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CombinationKey {
    pub run_id: String,
    pub symbol: String,
    pub strategy_id: u32,
    pub timeframe: String,
    pub risk_profile: String,
}

impl CombinationKey {
    pub fn new(
        run_id: &str,
        symbol: &str,
        strategy_id: u32,
        timeframe: &str,
        risk_profile: &str,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            symbol: symbol.to_uppercase(),
            strategy_id,
            timeframe: timeframe.to_string(),
            risk_profile: risk_profile.to_string(),
        }
    }
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.run_id, self.symbol, self.strategy_id, self.timeframe, self.risk_profile
        )
    }
}

impl JobContext {
    pub fn combination(&self) -> CombinationKey {
        CombinationKey::new(
            &self.run_id,
            &self.symbol,
            self.strategy_id,
            &self.timeframe,
            &self.risk_profile,
        )
    }
}

/// Everything one finished simulation contributes to the result store.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedJob {
    pub context: JobContext,
    pub rows: Vec<AggregateRow>,
    pub trades: Vec<TradeRecord>,
    pub trade_count: usize,
}

impl CompletedJob {
    pub fn key(&self) -> CombinationKey {
        self.context.combination()
    }
}

/// Row counts actually inserted by a batch write; rows that already existed
/// are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows_inserted: usize,
    pub trades_inserted: usize,
    pub jobs_marked: usize,
}

impl std::ops::AddAssign for WriteSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.rows_inserted += rhs.rows_inserted;
        self.trades_inserted += rhs.trades_inserted;
        self.jobs_marked += rhs.jobs_marked;
    }
}
