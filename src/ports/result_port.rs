//! Result persistence port.
//!
//! Writes are idempotent: rows are keyed on their natural key and a second
//! write of the same key is ignored, never merged.

use crate::domain::aggregator::AggregateRow;
use crate::domain::error::ProbeError;
use crate::domain::job::{CombinationKey, CompletedJob, WriteSummary};
use crate::domain::run_tracker::{RunStatus, RunSummary};

/// Filter for [`ResultPort::fetch_results`]; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultFilter {
    pub run_id: Option<String>,
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub strategy_id: Option<u32>,
    pub risk_profile: Option<String>,
}

impl ResultFilter {
    pub fn for_run(run_id: &str) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, row: &AggregateRow) -> bool {
        self.run_id.as_deref().is_none_or(|v| v == row.run_id)
            && self
                .symbol
                .as_deref()
                .is_none_or(|v| v.eq_ignore_ascii_case(&row.symbol))
            && self.timeframe.as_deref().is_none_or(|v| v == row.timeframe)
            && self.strategy_id.is_none_or(|v| v == row.strategy_id)
            && self
                .risk_profile
                .as_deref()
                .is_none_or(|v| v == row.risk_profile)
    }
}

pub trait ResultPort {
    /// True when the combination was already persisted by an earlier attempt.
    fn is_combination_done(&self, key: &CombinationKey) -> Result<bool, ProbeError>;

    /// Persist a batch of completed jobs atomically.
    fn write_batch(&self, jobs: &[CompletedJob]) -> Result<WriteSummary, ProbeError>;

    /// Aggregate rows ordered by their natural key.
    fn fetch_results(&self, filter: &ResultFilter) -> Result<Vec<AggregateRow>, ProbeError>;

    fn save_run(&self, summary: &RunSummary) -> Result<(), ProbeError>;

    fn load_run(&self, run_id: &str) -> Result<Option<RunSummary>, ProbeError>;

    /// Newest first; `limit` of 0 means no limit.
    fn list_runs(
        &self,
        status: Option<RunStatus>,
        symbol: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RunSummary>, ProbeError>;
}
