//! In-memory result store with the same insert-or-ignore semantics as the
//! SQLite store. Used for dry runs (`--no-persist`) and tests.

use crate::domain::aggregator::{AggregateRow, GroupKey, TradeRecord};
use crate::domain::error::ProbeError;
use crate::domain::job::{CombinationKey, CompletedJob, WriteSummary};
use crate::domain::run_tracker::{RunStatus, RunSummary};
use crate::domain::strategy::Direction;
use crate::ports::result_port::{ResultFilter, ResultPort};
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

type RowKey = (CombinationKey, GroupKey);
type TradeKey = (RowKey, NaiveDateTime, Direction);

#[derive(Default)]
struct Store {
    rows: BTreeMap<RowKey, AggregateRow>,
    trades: BTreeMap<TradeKey, TradeRecord>,
    done: BTreeSet<CombinationKey>,
    runs: HashMap<String, (u64, RunSummary)>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryResultAdapter {
    store: Mutex<Store>,
}

impl MemoryResultAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn trade_count(&self) -> usize {
        self.lock().trades.len()
    }

    /// Trades linked to one aggregate row, in open-time order.
    pub fn trades_for(&self, key: &CombinationKey, group: &GroupKey) -> Vec<TradeRecord> {
        self.lock()
            .trades
            .iter()
            .filter(|(((k, g), _, _), _)| k == key && g == group)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

fn row_key(row: &AggregateRow) -> RowKey {
    (
        CombinationKey::new(
            &row.run_id,
            &row.symbol,
            row.strategy_id,
            &row.timeframe,
            &row.risk_profile,
        ),
        row.key,
    )
}

impl ResultPort for MemoryResultAdapter {
    fn is_combination_done(&self, key: &CombinationKey) -> Result<bool, ProbeError> {
        let store = self.lock();
        Ok(store.done.contains(key) || store.rows.keys().any(|(k, _)| k == key))
    }

    fn write_batch(&self, jobs: &[CompletedJob]) -> Result<WriteSummary, ProbeError> {
        let mut store = self.lock();
        let mut summary = WriteSummary::default();
        for job in jobs {
            for row in &job.rows {
                let key = row_key(row);
                if !store.rows.contains_key(&key) {
                    store.rows.insert(key, row.clone());
                    summary.rows_inserted += 1;
                }
            }
            let combination = job.key();
            for trade in &job.trades {
                let key = (
                    (combination.clone(), trade.key),
                    trade.open_timestamp,
                    trade.direction,
                );
                if !store.trades.contains_key(&key) {
                    store.trades.insert(key, trade.clone());
                    summary.trades_inserted += 1;
                }
            }
            if store.done.insert(combination) {
                summary.jobs_marked += 1;
            }
        }
        Ok(summary)
    }

    fn fetch_results(&self, filter: &ResultFilter) -> Result<Vec<AggregateRow>, ProbeError> {
        Ok(self
            .lock()
            .rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    fn save_run(&self, summary: &RunSummary) -> Result<(), ProbeError> {
        let mut store = self.lock();
        let seq = match store.runs.get(&summary.run_id) {
            Some((seq, _)) => *seq,
            None => {
                store.next_seq += 1;
                store.next_seq
            }
        };
        store
            .runs
            .insert(summary.run_id.clone(), (seq, summary.clone()));
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Option<RunSummary>, ProbeError> {
        Ok(self.lock().runs.get(run_id).map(|(_, s)| s.clone()))
    }

    fn list_runs(
        &self,
        status: Option<RunStatus>,
        symbol: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RunSummary>, ProbeError> {
        let store = self.lock();
        let mut runs: Vec<&(u64, RunSummary)> = store
            .runs
            .values()
            .filter(|(_, s)| status.is_none_or(|st| s.status == st))
            .filter(|(_, s)| {
                symbol.is_none_or(|sym| s.symbols.iter().any(|x| x.eq_ignore_ascii_case(sym)))
            })
            .collect();
        runs.sort_by(|a, b| {
            b.1.started_at
                .cmp(&a.1.started_at)
                .then_with(|| b.0.cmp(&a.0))
        });
        let take = if limit == 0 { runs.len() } else { limit };
        Ok(runs.into_iter().take(take).map(|(_, s)| s.clone()).collect())
    }
}
