#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stratprobe::adapters::memory_result_adapter::MemoryResultAdapter;
pub use stratprobe::domain::bar_series::{Bar, BarSeries};
use stratprobe::domain::aggregator::AggregateRow;
use stratprobe::domain::condition_dsl::ConditionNode;
use stratprobe::domain::error::ProbeError;
use stratprobe::domain::job::{CombinationKey, CompletedJob, WriteSummary};
use stratprobe::domain::risk::RiskProfile;
use stratprobe::domain::run_tracker::{RunStatus, RunSummary};
use stratprobe::domain::runner::{RunRequest, RunnerConfig};
use stratprobe::domain::strategy::{StrategyDirection, StrategyRegistry, StrategySpec};
use stratprobe::ports::data_port::DataPort;
use stratprobe::ports::result_port::{ResultFilter, ResultPort};

pub struct MockDataPort {
    pub series: HashMap<(String, String), BarSeries>,
    pub errors: HashMap<String, String>,
    pub fetches: AtomicUsize,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
            errors: HashMap::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_series(mut self, series: BarSeries) -> Self {
        self.series.insert(
            (series.symbol().to_string(), series.timeframe().to_string()),
            series,
        );
        self
    }

    /// Fetching `symbol` fails with a non-data (database) error.
    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl DataPort for MockDataPort {
    fn fetch_series(
        &self,
        symbol: &str,
        timeframe: &str,
        _start_date: NaiveDate,
        _end_date: NaiveDate,
    ) -> Result<BarSeries, ProbeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.errors.get(symbol) {
            return Err(ProbeError::Database {
                reason: reason.clone(),
            });
        }
        self.series
            .get(&(symbol.to_string(), timeframe.to_string()))
            .cloned()
            .ok_or_else(|| ProbeError::NoData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            })
    }

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, ProbeError> {
        let mut symbols: Vec<String> = self
            .series
            .keys()
            .filter(|(_, tf)| tf == timeframe)
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, ProbeError> {
        Ok(self
            .series
            .get(&(symbol.to_string(), timeframe.to_string()))
            .and_then(|s| {
                s.first_timestamp()
                    .zip(s.last_timestamp())
                    .map(|(a, b)| (a.date(), b.date(), s.len()))
            }))
    }
}

/// A result store whose first `failures` batch writes fail with a
/// retryable database error.
pub struct FlakyResultStore {
    pub inner: MemoryResultAdapter,
    failures: AtomicUsize,
    pub write_attempts: AtomicUsize,
}

impl FlakyResultStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryResultAdapter::new(),
            failures: AtomicUsize::new(failures),
            write_attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }
}

impl ResultPort for FlakyResultStore {
    fn is_combination_done(&self, key: &CombinationKey) -> Result<bool, ProbeError> {
        self.inner.is_combination_done(key)
    }

    fn write_batch(&self, jobs: &[CompletedJob]) -> Result<WriteSummary, ProbeError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProbeError::Database {
                reason: "database is locked".into(),
            });
        }
        self.inner.write_batch(jobs)
    }

    fn fetch_results(&self, filter: &ResultFilter) -> Result<Vec<AggregateRow>, ProbeError> {
        self.inner.fetch_results(filter)
    }

    fn save_run(&self, summary: &RunSummary) -> Result<(), ProbeError> {
        self.inner.save_run(summary)
    }

    fn load_run(&self, run_id: &str) -> Result<Option<RunSummary>, ProbeError> {
        self.inner.load_run(run_id)
    }

    fn list_runs(
        &self,
        status: Option<RunStatus>,
        symbol: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RunSummary>, ProbeError> {
        self.inner.list_runs(status, symbol, limit)
    }
}

pub fn ts(hour: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::hours(hour as i64)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(hour: usize, close: f64) -> Bar {
    Bar {
        timestamp: ts(hour),
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1000.0,
    }
}

/// Hourly series from closes with a constant `atr_14` column.
pub fn series_from_closes(symbol: &str, timeframe: &str, closes: &[f64], atr: f64) -> BarSeries {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(i, c))
        .collect();
    let mut indicators = HashMap::new();
    indicators.insert("atr_14".to_string(), vec![atr; closes.len()]);
    BarSeries::new(symbol, timeframe, bars, indicators).unwrap()
}

/// Closes alternating two bars below and two bars above 100.
pub fn zigzag_series(symbol: &str, timeframe: &str, len: usize) -> BarSeries {
    let closes: Vec<f64> = (0..len)
        .map(|i| if i % 4 < 2 { 98.0 } else { 102.0 })
        .collect();
    series_from_closes(symbol, timeframe, &closes, 1.0)
}

pub fn node(value: serde_json::Value) -> ConditionNode {
    serde_json::from_value(value).unwrap()
}

/// Long-only: enter when close crosses above 100, leave after two bars.
pub fn cross_spec(id: u32, name: &str) -> StrategySpec {
    StrategySpec {
        id,
        name: name.into(),
        category: "trend".into(),
        direction: StrategyDirection::LongOnly,
        entry_long: vec![node(serde_json::json!({
            "op": "crosses_above", "col": "close", "ref": {"value": 100.0}
        }))],
        time_stop_bars: 2,
        ..Default::default()
    }
}

/// Same entry as [`cross_spec`] but needs an indicator no fixture provides.
pub fn rsi_spec(id: u32, name: &str) -> StrategySpec {
    StrategySpec {
        required_indicators: vec!["rsi_14".into()],
        ..cross_spec(id, name)
    }
}

pub fn registry(specs: &[StrategySpec]) -> Arc<StrategyRegistry> {
    Arc::new(StrategyRegistry::from_specs(specs).unwrap())
}

pub fn catalog_json(specs: &[StrategySpec]) -> String {
    serde_json::json!({ "strategies": specs }).to_string()
}

pub fn fast_config() -> RunnerConfig {
    RunnerConfig {
        workers: 4,
        channel_capacity: 4,
        batch_size: 3,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(4),
        progress_every: 1000,
        persist_trades: true,
        ..Default::default()
    }
}

pub fn request(symbols: &[&str], risks: &[RiskProfile]) -> RunRequest {
    let mut req = RunRequest::new(
        symbols.iter().map(|s| s.to_string()).collect(),
        vec!["1Hour".into()],
        date(2024, 1, 1),
        date(2024, 3, 1),
    );
    req.risk_profiles = risks.to_vec();
    req
}
