//! Parallel runner: fans (strategy, risk) jobs out over shared bar series and
//! funnels completed jobs through a bounded channel into batched writes.
//!
//! Each (symbol, timeframe) series is loaded once and shared read-only by
//! every job that needs it. Workers run on a dedicated rayon pool; a single
//! collector thread drains results, groups them into batches and flushes
//! them through the [`ResultPort`] with bounded exponential backoff. A job
//! only counts as completed once its batch is durably written.

use crate::domain::aggregator::{aggregate_trades, build_trade_records, JobContext};
use crate::domain::bar_series::BarSeries;
use crate::domain::cancel::CancelToken;
use crate::domain::config_validation::{parse_date, validate_run_config, validate_runner_config};
use crate::domain::engine::SimulationEngine;
use crate::domain::error::{ErrorCategory, ProbeError};
use crate::domain::job::{CombinationKey, CompletedJob, WriteSummary};
use crate::domain::risk::RiskProfile;
use crate::domain::run_tracker::{JobCounts, JobStatus, RunStatus, RunTracker};
use crate::domain::strategy::{StrategyDefinition, StrategyRegistry};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::result_port::ResultPort;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tuning for the worker pool, result channel and persistence retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Worker threads; 0 means available cores x 2.
    pub workers: usize,
    pub channel_capacity: usize,
    pub batch_size: usize,
    pub max_persist_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Wall-clock budget for the whole run.
    pub deadline: Option<Duration>,
    pub min_bars: usize,
    pub persist_trades: bool,
    pub progress_every: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            channel_capacity: 64,
            batch_size: 16,
            max_persist_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(2000),
            deadline: None,
            min_bars: 2,
            persist_trades: false,
            progress_every: 50,
        }
    }
}

impl RunnerConfig {
    /// Read the `[runner]` section, falling back to defaults for absent keys.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ProbeError> {
        validate_runner_config(config)?;
        let d = Self::default();
        let int = |key: &str, default: usize| {
            config.get_int("runner", key, default as i64).max(0) as usize
        };
        let deadline_secs = config.get_int("runner", "deadline_secs", 0).max(0) as u64;
        Ok(Self {
            workers: int("workers", d.workers),
            channel_capacity: int("channel_capacity", d.channel_capacity),
            batch_size: int("batch_size", d.batch_size),
            max_persist_attempts: int("max_persist_attempts", d.max_persist_attempts as usize)
                as u32,
            backoff_base: Duration::from_millis(
                int("backoff_base_ms", d.backoff_base.as_millis() as usize) as u64,
            ),
            backoff_max: Duration::from_millis(
                int("backoff_max_ms", d.backoff_max.as_millis() as usize) as u64,
            ),
            deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
            min_bars: int("min_bars", d.min_bars),
            persist_trades: config.get_bool("runner", "persist_trades", d.persist_trades),
            progress_every: int("progress_every", d.progress_every),
        })
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(2)
    }

    /// Sleep before retry number `attempt + 1`: `min(base * 2^attempt, max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.backoff_max)
    }
}

/// What to simulate: every strategy against every (symbol, timeframe) at
/// every risk profile over `[start, end]`.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub risk_profiles: Vec<RiskProfile>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Reuse an earlier run id to resume it.
    pub run_id: Option<String>,
    /// Subset of strategy ids; empty means the whole registry.
    pub strategy_ids: Vec<u32>,
}

impl RunRequest {
    pub fn new(symbols: Vec<String>, timeframes: Vec<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            symbols,
            timeframes,
            risk_profiles: vec![RiskProfile::medium()],
            start,
            end,
            run_id: None,
            strategy_ids: Vec::new(),
        }
    }

    /// Build a request from the `[run]` section and any `[risk.<name>]` sections.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ProbeError> {
        validate_run_config(config)?;
        let symbols = config.get_list("run", "symbols").unwrap_or_default();
        let timeframes = config.get_list("run", "timeframes").unwrap_or_default();
        let risk_names = config
            .get_list("run", "risk_profiles")
            .unwrap_or_else(|| vec!["medium".to_string()]);
        let risk_profiles = risk_names
            .iter()
            .map(|name| RiskProfile::from_config(config, name))
            .collect::<Result<Vec<_>, _>>()?;
        let start = parse_date(config.get_string("run", "start_date").as_deref(), "start_date")?;
        let end = parse_date(config.get_string("run", "end_date").as_deref(), "end_date")?;
        Ok(Self {
            symbols,
            timeframes,
            risk_profiles,
            start,
            end,
            run_id: None,
            strategy_ids: Vec::new(),
        })
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        let invalid = |key: &str, reason: &str| ProbeError::ConfigInvalid {
            section: "run".to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.symbols.iter().all(|s| s.trim().is_empty()) {
            return Err(invalid("symbols", "at least one symbol is required"));
        }
        if self.timeframes.iter().all(|t| t.trim().is_empty()) {
            return Err(invalid("timeframes", "at least one timeframe is required"));
        }
        if self.risk_profiles.is_empty() {
            return Err(invalid("risk_profiles", "at least one risk profile is required"));
        }
        if self.start >= self.end {
            return Err(invalid("start_date", "start_date must be before end_date"));
        }
        if let Some(id) = &self.run_id {
            if id.trim().is_empty() || id.contains('/') {
                return Err(invalid("run_id", "run_id must be non-empty and contain no '/'"));
            }
        }
        Ok(())
    }

    fn risk_names(&self) -> Vec<String> {
        self.risk_profiles.iter().map(|r| r.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    PartiallySucceeded,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        self.status().as_str()
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Succeeded => RunStatus::Succeeded,
            RunOutcome::PartiallySucceeded => RunStatus::PartiallySucceeded,
        }
    }
}

/// A combination that did not complete, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub key: CombinationKey,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub counts: JobCounts,
    pub failures: Vec<JobFailure>,
    pub failed_batches: usize,
    pub total_trades: usize,
    pub written: WriteSummary,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

/// Generate a short run id: the first 8 hex characters of a v4 UUID.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

struct Job {
    key: CombinationKey,
    context: JobContext,
    strategy: Arc<StrategyDefinition>,
    risk: RiskProfile,
    series: Arc<BarSeries>,
}

enum JobMessage {
    Done(CompletedJob),
    Failed { key: CombinationKey, reason: String },
    Cancelled(CombinationKey),
}

#[derive(Default)]
struct CollectorOutcome {
    written: WriteSummary,
    failed_batches: usize,
}

pub struct ParallelRunner {
    registry: Arc<StrategyRegistry>,
    data: Arc<dyn DataPort + Send + Sync>,
    store: Arc<dyn ResultPort + Send + Sync>,
    tracker: Arc<RunTracker>,
    config: RunnerConfig,
    cancel: CancelToken,
}

impl ParallelRunner {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        data: Arc<dyn DataPort + Send + Sync>,
        store: Arc<dyn ResultPort + Send + Sync>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            data,
            store,
            tracker: Arc::new(RunTracker::new()),
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Share an existing tracker instead of the runner's own.
    pub fn with_tracker(mut self, tracker: Arc<RunTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Handle that cancels every job of the current and later runs.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every combination of `request` and wait for the collector to drain.
    ///
    /// Returns `Err` only for run-level failures (invalid request, unknown
    /// strategy, pool start-up); per-job problems are reported in the
    /// returned [`RunReport`].
    pub fn submit(&self, request: &RunRequest) -> Result<RunReport, ProbeError> {
        let started = Instant::now();
        let run_id = request.run_id.clone().unwrap_or_else(new_run_id);
        let span = tracing::info_span!("run", run_id = %run_id);
        let _enter = span.enter();

        self.tracker
            .start_run(&run_id, &request.symbols, &request.timeframes, &request.risk_names());

        let strategies = match self.resolve(request) {
            Ok(strategies) => strategies,
            Err(err) => return Err(self.abort(&run_id, err)),
        };

        let jobs = self.plan_jobs(&run_id, request, &strategies);
        let workers = self.config.effective_workers();
        info!(
            jobs = jobs.len(),
            strategies = strategies.len(),
            risk_profiles = request.risk_profiles.len(),
            workers,
            "run started"
        );

        let token = match self.config.deadline {
            Some(deadline) => self.cancel.with_timeout(deadline),
            None => self.cancel.clone(),
        };
        let collected = match self.execute(&run_id, &jobs, workers, &token) {
            Ok(collected) => collected,
            Err(err) => return Err(self.abort(&run_id, err)),
        };

        let counts = self.tracker.counts(&run_id).unwrap_or_default();
        let outcome = if counts.completed + counts.resumed == counts.submitted {
            RunOutcome::Succeeded
        } else {
            RunOutcome::PartiallySucceeded
        };
        let cancelled = token.is_cancelled();
        let message = cancelled.then(|| "cancelled before all jobs finished".to_string());
        let summary = self.tracker.finish_run(&run_id, outcome.status(), message);
        info!(
            outcome = outcome.as_str(),
            completed = counts.completed,
            resumed = counts.resumed,
            data_skipped = counts.data_skipped,
            failed = counts.failed,
            cancelled = counts.cancelled,
            failed_batches = collected.failed_batches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        if let Some(summary) = &summary {
            if let Err(err) = self.with_retry(|| self.store.save_run(summary)) {
                warn!(error = %err, "could not persist run summary");
            }
        }

        let failures = self
            .tracker
            .get_run(&run_id)
            .map(|snap| {
                snap.jobs
                    .into_iter()
                    .filter(|(_, job)| {
                        matches!(
                            job.status,
                            JobStatus::Failed | JobStatus::DataSkipped | JobStatus::Cancelled
                        )
                    })
                    .map(|(key, job)| JobFailure {
                        key,
                        status: job.status,
                        message: job.error.unwrap_or_else(|| job.status.as_str().to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(RunReport {
            run_id,
            outcome,
            counts,
            failures,
            failed_batches: collected.failed_batches,
            total_trades: summary.map(|s| s.total_trades).unwrap_or(0),
            written: collected.written,
            cancelled,
            elapsed: started.elapsed(),
        })
    }

    fn resolve(&self, request: &RunRequest) -> Result<Vec<Arc<StrategyDefinition>>, ProbeError> {
        request.validate()?;
        let strategies = self.registry.select(&request.strategy_ids)?;
        if strategies.is_empty() {
            return Err(ProbeError::DefinitionInvalid {
                strategy: "catalog".to_string(),
                reason: "no strategies to run".to_string(),
            });
        }
        Ok(strategies)
    }

    /// Close the run as fatal and hand the error back.
    fn abort(&self, run_id: &str, err: ProbeError) -> ProbeError {
        error!(error = %err, "run aborted");
        if let Some(summary) = self
            .tracker
            .finish_run(run_id, RunStatus::Fatal, Some(err.to_string()))
        {
            if let Err(save_err) = self.with_retry(|| self.store.save_run(&summary)) {
                warn!(error = %save_err, "could not persist run summary");
            }
        }
        err
    }

    /// Register every combination and return those that still need simulating.
    fn plan_jobs(
        &self,
        run_id: &str,
        request: &RunRequest,
        strategies: &[Arc<StrategyDefinition>],
    ) -> Vec<Job> {
        let mut jobs = Vec::new();
        for symbol in &request.symbols {
            for timeframe in &request.timeframes {
                let keys_for = |strategy: &StrategyDefinition| -> Vec<CombinationKey> {
                    request
                        .risk_profiles
                        .iter()
                        .map(|risk| {
                            CombinationKey::new(run_id, symbol, strategy.id, timeframe, &risk.name)
                        })
                        .collect()
                };

                let series = match self.data.fetch_series(symbol, timeframe, request.start, request.end) {
                    Ok(series) => Arc::new(series),
                    Err(err) => {
                        let reason = err.to_string();
                        warn!(symbol = %symbol, timeframe = %timeframe, error = %reason, "series unavailable");
                        for key in strategies.iter().flat_map(|s| keys_for(s)) {
                            self.tracker.register_job(&key);
                            if err.category() == ErrorCategory::Data {
                                self.tracker.mark_data_skipped(&key, &reason);
                            } else {
                                self.tracker.mark_failed(&key, &reason);
                            }
                        }
                        continue;
                    }
                };
                info!(symbol = %symbol, timeframe = %timeframe, bars = series.len(), "series loaded");

                let period_start = series.first_timestamp().unwrap_or_default();
                let period_end = series.last_timestamp().unwrap_or_default();

                for strategy in strategies {
                    let requirement = series
                        .check_requirements(strategy.required_indicators(), self.config.min_bars);
                    for (key, risk) in keys_for(strategy).into_iter().zip(&request.risk_profiles) {
                        self.tracker.register_job(&key);
                        if let Err(err) = &requirement {
                            warn!(combination = %key, error = %err, "data skip");
                            self.tracker.mark_data_skipped(&key, &err.to_string());
                            continue;
                        }
                        match self.store.is_combination_done(&key) {
                            Ok(true) => {
                                debug!(combination = %key, "already persisted, resuming past it");
                                self.tracker.mark_resumed(&key);
                                continue;
                            }
                            Ok(false) => {}
                            Err(err) => {
                                error!(combination = %key, error = %err, "resume check failed");
                                self.tracker
                                    .mark_failed(&key, &format!("resume check failed: {err}"));
                                continue;
                            }
                        }
                        jobs.push(Job {
                            context: JobContext {
                                run_id: run_id.to_string(),
                                symbol: key.symbol.clone(),
                                strategy_id: strategy.id,
                                timeframe: key.timeframe.clone(),
                                risk_profile: risk.name.clone(),
                                period_start,
                                period_end,
                            },
                            key,
                            strategy: Arc::clone(strategy),
                            risk: risk.clone(),
                            series: Arc::clone(&series),
                        });
                    }
                }
            }
        }
        jobs
    }

    fn execute(
        &self,
        run_id: &str,
        jobs: &[Job],
        workers: usize,
        token: &CancelToken,
    ) -> Result<CollectorOutcome, ProbeError> {
        if jobs.is_empty() {
            return Ok(CollectorOutcome::default());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("probe-worker-{i}"))
            .build()
            .map_err(|e| ProbeError::Io(std::io::Error::other(e)))?;
        let (tx, rx) = mpsc::sync_channel::<JobMessage>(self.config.channel_capacity.max(1));
        let total = jobs.len();

        thread::scope(|scope| {
            let collector = scope.spawn(move || self.collect(run_id, rx, total));
            pool.install(|| {
                jobs.par_iter().for_each_with(tx, |tx, job| {
                    let message = self.run_job(job, token);
                    // The collector only hangs up if it died; nothing left to report to.
                    let _ = tx.send(message);
                });
            });
            collector.join().map_err(|payload| ProbeError::SimulationFailure {
                combination: run_id.to_string(),
                reason: format!("result collector panicked: {}", panic_message(&*payload)),
            })
        })
    }

    fn run_job(&self, job: &Job, token: &CancelToken) -> JobMessage {
        let span = tracing::debug_span!(
            "probe_job",
            strategy = job.strategy.id,
            symbol = %job.key.symbol,
            timeframe = %job.key.timeframe,
            risk = %job.risk.name,
        );
        let _enter = span.enter();

        if token.is_cancelled() {
            return JobMessage::Cancelled(job.key.clone());
        }
        self.tracker.mark_running(&job.key);

        match panic::catch_unwind(AssertUnwindSafe(|| self.simulate(job, token))) {
            Ok(Ok(done)) => JobMessage::Done(done),
            Ok(Err(ProbeError::Cancelled)) => JobMessage::Cancelled(job.key.clone()),
            Ok(Err(err)) => JobMessage::Failed {
                key: job.key.clone(),
                reason: err.to_string(),
            },
            Err(payload) => JobMessage::Failed {
                key: job.key.clone(),
                reason: ProbeError::SimulationFailure {
                    combination: job.key.to_string(),
                    reason: panic_message(&*payload),
                }
                .to_string(),
            },
        }
    }

    fn simulate(&self, job: &Job, token: &CancelToken) -> Result<CompletedJob, ProbeError> {
        let engine = SimulationEngine::new(Arc::clone(&job.strategy), job.risk.clone());
        let trades = engine.run(&job.series, token)?;
        let rows = aggregate_trades(&trades, &job.context);
        let records = if self.config.persist_trades {
            build_trade_records(&trades, &job.context.symbol)
        } else {
            Vec::new()
        };
        debug!(trades = trades.len(), groups = rows.len(), "job simulated");
        Ok(CompletedJob {
            context: job.context.clone(),
            rows,
            trades: records,
            trade_count: trades.len(),
        })
    }

    fn collect(&self, run_id: &str, rx: Receiver<JobMessage>, total: usize) -> CollectorOutcome {
        let mut outcome = CollectorOutcome::default();
        let batch_size = self.config.batch_size.max(1);
        let mut batch: Vec<CompletedJob> = Vec::with_capacity(batch_size);
        let mut received = 0usize;

        for message in rx {
            received += 1;
            match message {
                JobMessage::Done(job) => {
                    batch.push(job);
                    if batch.len() >= batch_size {
                        self.flush(run_id, &mut batch, &mut outcome);
                    }
                }
                JobMessage::Failed { key, reason } => {
                    error!(combination = %key, error = %reason, "job failed");
                    self.tracker.mark_failed(&key, &reason);
                }
                JobMessage::Cancelled(key) => {
                    debug!(combination = %key, "job cancelled");
                    self.tracker.mark_cancelled(&key);
                }
            }
            if self.config.progress_every > 0 && received % self.config.progress_every == 0 {
                info!(
                    received,
                    total,
                    percent = self.tracker.progress_percent(run_id).unwrap_or(0.0),
                    eta_secs = ?self.tracker.eta_secs(run_id),
                    "progress"
                );
            }
        }
        if !batch.is_empty() {
            self.flush(run_id, &mut batch, &mut outcome);
        }
        outcome
    }

    fn flush(&self, run_id: &str, batch: &mut Vec<CompletedJob>, outcome: &mut CollectorOutcome) {
        let jobs = std::mem::take(batch);
        match self.with_retry(|| self.store.write_batch(&jobs)) {
            Ok(summary) => {
                for job in &jobs {
                    self.tracker.mark_completed(&job.key(), job.trade_count);
                }
                outcome.written += summary;
                debug!(
                    jobs = jobs.len(),
                    rows = summary.rows_inserted,
                    trades = summary.trades_inserted,
                    "batch flushed"
                );
            }
            Err(err) => {
                error!(jobs = jobs.len(), error = %err, "batch dropped");
                self.tracker.add_failed_batch(run_id);
                outcome.failed_batches += 1;
                let reason = err.to_string();
                for job in &jobs {
                    self.tracker.mark_failed(&job.key(), &reason);
                }
            }
        }
    }

    /// Retry transient persistence failures with capped exponential backoff.
    fn with_retry<T>(
        &self,
        mut op: impl FnMut() -> Result<T, ProbeError>,
    ) -> Result<T, ProbeError> {
        let max_attempts = self.config.max_persist_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "persistence failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(ProbeError::PersistenceExhausted {
                        attempts: attempt + 1,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::adapters::memory_result_adapter::MemoryResultAdapter;
    use crate::domain::bar_series::Bar;
    use crate::domain::condition_dsl::ConditionNode;
    use crate::domain::strategy::{StrategyDirection, StrategySpec};
    use crate::ports::result_port::ResultFilter;
    use chrono::NaiveDateTime;
    use std::collections::HashMap;

    struct MapData {
        series: HashMap<(String, String), BarSeries>,
    }

    impl DataPort for MapData {
        fn fetch_series(
            &self,
            symbol: &str,
            timeframe: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<BarSeries, ProbeError> {
            self.series
                .get(&(symbol.to_string(), timeframe.to_string()))
                .cloned()
                .ok_or_else(|| ProbeError::NoData {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                })
        }

        fn list_symbols(&self, _timeframe: &str) -> Result<Vec<String>, ProbeError> {
            Ok(self.series.keys().map(|(s, _)| s.clone()).collect())
        }

        fn get_data_range(
            &self,
            _symbol: &str,
            _timeframe: &str,
        ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, ProbeError> {
            Ok(None)
        }
    }

    fn ts(i: usize) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::hours(i as i64)
    }

    /// Closes oscillating across 100 so the cross strategy trades repeatedly.
    fn zigzag(symbol: &str) -> BarSeries {
        let closes: Vec<f64> = (0..40)
            .map(|i| if i % 4 < 2 { 98.0 } else { 102.0 })
            .collect();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: ts(i),
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 10.0,
            })
            .collect();
        let mut ind = HashMap::new();
        ind.insert("atr_14".to_string(), vec![1.0; closes.len()]);
        BarSeries::new(symbol, "1Hour", bars, ind).unwrap()
    }

    fn cross_spec(id: u32, name: &str) -> StrategySpec {
        let node: ConditionNode = serde_json::from_value(serde_json::json!({
            "op": "crosses_above", "col": "close", "ref": {"value": 100.0}
        }))
        .unwrap();
        StrategySpec {
            id,
            name: name.into(),
            category: "trend".into(),
            direction: StrategyDirection::LongOnly,
            entry_long: vec![node],
            time_stop_bars: 2,
            ..Default::default()
        }
    }

    fn runner(store: Arc<MemoryResultAdapter>, config: RunnerConfig) -> ParallelRunner {
        let registry =
            StrategyRegistry::from_specs(&[cross_spec(1, "cross_a"), cross_spec(2, "cross_b")])
                .unwrap();
        let mut series = HashMap::new();
        series.insert(("AAPL".to_string(), "1Hour".to_string()), zigzag("AAPL"));
        series.insert(("MSFT".to_string(), "1Hour".to_string()), zigzag("MSFT"));
        ParallelRunner::new(Arc::new(registry), Arc::new(MapData { series }), store, config)
    }

    fn request(symbols: &[&str]) -> RunRequest {
        let mut req = RunRequest::new(
            symbols.iter().map(|s| s.to_string()).collect(),
            vec!["1Hour".into()],
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        );
        req.risk_profiles = vec![RiskProfile::low(), RiskProfile::high()];
        req
    }

    fn small_config() -> RunnerConfig {
        RunnerConfig {
            workers: 2,
            batch_size: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(2),
            ..Default::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RunnerConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(1600));
        assert_eq!(config.backoff(5), Duration::from_millis(2000));
        assert_eq!(config.backoff(40), Duration::from_millis(2000));
    }

    #[test]
    fn runner_config_reads_section() {
        let config = FileConfigAdapter::from_string(
            "[runner]\nworkers = 3\nbatch_size = 5\ndeadline_secs = 30\npersist_trades = true\n",
        )
        .unwrap();
        let rc = RunnerConfig::from_config(&config).unwrap();
        assert_eq!(rc.workers, 3);
        assert_eq!(rc.effective_workers(), 3);
        assert_eq!(rc.batch_size, 5);
        assert_eq!(rc.channel_capacity, 64);
        assert_eq!(rc.deadline, Some(Duration::from_secs(30)));
        assert!(rc.persist_trades);
    }

    #[test]
    fn trade_rows_are_off_unless_enabled() {
        let config = FileConfigAdapter::from_string("[runner]\nworkers = 2\n").unwrap();
        assert!(!RunnerConfig::from_config(&config).unwrap().persist_trades);
        assert!(!RunnerConfig::default().persist_trades);
    }

    #[test]
    fn auto_workers_is_positive() {
        assert!(RunnerConfig::default().effective_workers() >= 2);
    }

    #[test]
    fn request_from_config_resolves_risk_profiles() {
        let config = FileConfigAdapter::from_string(
            "[run]\nsymbols = AAPL\ntimeframes = 1Day, 1Hour\nrisk_profiles = low, wide\nstart_date = 2024-01-01\nend_date = 2024-03-01\n[risk.wide]\nstop_scale = 3.0\n",
        )
        .unwrap();
        let req = RunRequest::from_config(&config).unwrap();
        assert_eq!(req.timeframes, vec!["1Day", "1Hour"]);
        assert_eq!(req.risk_profiles.len(), 2);
        assert_eq!(req.risk_profiles[1].name, "wide");
        assert_eq!(req.risk_profiles[1].stop_scale, 3.0);
    }

    #[test]
    fn request_validation_rejects_bad_ranges() {
        let mut req = request(&["AAPL"]);
        req.end = req.start;
        assert!(matches!(
            req.validate(),
            Err(ProbeError::ConfigInvalid { key, .. }) if key == "start_date"
        ));
        let mut req = request(&[]);
        req.symbols.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn run_ids_are_short_hex() {
        let id = new_run_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_run_id());
    }

    #[test]
    fn submit_completes_every_combination() {
        let store = Arc::new(MemoryResultAdapter::new());
        let r = runner(Arc::clone(&store), small_config());
        let report = r.submit(&request(&["AAPL", "MSFT"])).unwrap();

        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert_eq!(report.counts.submitted, 8);
        assert_eq!(report.counts.completed, 8);
        assert!(report.failures.is_empty());
        assert!(report.total_trades > 0);
        assert_eq!(report.written.jobs_marked, 8);

        let rows = store.fetch_results(&ResultFilter::for_run(&report.run_id)).unwrap();
        let counted: u32 = rows.iter().map(|r| r.trade_count).sum();
        assert_eq!(counted as usize, report.total_trades);

        let saved = store.load_run(&report.run_id).unwrap().unwrap();
        assert_eq!(saved.status, RunStatus::Succeeded);
    }

    #[test]
    fn resubmitting_same_run_resumes_without_new_rows() {
        let store = Arc::new(MemoryResultAdapter::new());
        let r = runner(Arc::clone(&store), small_config());
        let first = r.submit(&request(&["AAPL"])).unwrap();
        let before = store.fetch_results(&ResultFilter::for_run(&first.run_id)).unwrap();

        let mut again = request(&["AAPL"]);
        again.run_id = Some(first.run_id.clone());
        let second = r.submit(&again).unwrap();
        let after = store.fetch_results(&ResultFilter::for_run(&first.run_id)).unwrap();

        assert_eq!(second.outcome, RunOutcome::Succeeded);
        assert_eq!(second.counts.resumed, 4);
        assert_eq!(second.counts.completed, 0);
        assert_eq!(second.written, WriteSummary::default());
        assert_eq!(before, after);
    }

    #[test]
    fn missing_series_is_a_data_skip_and_partial() {
        let store = Arc::new(MemoryResultAdapter::new());
        let r = runner(store, small_config());
        let report = r.submit(&request(&["AAPL", "NVDA"])).unwrap();
        assert_eq!(report.outcome, RunOutcome::PartiallySucceeded);
        assert_eq!(report.counts.completed, 4);
        assert_eq!(report.counts.data_skipped, 4);
        assert!(report
            .failures
            .iter()
            .all(|f| f.key.symbol == "NVDA" && f.status == JobStatus::DataSkipped));
    }

    #[test]
    fn unknown_strategy_is_fatal() {
        let store = Arc::new(MemoryResultAdapter::new());
        let r = runner(Arc::clone(&store), small_config());
        let mut req = request(&["AAPL"]);
        req.strategy_ids = vec![1, 99];
        req.run_id = Some("fatal01".into());
        let err = r.submit(&req).unwrap_err();
        assert!(matches!(err, ProbeError::UnknownStrategy { id: 99 }));
        let saved = store.load_run("fatal01").unwrap().unwrap();
        assert_eq!(saved.status, RunStatus::Fatal);
        assert_eq!(saved.counts.submitted, 0);
    }

    #[test]
    fn pre_cancelled_run_cancels_every_job() {
        let store = Arc::new(MemoryResultAdapter::new());
        let r = runner(Arc::clone(&store), small_config());
        r.cancel_handle().cancel();
        let report = r.submit(&request(&["AAPL"])).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.outcome, RunOutcome::PartiallySucceeded);
        assert_eq!(report.counts.cancelled, 4);
        assert!(store.fetch_results(&ResultFilter::for_run(&report.run_id)).unwrap().is_empty());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 7");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");
    }
}
