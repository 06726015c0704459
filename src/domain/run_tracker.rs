//! In-process run and job state.
//!
//! The tracker is constructed explicitly and shared by reference; there is no
//! global instance. Snapshots returned from queries are copies.

use crate::domain::job::CombinationKey;
use chrono::{NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    PartiallySucceeded,
    Fatal,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallySucceeded => "partially_succeeded",
            RunStatus::Fatal => "fatal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "partially_succeeded" => Some(RunStatus::PartiallySucceeded),
            "fatal" => Some(RunStatus::Fatal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Resumed,
    DataSkipped,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Resumed => "resumed",
            JobStatus::DataSkipped => "data_skipped",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub status: JobStatus,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub trade_count: usize,
    pub error: Option<String>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            status: JobStatus::Pending,
            started_at: None,
            ended_at: None,
            trade_count: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub submitted: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub resumed: usize,
    pub data_skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobCounts {
    pub fn finished(&self) -> usize {
        self.completed + self.resumed + self.data_skipped + self.failed + self.cancelled
    }

    fn record(&mut self, status: JobStatus) {
        self.submitted += 1;
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Resumed => self.resumed += 1,
            JobStatus::DataSkipped => self.data_skipped += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Persistable summary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub risk_profiles: Vec<String>,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub counts: JobCounts,
    pub total_trades: usize,
    pub failed_batches: usize,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub summary: RunSummary,
    pub jobs: Vec<(CombinationKey, JobState)>,
    pub progress_percent: f64,
    pub elapsed_secs: f64,
    pub eta_secs: Option<f64>,
}

struct RunEntry {
    summary: RunSummary,
    started: Instant,
    finished: Option<Instant>,
    jobs: BTreeMap<CombinationKey, JobState>,
}

impl RunEntry {
    fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in self.jobs.values() {
            counts.record(job.status);
        }
        counts
    }

    fn elapsed_secs(&self) -> f64 {
        self.finished
            .unwrap_or_else(Instant::now)
            .duration_since(self.started)
            .as_secs_f64()
    }

    fn progress_percent(&self, counts: &JobCounts) -> f64 {
        if counts.submitted == 0 {
            return 0.0;
        }
        counts.finished() as f64 * 100.0 / counts.submitted as f64
    }

    fn eta_secs(&self, counts: &JobCounts) -> Option<f64> {
        let done = counts.finished();
        let remaining = counts.pending + counts.running;
        if done == 0 || remaining == 0 || self.finished.is_some() {
            return None;
        }
        Some(self.elapsed_secs() / done as f64 * remaining as f64)
    }

    fn snapshot(&self) -> RunSnapshot {
        let counts = self.counts();
        let mut summary = self.summary.clone();
        summary.counts = counts;
        RunSnapshot {
            progress_percent: self.progress_percent(&counts),
            elapsed_secs: self.elapsed_secs(),
            eta_secs: self.eta_secs(&counts),
            jobs: self
                .jobs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            summary,
        }
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[derive(Default)]
pub struct RunTracker {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<R>(&self, run_id: &str, f: impl FnOnce(&mut RunEntry) -> R) -> Option<R> {
        let mut runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match runs.get_mut(run_id) {
            Some(entry) => Some(f(entry)),
            None => {
                tracing::warn!(run_id, "run not tracked");
                None
            }
        }
    }

    pub fn start_run(
        &self,
        run_id: &str,
        symbols: &[String],
        timeframes: &[String],
        risk_profiles: &[String],
    ) {
        let entry = RunEntry {
            summary: RunSummary {
                run_id: run_id.to_string(),
                status: RunStatus::Running,
                symbols: symbols.to_vec(),
                timeframes: timeframes.to_vec(),
                risk_profiles: risk_profiles.to_vec(),
                started_at: now(),
                finished_at: None,
                counts: JobCounts::default(),
                total_trades: 0,
                failed_batches: 0,
                message: None,
            },
            started: Instant::now(),
            finished: None,
            jobs: BTreeMap::new(),
        };
        let mut runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        runs.insert(run_id.to_string(), entry);
    }

    pub fn register_job(&self, key: &CombinationKey) {
        self.with_run(&key.run_id, |run| {
            run.jobs.entry(key.clone()).or_default();
        });
    }

    fn update_job(&self, key: &CombinationKey, f: impl FnOnce(&mut JobState)) {
        self.with_run(&key.run_id, |run| {
            let job = run.jobs.entry(key.clone()).or_default();
            f(job);
        });
    }

    pub fn mark_running(&self, key: &CombinationKey) {
        self.update_job(key, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(now());
        });
    }

    pub fn mark_completed(&self, key: &CombinationKey, trade_count: usize) {
        self.update_job(key, |job| {
            job.status = JobStatus::Completed;
            job.ended_at = Some(now());
            job.trade_count = trade_count;
        });
    }

    pub fn mark_resumed(&self, key: &CombinationKey) {
        self.finish_job(key, JobStatus::Resumed, None);
    }

    pub fn mark_data_skipped(&self, key: &CombinationKey, reason: &str) {
        self.finish_job(key, JobStatus::DataSkipped, Some(reason));
    }

    pub fn mark_failed(&self, key: &CombinationKey, reason: &str) {
        self.finish_job(key, JobStatus::Failed, Some(reason));
    }

    pub fn mark_cancelled(&self, key: &CombinationKey) {
        self.finish_job(key, JobStatus::Cancelled, None);
    }

    fn finish_job(&self, key: &CombinationKey, status: JobStatus, error: Option<&str>) {
        self.update_job(key, |job| {
            job.status = status;
            job.ended_at = Some(now());
            job.error = error.map(str::to_string);
        });
    }

    pub fn add_failed_batch(&self, run_id: &str) {
        self.with_run(run_id, |run| run.summary.failed_batches += 1);
    }

    /// Close the run with its final status and return the finished summary.
    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        message: Option<String>,
    ) -> Option<RunSummary> {
        self.with_run(run_id, |run| {
            let counts = run.counts();
            run.finished = Some(Instant::now());
            run.summary.status = status;
            run.summary.finished_at = Some(now());
            run.summary.counts = counts;
            run.summary.total_trades = run.jobs.values().map(|j| j.trade_count).sum();
            run.summary.message = message;
            tracing::info!(
                run_id,
                status = status.as_str(),
                completed = counts.completed,
                resumed = counts.resumed,
                failed = counts.failed,
                elapsed_secs = run.elapsed_secs(),
                "run finished"
            );
            run.summary.clone()
        })
    }

    pub fn job_status(&self, key: &CombinationKey) -> Option<JobStatus> {
        self.with_run(&key.run_id, |run| run.jobs.get(key).map(|j| j.status))
            .flatten()
    }

    pub fn counts(&self, run_id: &str) -> Option<JobCounts> {
        self.with_run(run_id, |run| run.counts())
    }

    pub fn progress_percent(&self, run_id: &str) -> Option<f64> {
        self.with_run(run_id, |run| run.progress_percent(&run.counts()))
    }

    pub fn eta_secs(&self, run_id: &str) -> Option<f64> {
        self.with_run(run_id, |run| run.eta_secs(&run.counts()))
            .flatten()
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunSnapshot> {
        self.with_run(run_id, |run| run.snapshot())
    }

    /// Runs newest first, optionally filtered by status and symbol.
    pub fn list_runs(
        &self,
        status: Option<RunStatus>,
        symbol: Option<&str>,
        limit: usize,
    ) -> Vec<RunSummary> {
        let runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out: Vec<(Instant, RunSummary)> = runs
            .values()
            .filter(|r| status.is_none_or(|s| r.summary.status == s))
            .filter(|r| {
                symbol.is_none_or(|sym| r.summary.symbols.iter().any(|s| s.eq_ignore_ascii_case(sym)))
            })
            .map(|r| {
                let mut summary = r.summary.clone();
                summary.counts = r.counts();
                (r.started, summary)
            })
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0));
        let iter = out.into_iter().map(|(_, s)| s);
        if limit > 0 {
            iter.take(limit).collect()
        } else {
            iter.collect()
        }
    }
}
