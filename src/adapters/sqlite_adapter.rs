//! SQLite bar store and result store.
//!
//! Bars and indicator values feed [`DataPort`]; aggregate rows, trade rows,
//! completion markers and run summaries back [`ResultPort`]. Every result
//! insert is `ON CONFLICT DO NOTHING` on its natural key, so replaying a
//! batch never double-counts.

use crate::domain::aggregator::{AggregateRow, GroupKey};
use crate::domain::bar_series::{Bar, BarSeries};
use crate::domain::error::ProbeError;
use crate::domain::job::{CombinationKey, CompletedJob, WriteSummary};
use crate::domain::run_tracker::{JobCounts, RunStatus, RunSummary};
use crate::domain::strategy::Direction;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::result_port::{ResultFilter, ResultPort};
use chrono::{NaiveDate, NaiveDateTime};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use rusqlite::types::Type;
use std::collections::HashMap;
use std::path::Path;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RUN_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bars (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    ts TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    PRIMARY KEY (symbol, timeframe, ts)
);
CREATE TABLE IF NOT EXISTS indicator_values (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    ts TEXT NOT NULL,
    name TEXT NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (symbol, timeframe, ts, name)
);
CREATE TABLE IF NOT EXISTS probe_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    strategy_id INTEGER NOT NULL,
    timeframe TEXT NOT NULL,
    risk_profile TEXT NOT NULL,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    open_day TEXT NOT NULL,
    open_hour INTEGER NOT NULL,
    direction TEXT NOT NULL,
    trade_count INTEGER NOT NULL,
    pnl_mean REAL NOT NULL,
    pnl_std REAL NOT NULL,
    max_drawdown REAL NOT NULL,
    max_profit REAL NOT NULL,
    UNIQUE (run_id, symbol, strategy_id, timeframe, risk_profile, open_day, open_hour, direction)
);
CREATE TABLE IF NOT EXISTS probe_trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    result_id INTEGER NOT NULL REFERENCES probe_results(id),
    ticker TEXT NOT NULL,
    open_ts TEXT NOT NULL,
    close_ts TEXT NOT NULL,
    direction TEXT NOT NULL,
    open_justification TEXT NOT NULL,
    close_justification TEXT NOT NULL,
    pnl REAL NOT NULL,
    pnl_pct REAL NOT NULL,
    bars_held INTEGER NOT NULL,
    max_drawdown REAL NOT NULL,
    max_profit REAL NOT NULL,
    pnl_std REAL NOT NULL,
    exit_reason TEXT NOT NULL,
    UNIQUE (result_id, open_ts, direction)
);
CREATE TABLE IF NOT EXISTS probe_jobs (
    run_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    strategy_id INTEGER NOT NULL,
    timeframe TEXT NOT NULL,
    risk_profile TEXT NOT NULL,
    trade_count INTEGER NOT NULL,
    PRIMARY KEY (run_id, symbol, strategy_id, timeframe, risk_profile)
);
CREATE TABLE IF NOT EXISTS probe_runs (
    run_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    symbols TEXT NOT NULL,
    timeframes TEXT NOT NULL,
    risk_profiles TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    submitted INTEGER NOT NULL,
    pending INTEGER NOT NULL,
    running INTEGER NOT NULL,
    completed INTEGER NOT NULL,
    resumed INTEGER NOT NULL,
    data_skipped INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    cancelled INTEGER NOT NULL,
    total_trades INTEGER NOT NULL,
    failed_batches INTEGER NOT NULL,
    message TEXT
);
CREATE INDEX IF NOT EXISTS idx_results_combination
    ON probe_results(run_id, symbol, strategy_id, timeframe, risk_profile);
CREATE INDEX IF NOT EXISTS idx_runs_started ON probe_runs(started_at);";

const RUN_COLUMNS: &str = "run_id, status, symbols, timeframes, risk_profiles, started_at, \
    finished_at, submitted, pending, running, completed, resumed, data_skipped, failed, \
    cancelled, total_trades, failed_batches, message";

fn pool_err(e: r2d2::Error) -> ProbeError {
    ProbeError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> ProbeError {
    ProbeError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn conversion(idx: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, reason.into())
}

fn parse_ts(idx: usize, value: &str, format: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, format)
        .map_err(|e| conversion(idx, format!("bad timestamp '{}': {}", value, e)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ProbeError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| ProbeError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4);
        if pool_size < 1 {
            return Err(ProbeError::ConfigInvalid {
                section: "sqlite".into(),
                key: "pool_size".into(),
                reason: "pool_size must be at least 1".into(),
            });
        }
        Self::open(&db_path, pool_size as u32)
    }

    /// Open (or create) a database file and make sure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self, ProbeError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.execute_batch("PRAGMA busy_timeout = 5000;"));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    /// A private in-memory database; one connection so every caller sees it.
    pub fn in_memory() -> Result<Self, ProbeError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, ProbeError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), ProbeError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    /// Store a series, replacing bars and indicator values at the same
    /// timestamps. Non-finite indicator values are not stored.
    pub fn insert_series(&self, series: &BarSeries) -> Result<usize, ProbeError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let names: Vec<String> = series.indicator_names().map(str::to_string).collect();

        for (i, bar) in series.bars().iter().enumerate() {
            let ts = bar.timestamp.format(TS_FORMAT).to_string();
            tx.execute(
                "INSERT OR REPLACE INTO bars (symbol, timeframe, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    series.symbol(),
                    series.timeframe(),
                    ts,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_err)?;

            for name in &names {
                if let Some(value) = series.value_at(name, i) {
                    tx.execute(
                        "INSERT OR REPLACE INTO indicator_values (symbol, timeframe, ts, name, value)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![series.symbol(), series.timeframe(), ts, name, value],
                    )
                    .map_err(query_err)?;
                }
            }
        }

        tx.commit().map_err(query_err)?;
        Ok(series.len())
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_series(
        &self,
        symbol: &str,
        timeframe: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BarSeries, ProbeError> {
        let conn = self.conn()?;
        let symbol = symbol.to_uppercase();
        let start_ts = format!("{} 00:00:00", start_date.format(DATE_FORMAT));
        let end_ts = format!("{} 23:59:59", end_date.format(DATE_FORMAT));

        let mut stmt = conn
            .prepare(
                "SELECT ts, open, high, low, close, volume
                 FROM bars
                 WHERE symbol = ?1 AND timeframe = ?2 AND ts >= ?3 AND ts <= ?4
                 ORDER BY ts ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![symbol, timeframe, start_ts, end_ts], |row| {
                let ts: String = row.get(0)?;
                Ok(Bar {
                    timestamp: parse_ts(0, &ts, TS_FORMAT)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                })
            })
            .map_err(query_err)?;
        let mut bars = Vec::new();
        for row in rows {
            bars.push(row.map_err(query_err)?);
        }

        let index: HashMap<String, usize> = bars
            .iter()
            .enumerate()
            .map(|(i, b)| (b.timestamp.format(TS_FORMAT).to_string(), i))
            .collect();

        let mut names_stmt = conn
            .prepare(
                "SELECT DISTINCT name FROM indicator_values
                 WHERE symbol = ?1 AND timeframe = ?2",
            )
            .map_err(query_err)?;
        let mut indicators: HashMap<String, Vec<f64>> = HashMap::new();
        for name in names_stmt
            .query_map(params![symbol, timeframe], |row| row.get::<_, String>(0))
            .map_err(query_err)?
        {
            indicators.insert(name.map_err(query_err)?, vec![f64::NAN; bars.len()]);
        }

        let mut values_stmt = conn
            .prepare(
                "SELECT ts, name, value FROM indicator_values
                 WHERE symbol = ?1 AND timeframe = ?2 AND ts >= ?3 AND ts <= ?4",
            )
            .map_err(query_err)?;
        let values = values_stmt
            .query_map(params![symbol, timeframe, start_ts, end_ts], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .map_err(query_err)?;
        for value in values {
            let (ts, name, v) = value.map_err(query_err)?;
            if let (Some(&i), Some(column)) = (index.get(&ts), indicators.get_mut(&name)) {
                column[i] = v;
            }
        }

        BarSeries::new(symbol, timeframe, bars, indicators)
    }

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, ProbeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM bars WHERE timeframe = ?1 ORDER BY symbol")
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![timeframe], |row| row.get(0))
            .map_err(query_err)?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row.map_err(query_err)?);
        }
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, ProbeError> {
        let conn = self.conn()?;
        let result: (Option<String>, Option<String>, i64) = conn
            .query_row(
                "SELECT MIN(ts), MAX(ts), COUNT(*) FROM bars WHERE symbol = ?1 AND timeframe = ?2",
                params![symbol.to_uppercase(), timeframe],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(min_str), Some(max_str), count) if count > 0 => {
                let min = parse_ts(0, &min_str, TS_FORMAT).map_err(query_err)?;
                let max = parse_ts(1, &max_str, TS_FORMAT).map_err(query_err)?;
                Ok(Some((min.date(), max.date(), count as usize)))
            }
            _ => Ok(None),
        }
    }
}

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunSummary> {
    let status: String = row.get(1)?;
    let started: String = row.get(5)?;
    let finished: Option<String> = row.get(6)?;
    let count = |idx: usize| -> rusqlite::Result<usize> { Ok(row.get::<_, i64>(idx)?.max(0) as usize) };
    Ok(RunSummary {
        run_id: row.get(0)?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| conversion(1, format!("unknown run status '{}'", status)))?,
        symbols: split_list(&row.get::<_, String>(2)?),
        timeframes: split_list(&row.get::<_, String>(3)?),
        risk_profiles: split_list(&row.get::<_, String>(4)?),
        started_at: parse_ts(5, &started, RUN_TS_FORMAT)?,
        finished_at: finished
            .map(|f| parse_ts(6, &f, RUN_TS_FORMAT))
            .transpose()?,
        counts: JobCounts {
            submitted: count(7)?,
            pending: count(8)?,
            running: count(9)?,
            completed: count(10)?,
            resumed: count(11)?,
            data_skipped: count(12)?,
            failed: count(13)?,
            cancelled: count(14)?,
        },
        total_trades: count(15)?,
        failed_batches: count(16)?,
        message: row.get(17)?,
    })
}

impl ResultPort for SqliteAdapter {
    fn is_combination_done(&self, key: &CombinationKey) -> Result<bool, ProbeError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM probe_jobs
                 WHERE run_id = ?1 AND symbol = ?2 AND strategy_id = ?3
                   AND timeframe = ?4 AND risk_profile = ?5
             ) OR EXISTS (
                 SELECT 1 FROM probe_results
                 WHERE run_id = ?1 AND symbol = ?2 AND strategy_id = ?3
                   AND timeframe = ?4 AND risk_profile = ?5
             )",
            params![
                key.run_id,
                key.symbol,
                key.strategy_id,
                key.timeframe,
                key.risk_profile
            ],
            |row| row.get(0),
        )
        .map_err(query_err)
    }

    fn write_batch(&self, jobs: &[CompletedJob]) -> Result<WriteSummary, ProbeError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let mut summary = WriteSummary::default();

        for job in jobs {
            let key = job.key();
            for row in &job.rows {
                summary.rows_inserted += tx
                    .execute(
                        "INSERT INTO probe_results (
                             run_id, symbol, strategy_id, timeframe, risk_profile,
                             period_start, period_end, open_day, open_hour, direction,
                             trade_count, pnl_mean, pnl_std, max_drawdown, max_profit)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                         ON CONFLICT DO NOTHING",
                        params![
                            key.run_id,
                            key.symbol,
                            key.strategy_id,
                            key.timeframe,
                            key.risk_profile,
                            row.period_start.format(TS_FORMAT).to_string(),
                            row.period_end.format(TS_FORMAT).to_string(),
                            row.key.open_day.format(DATE_FORMAT).to_string(),
                            row.key.open_hour,
                            row.key.direction.as_str(),
                            row.trade_count,
                            row.pnl_mean,
                            row.pnl_std,
                            row.max_drawdown,
                            row.max_profit
                        ],
                    )
                    .map_err(query_err)?;
            }

            for trade in &job.trades {
                let result_id: i64 = tx
                    .query_row(
                        "SELECT id FROM probe_results
                         WHERE run_id = ?1 AND symbol = ?2 AND strategy_id = ?3
                           AND timeframe = ?4 AND risk_profile = ?5
                           AND open_day = ?6 AND open_hour = ?7 AND direction = ?8",
                        params![
                            key.run_id,
                            key.symbol,
                            key.strategy_id,
                            key.timeframe,
                            key.risk_profile,
                            trade.key.open_day.format(DATE_FORMAT).to_string(),
                            trade.key.open_hour,
                            trade.key.direction.as_str()
                        ],
                        |row| row.get(0),
                    )
                    .map_err(query_err)?;
                summary.trades_inserted += tx
                    .execute(
                        "INSERT INTO probe_trades (
                             result_id, ticker, open_ts, close_ts, direction,
                             open_justification, close_justification, pnl, pnl_pct,
                             bars_held, max_drawdown, max_profit, pnl_std, exit_reason)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                         ON CONFLICT DO NOTHING",
                        params![
                            result_id,
                            trade.ticker,
                            trade.open_timestamp.format(TS_FORMAT).to_string(),
                            trade.close_timestamp.format(TS_FORMAT).to_string(),
                            trade.direction.as_str(),
                            trade.open_justification,
                            trade.close_justification,
                            trade.pnl,
                            trade.pnl_pct,
                            trade.bars_held,
                            trade.max_drawdown,
                            trade.max_profit,
                            trade.pnl_std,
                            trade.exit_reason
                        ],
                    )
                    .map_err(query_err)?;
            }

            summary.jobs_marked += tx
                .execute(
                    "INSERT INTO probe_jobs (run_id, symbol, strategy_id, timeframe, risk_profile, trade_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT DO NOTHING",
                    params![
                        key.run_id,
                        key.symbol,
                        key.strategy_id,
                        key.timeframe,
                        key.risk_profile,
                        job.trade_count as i64
                    ],
                )
                .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(summary)
    }

    fn fetch_results(&self, filter: &ResultFilter) -> Result<Vec<AggregateRow>, ProbeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, symbol, strategy_id, timeframe, risk_profile,
                        period_start, period_end, open_day, open_hour, direction,
                        trade_count, pnl_mean, pnl_std, max_drawdown, max_profit
                 FROM probe_results
                 WHERE (?1 IS NULL OR run_id = ?1)
                   AND (?2 IS NULL OR symbol = UPPER(?2))
                   AND (?3 IS NULL OR timeframe = ?3)
                   AND (?4 IS NULL OR strategy_id = ?4)
                   AND (?5 IS NULL OR risk_profile = ?5)
                 ORDER BY run_id, symbol, strategy_id, timeframe, risk_profile,
                          open_day, open_hour, direction",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![
                    filter.run_id,
                    filter.symbol,
                    filter.timeframe,
                    filter.strategy_id,
                    filter.risk_profile
                ],
                |row| {
                    let period_start: String = row.get(5)?;
                    let period_end: String = row.get(6)?;
                    let open_day: String = row.get(7)?;
                    let direction: String = row.get(9)?;
                    Ok(AggregateRow {
                        run_id: row.get(0)?,
                        symbol: row.get(1)?,
                        strategy_id: row.get(2)?,
                        timeframe: row.get(3)?,
                        risk_profile: row.get(4)?,
                        period_start: parse_ts(5, &period_start, TS_FORMAT)?,
                        period_end: parse_ts(6, &period_end, TS_FORMAT)?,
                        key: GroupKey {
                            open_day: NaiveDate::parse_from_str(&open_day, DATE_FORMAT)
                                .map_err(|e| conversion(7, e.to_string()))?,
                            open_hour: row.get(8)?,
                            direction: Direction::parse(&direction).ok_or_else(|| {
                                conversion(9, format!("unknown direction '{}'", direction))
                            })?,
                        },
                        trade_count: row.get(10)?,
                        pnl_mean: row.get(11)?,
                        pnl_std: row.get(12)?,
                        max_drawdown: row.get(13)?,
                        max_profit: row.get(14)?,
                    })
                },
            )
            .map_err(query_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(query_err)?);
        }
        Ok(out)
    }

    fn save_run(&self, summary: &RunSummary) -> Result<(), ProbeError> {
        let conn = self.conn()?;
        let c = &summary.counts;
        conn.execute(
            &format!(
                "INSERT INTO probe_runs ({RUN_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                 ON CONFLICT(run_id) DO UPDATE SET
                     status = excluded.status,
                     finished_at = excluded.finished_at,
                     submitted = excluded.submitted,
                     pending = excluded.pending,
                     running = excluded.running,
                     completed = excluded.completed,
                     resumed = excluded.resumed,
                     data_skipped = excluded.data_skipped,
                     failed = excluded.failed,
                     cancelled = excluded.cancelled,
                     total_trades = excluded.total_trades,
                     failed_batches = excluded.failed_batches,
                     message = excluded.message"
            ),
            params![
                summary.run_id,
                summary.status.as_str(),
                summary.symbols.join(","),
                summary.timeframes.join(","),
                summary.risk_profiles.join(","),
                summary.started_at.format(RUN_TS_FORMAT).to_string(),
                summary
                    .finished_at
                    .map(|f| f.format(RUN_TS_FORMAT).to_string()),
                c.submitted as i64,
                c.pending as i64,
                c.running as i64,
                c.completed as i64,
                c.resumed as i64,
                c.data_skipped as i64,
                c.failed as i64,
                c.cancelled as i64,
                summary.total_trades as i64,
                summary.failed_batches as i64,
                summary.message
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Option<RunSummary>, ProbeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {RUN_COLUMNS} FROM probe_runs WHERE run_id = ?1"))
            .map_err(query_err)?;
        let mut rows = stmt.query_map(params![run_id], read_run).map_err(query_err)?;
        rows.next().transpose().map_err(query_err)
    }

    fn list_runs(
        &self,
        status: Option<RunStatus>,
        symbol: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RunSummary>, ProbeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM probe_runs
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL OR (',' || UPPER(symbols) || ',') LIKE ('%,' || UPPER(?2) || ',%'))
                 ORDER BY started_at DESC, rowid DESC
                 LIMIT ?3"
            ))
            .map_err(query_err)?;
        let limit: i64 = if limit == 0 { -1 } else { limit as i64 };
        let rows = stmt
            .query_map(
                params![status.map(|s| s.as_str()), symbol, limit],
                read_run,
            )
            .map_err(query_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(query_err)?);
        }
        Ok(out)
    }
}
