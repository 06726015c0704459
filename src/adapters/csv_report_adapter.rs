//! CSV report adapter implementing ReportPort.

use crate::domain::aggregator::AggregateRow;
use crate::domain::error::ProbeError;
use crate::ports::report_port::ReportPort;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

#[derive(Serialize)]
struct ReportRow<'a> {
    run_id: &'a str,
    symbol: &'a str,
    strategy_id: u32,
    timeframe: &'a str,
    risk_profile: &'a str,
    period_start: String,
    period_end: String,
    open_day: String,
    open_hour: u32,
    direction: &'static str,
    trade_count: u32,
    pnl_mean: f64,
    pnl_std: f64,
    max_drawdown: f64,
    max_profit: f64,
}

impl<'a> From<&'a AggregateRow> for ReportRow<'a> {
    fn from(row: &'a AggregateRow) -> Self {
        Self {
            run_id: &row.run_id,
            symbol: &row.symbol,
            strategy_id: row.strategy_id,
            timeframe: &row.timeframe,
            risk_profile: &row.risk_profile,
            period_start: row.period_start.format("%Y-%m-%d %H:%M:%S").to_string(),
            period_end: row.period_end.format("%Y-%m-%d %H:%M:%S").to_string(),
            open_day: row.key.open_day.format("%Y-%m-%d").to_string(),
            open_hour: row.key.open_hour,
            direction: row.key.direction.as_str(),
            trade_count: row.trade_count,
            pnl_mean: row.pnl_mean,
            pnl_std: row.pnl_std,
            max_drawdown: row.max_drawdown,
            max_profit: row.max_profit,
        }
    }
}

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn write_to<W: Write>(&self, rows: &[AggregateRow], writer: W) -> Result<(), ProbeError> {
        let mut wtr = csv::Writer::from_writer(writer);
        for row in rows {
            wtr.serialize(ReportRow::from(row))
                .map_err(|e| ProbeError::Io(io::Error::other(e)))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for CsvReportAdapter {
    fn write_results(&self, rows: &[AggregateRow], output: Option<&Path>) -> Result<(), ProbeError> {
        match output {
            Some(path) => self.write_to(rows, File::create(path)?),
            None => self.write_to(rows, io::stdout().lock()),
        }
    }
}
