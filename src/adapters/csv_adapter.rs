//! CSV file bar adapter.
//!
//! One file per series, named `<SYMBOL>_<timeframe>.csv`, with header
//! `timestamp,open,high,low,close,volume[,indicator...]`.

use crate::domain::bar_series::{Bar, BarSeries};
use crate::domain::error::ProbeError;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const CORE_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.base_path
            .join(format!("{}_{}.csv", symbol.to_uppercase(), timeframe))
    }
}

/// Parse one timestamp cell, trying RFC 3339 and then the naive formats.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Read a whole CSV file into a series, optionally limited to an inclusive
/// date range.
pub fn load_csv_file(
    path: &Path,
    symbol: &str,
    timeframe: &str,
    range: Option<(NaiveDate, NaiveDate)>,
) -> Result<BarSeries, ProbeError> {
    let file = fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProbeError::NoData {
                symbol: symbol.to_uppercase(),
                timeframe: timeframe.to_string(),
            }
        } else {
            ProbeError::Io(e)
        }
    })?;
    read_series(file, symbol, timeframe, range)
}

pub fn read_series<R: Read>(
    reader: R,
    symbol: &str,
    timeframe: &str,
    range: Option<(NaiveDate, NaiveDate)>,
) -> Result<BarSeries, ProbeError> {
    let malformed = |reason: String| ProbeError::MalformedSeries { reason };

    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| malformed(format!("CSV header error: {}", e)))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let mut core_idx = [0usize; 6];
    for (slot, name) in core_idx.iter_mut().zip(CORE_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| malformed(format!("missing {} column", name)))?;
    }
    let indicator_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !CORE_COLUMNS.contains(&h.as_str()))
        .map(|(i, h)| (i, h.clone()))
        .collect();

    let mut rows: Vec<(Bar, Vec<f64>)> = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| malformed(format!("CSV parse error: {}", e)))?;
        let row = line + 2;
        let cell = |idx: usize| record.get(idx).unwrap_or("");

        let timestamp = parse_timestamp(cell(core_idx[0]))
            .ok_or_else(|| malformed(format!("row {}: invalid timestamp '{}'", row, cell(core_idx[0]))))?;
        if let Some((start, end)) = range {
            let date = timestamp.date();
            if date < start || date > end {
                continue;
            }
        }

        let mut ohlcv = [0.0f64; 5];
        for (k, value) in ohlcv.iter_mut().enumerate() {
            let raw = cell(core_idx[k + 1]);
            *value = raw.parse().map_err(|e| {
                malformed(format!("row {}: invalid {} value '{}': {}", row, CORE_COLUMNS[k + 1], raw, e))
            })?;
        }

        let indicators = indicator_cols
            .iter()
            .map(|(idx, _)| cell(*idx).parse::<f64>().unwrap_or(f64::NAN))
            .collect();

        rows.push((
            Bar {
                timestamp,
                open: ohlcv[0],
                high: ohlcv[1],
                low: ohlcv[2],
                close: ohlcv[3],
                volume: ohlcv[4],
            },
            indicators,
        ));
    }

    rows.sort_by_key(|(bar, _)| bar.timestamp);

    let mut columns: HashMap<String, Vec<f64>> = indicator_cols
        .iter()
        .map(|(_, name)| (name.clone(), Vec::with_capacity(rows.len())))
        .collect();
    let mut bars = Vec::with_capacity(rows.len());
    for (bar, values) in rows {
        for ((_, name), value) in indicator_cols.iter().zip(values) {
            if let Some(col) = columns.get_mut(name) {
                col.push(value);
            }
        }
        bars.push(bar);
    }

    BarSeries::new(symbol.to_uppercase(), timeframe, bars, columns)
}

impl DataPort for CsvAdapter {
    fn fetch_series(
        &self,
        symbol: &str,
        timeframe: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BarSeries, ProbeError> {
        let path = self.csv_path(symbol, timeframe);
        load_csv_file(&path, symbol, timeframe, Some((start_date, end_date)))
    }

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, ProbeError> {
        let entries = fs::read_dir(&self.base_path)?;

        let suffix = format!("_{}.csv", timeframe);
        let mut symbols = Vec::new();

        for entry in entries {
            let name = entry?.file_name();
            let name_str = name.to_string_lossy();

            if let Some(symbol) = name_str.strip_suffix(&suffix) {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, ProbeError> {
        let path = self.csv_path(symbol, timeframe);
        let series = match load_csv_file(&path, symbol, timeframe, None) {
            Ok(series) => series,
            Err(ProbeError::NoData { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(series
            .first_timestamp()
            .zip(series.last_timestamp())
            .map(|(first, last)| (first.date(), last.date(), series.len())))
    }
}
