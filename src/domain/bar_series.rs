//! Columnar bar series with aligned indicator arrays.
//!
//! A [`BarSeries`] is immutable once built and is shared by reference across
//! every job that runs against it. Conditions never see the series directly:
//! they receive a [`SeriesView`] pinned to one bar index that can only look
//! backwards.

use crate::domain::error::ProbeError;
use chrono::NaiveDateTime;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Clone)]
pub struct BarSeries {
    symbol: String,
    timeframe: String,
    bars: Vec<Bar>,
    indicators: HashMap<String, Vec<f64>>,
}

impl BarSeries {
    /// Build a series, rejecting unordered timestamps and misaligned indicator arrays.
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        bars: Vec<Bar>,
        indicators: HashMap<String, Vec<f64>>,
    ) -> Result<Self, ProbeError> {
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ProbeError::MalformedSeries {
                    reason: format!(
                        "timestamps not strictly increasing at {}",
                        pair[1].timestamp
                    ),
                });
            }
        }
        for (name, values) in &indicators {
            if values.len() != bars.len() {
                return Err(ProbeError::MalformedSeries {
                    reason: format!(
                        "indicator {} has {} values for {} bars",
                        name,
                        values.len(),
                        bars.len()
                    ),
                });
            }
        }
        Ok(Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            bars,
            indicators,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bar(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.bars.last().map(|b| b.timestamp)
    }

    pub fn indicator_names(&self) -> impl Iterator<Item = &str> {
        self.indicators.keys().map(String::as_str)
    }

    pub fn has_column(&self, column: &str) -> bool {
        is_price_column(column) || self.indicators.contains_key(column)
    }

    /// Finite value of `column` at `index`; `None` when missing, NaN or infinite.
    pub fn value_at(&self, column: &str, index: usize) -> Option<f64> {
        let bar = self.bars.get(index)?;
        let v = match column {
            "open" => bar.open,
            "high" => bar.high,
            "low" => bar.low,
            "close" => bar.close,
            "volume" => bar.volume,
            _ => *self.indicators.get(column)?.get(index)?,
        };
        v.is_finite().then_some(v)
    }

    /// A read-only window ending at `index`, or `None` past the end of data.
    pub fn view(&self, index: usize) -> Option<SeriesView<'_>> {
        (index < self.bars.len()).then_some(SeriesView {
            series: self,
            index,
        })
    }

    /// Check the series can support a strategy needing `columns`.
    pub fn check_requirements<S: AsRef<str>>(
        &self,
        columns: &[S],
        min_bars: usize,
    ) -> Result<(), ProbeError> {
        if self.bars.is_empty() {
            return Err(ProbeError::NoData {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe.clone(),
            });
        }
        if self.bars.len() < min_bars {
            return Err(ProbeError::InsufficientData {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe.clone(),
                bars: self.bars.len(),
                minimum: min_bars,
            });
        }
        for column in columns {
            let column = column.as_ref();
            if is_price_column(column) {
                continue;
            }
            let values = self
                .indicators
                .get(column)
                .ok_or_else(|| ProbeError::MissingIndicator {
                    symbol: self.symbol.clone(),
                    timeframe: self.timeframe.clone(),
                    column: column.to_string(),
                })?;
            if !values.iter().any(|v| v.is_finite()) {
                return Err(ProbeError::InsufficientLookback {
                    symbol: self.symbol.clone(),
                    timeframe: self.timeframe.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }
}

pub fn is_price_column(column: &str) -> bool {
    matches!(column, "open" | "high" | "low" | "close" | "volume")
}

/// A series pinned at one bar index. Offsets count backwards from that bar,
/// so nothing after the current bar is reachable.
#[derive(Debug, Clone, Copy)]
pub struct SeriesView<'a> {
    series: &'a BarSeries,
    index: usize,
}

impl<'a> SeriesView<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bar `back` positions before the current one (0 is the current bar).
    pub fn bar(&self, back: usize) -> Option<&'a Bar> {
        let i = self.index.checked_sub(back)?;
        self.series.bars.get(i)
    }

    pub fn value(&self, column: &str, back: usize) -> Option<f64> {
        let i = self.index.checked_sub(back)?;
        self.series.value_at(column, i)
    }

    pub fn atr(&self, back: usize) -> Option<f64> {
        self.value(ATR_COLUMN, back)
    }
}

pub const ATR_COLUMN: &str = "atr_14";
