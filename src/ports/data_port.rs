//! Bar data access port.

use crate::domain::bar_series::BarSeries;
use crate::domain::error::ProbeError;
use chrono::NaiveDate;

pub trait DataPort {
    /// Bars and indicator columns for `symbol` on `timeframe`, inclusive of
    /// both dates. An empty range is an empty series, not an error.
    fn fetch_series(
        &self,
        symbol: &str,
        timeframe: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BarSeries, ProbeError>;

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, ProbeError>;

    /// First date, last date and bar count, or `None` when nothing is stored.
    fn get_data_range(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, ProbeError>;
}
