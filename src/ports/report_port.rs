//! Result report port.

use crate::domain::aggregator::AggregateRow;
use crate::domain::error::ProbeError;
use std::path::Path;

/// Port for exporting aggregate rows.
pub trait ReportPort {
    /// Write `rows` to `output`, or to stdout when `output` is `None`.
    fn write_results(&self, rows: &[AggregateRow], output: Option<&Path>) -> Result<(), ProbeError>;
}
