//! Strategy catalog source port.

use crate::domain::error::ProbeError;
use crate::domain::strategy::StrategySpec;

pub trait StrategySourcePort {
    /// Raw catalog entries, uncompiled.
    fn load_strategies(&self) -> Result<Vec<StrategySpec>, ProbeError>;
}
