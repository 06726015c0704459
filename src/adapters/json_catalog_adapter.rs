//! JSON strategy catalog adapter.
//!
//! The catalog is a single document `{"strategies": [...]}`.

use crate::domain::error::ProbeError;
use crate::domain::strategy::{StrategyCatalog, StrategySpec};
use crate::ports::strategy_port::StrategySourcePort;
use std::fs;
use std::path::PathBuf;

pub struct JsonCatalogAdapter {
    path: PathBuf,
}

impl JsonCatalogAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn parse(content: &str, origin: &str) -> Result<Vec<StrategySpec>, ProbeError> {
        let catalog: StrategyCatalog =
            serde_json::from_str(content).map_err(|e| ProbeError::DefinitionInvalid {
                strategy: origin.to_string(),
                reason: format!("catalog is not valid JSON: {}", e),
            })?;
        Ok(catalog.strategies)
    }
}

impl StrategySourcePort for JsonCatalogAdapter {
    fn load_strategies(&self) -> Result<Vec<StrategySpec>, ProbeError> {
        let content = fs::read_to_string(&self.path)?;
        Self::parse(&content, &self.path.display().to_string())
    }
}
