//! Strategy definitions and the immutable strategy registry.

use crate::domain::bar_series::{SeriesView, ATR_COLUMN};
use crate::domain::condition::{required_columns, Condition};
use crate::domain::condition_dsl::{compile_list, validate_nodes, ConditionNode};
use crate::domain::condition_eval::{all_hold, any_holds};
use crate::domain::error::{DslError, ProbeError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" => Some(Direction::Long),
            "short" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which directions a strategy may trade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyDirection {
    #[default]
    LongShort,
    LongOnly,
    ShortOnly,
}

impl StrategyDirection {
    pub fn allows(&self, direction: Direction) -> bool {
        match (self, direction) {
            (StrategyDirection::LongShort, _) => true,
            (StrategyDirection::LongOnly, Direction::Long) => true,
            (StrategyDirection::ShortOnly, Direction::Short) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyDirection::LongShort => "long_short",
            StrategyDirection::LongOnly => "long_only",
            StrategyDirection::ShortOnly => "short_only",
        }
    }
}

/// ATR multiples for the mechanical exits. Zero disables an exit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExitParams {
    pub atr_stop_mult: f64,
    pub atr_target_mult: f64,
    pub trailing_atr_mult: f64,
    pub time_stop_bars: u32,
}

/// A catalog entry as it appears in JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySpec {
    pub id: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub category: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub philosophy: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub direction: StrategyDirection,
    pub entry_long: Vec<ConditionNode>,
    pub entry_short: Vec<ConditionNode>,
    pub exit_long: Vec<ConditionNode>,
    pub exit_short: Vec<ConditionNode>,
    pub atr_stop_mult: f64,
    pub atr_target_mult: f64,
    pub trailing_atr_mult: f64,
    pub time_stop_bars: u32,
    pub required_indicators: Vec<String>,
}

impl StrategySpec {
    /// Every DSL error across the four condition lists.
    pub fn validate_conditions(&self) -> Vec<DslError> {
        let mut errors = validate_nodes(&self.entry_long, "entry_long");
        errors.extend(validate_nodes(&self.entry_short, "entry_short"));
        errors.extend(validate_nodes(&self.exit_long, "exit_long"));
        errors.extend(validate_nodes(&self.exit_short, "exit_short"));
        errors
    }
}

#[derive(Debug, Clone)]
pub struct StrategyDefinition {
    pub id: u32,
    pub name: String,
    pub display_name: String,
    pub category: String,
    pub direction: StrategyDirection,
    pub entry_long: Vec<Condition>,
    pub entry_short: Vec<Condition>,
    pub exit_long: Vec<Condition>,
    pub exit_short: Vec<Condition>,
    pub exits: ExitParams,
    required_indicators: Vec<String>,
}

impl StrategyDefinition {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ProbeError> {
        let name = spec.name.trim().to_string();
        let invalid = |reason: String| ProbeError::DefinitionInvalid {
            strategy: if name.is_empty() {
                format!("#{}", spec.id)
            } else {
                name.clone()
            },
            reason,
        };
        if name.is_empty() {
            return Err(invalid("name must not be empty".into()));
        }

        let compile = |nodes: &[ConditionNode], label: &str| {
            compile_list(nodes, label).map_err(|e| invalid(e.to_string()))
        };
        let entry_long = compile(&spec.entry_long, "entry_long")?;
        let entry_short = compile(&spec.entry_short, "entry_short")?;
        let exit_long = compile(&spec.exit_long, "exit_long")?;
        let exit_short = compile(&spec.exit_short, "exit_short")?;

        for (field, value) in [
            ("atr_stop_mult", spec.atr_stop_mult),
            ("atr_target_mult", spec.atr_target_mult),
            ("trailing_atr_mult", spec.trailing_atr_mult),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{field} must be finite and >= 0, got {value}")));
            }
        }

        let tradable = (spec.direction.allows(Direction::Long) && !entry_long.is_empty())
            || (spec.direction.allows(Direction::Short) && !entry_short.is_empty());
        if !tradable {
            return Err(invalid(format!(
                "no entry conditions for direction {}",
                spec.direction.as_str()
            )));
        }

        let mut columns: BTreeSet<String> = spec
            .required_indicators
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        for list in [&entry_long, &entry_short, &exit_long, &exit_short] {
            columns.extend(required_columns(list));
        }
        columns.insert(ATR_COLUMN.to_string());

        Ok(Self {
            id: spec.id,
            display_name: spec
                .display_name
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| name.clone()),
            name,
            category: spec.category.clone(),
            direction: spec.direction,
            entry_long,
            entry_short,
            exit_long,
            exit_short,
            exits: ExitParams {
                atr_stop_mult: spec.atr_stop_mult,
                atr_target_mult: spec.atr_target_mult,
                trailing_atr_mult: spec.trailing_atr_mult,
                time_stop_bars: spec.time_stop_bars,
            },
            required_indicators: columns.into_iter().collect(),
        })
    }

    /// Sorted, de-duplicated indicator columns this strategy reads.
    pub fn required_indicators(&self) -> &[String] {
        &self.required_indicators
    }

    pub fn allows(&self, direction: Direction) -> bool {
        self.direction.allows(direction)
    }

    pub fn entry_conditions(&self, direction: Direction) -> &[Condition] {
        match direction {
            Direction::Long => &self.entry_long,
            Direction::Short => &self.entry_short,
        }
    }

    pub fn exit_conditions(&self, direction: Direction) -> &[Condition] {
        match direction {
            Direction::Long => &self.exit_long,
            Direction::Short => &self.exit_short,
        }
    }

    /// All entry conditions hold and the direction is allowed.
    pub fn check_entry(&self, direction: Direction, view: &SeriesView<'_>) -> bool {
        self.allows(direction) && all_hold(self.entry_conditions(direction), view)
    }

    /// Any exit condition for `direction` holds.
    pub fn check_exit(&self, direction: Direction, view: &SeriesView<'_>) -> bool {
        any_holds(self.exit_conditions(direction), view)
    }
}

/// Top-level catalog document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyCatalog {
    pub strategies: Vec<StrategySpec>,
}

/// Immutable id-keyed set of compiled strategies, shared across workers.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    by_id: BTreeMap<u32, Arc<StrategyDefinition>>,
    by_name: HashMap<String, u32>,
}

impl StrategyRegistry {
    pub fn from_specs(specs: &[StrategySpec]) -> Result<Self, ProbeError> {
        let mut by_id = BTreeMap::new();
        let mut by_name = HashMap::new();
        for spec in specs {
            let def = StrategyDefinition::from_spec(spec)?;
            if by_id.contains_key(&def.id) {
                return Err(ProbeError::DefinitionInvalid {
                    strategy: def.name.clone(),
                    reason: format!("duplicate strategy id {}", def.id),
                });
            }
            if by_name.contains_key(&def.name) {
                return Err(ProbeError::DefinitionInvalid {
                    strategy: def.name.clone(),
                    reason: "duplicate strategy name".into(),
                });
            }
            by_name.insert(def.name.clone(), def.id);
            by_id.insert(def.id, Arc::new(def));
        }
        Ok(Self { by_id, by_name })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Arc<StrategyDefinition>> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<StrategyDefinition>> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Strategies in ascending id order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<StrategyDefinition>> {
        self.by_id.values()
    }

    /// The strategies named by `ids`, or all of them when `ids` is empty.
    pub fn select(&self, ids: &[u32]) -> Result<Vec<Arc<StrategyDefinition>>, ProbeError> {
        if ids.is_empty() {
            return Ok(self.by_id.values().cloned().collect());
        }
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            let def = self.get(id).ok_or(ProbeError::UnknownStrategy { id })?;
            if seen.insert(id) {
                out.push(Arc::clone(def));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bar_series::{Bar, BarSeries};
    use crate::domain::condition::Ref;
    use chrono::NaiveDate;

    fn above_node(col: &str, value: f64) -> ConditionNode {
        serde_json::from_value(serde_json::json!({
            "op": "above", "col": col, "ref": {"value": value}
        }))
        .unwrap()
    }

    fn spec(id: u32, name: &str) -> StrategySpec {
        StrategySpec {
            id,
            name: name.into(),
            category: "trend".into(),
            entry_long: vec![above_node("close", 100.0)],
            exit_long: vec![above_node("rsi_14", 70.0)],
            atr_stop_mult: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn direction_round_trips_through_strings() {
        assert_eq!(Direction::parse("long"), Some(Direction::Long));
        assert_eq!(Direction::Short.to_string(), "short");
        assert_eq!(Direction::parse("flat"), None);
    }

    #[test]
    fn strategy_direction_gates_entries() {
        assert!(StrategyDirection::LongShort.allows(Direction::Short));
        assert!(StrategyDirection::LongOnly.allows(Direction::Long));
        assert!(!StrategyDirection::LongOnly.allows(Direction::Short));
        assert!(!StrategyDirection::ShortOnly.allows(Direction::Long));
    }

    #[test]
    fn from_spec_collects_required_indicators() {
        let mut s = spec(1, "ema_trend");
        s.required_indicators = vec!["ema_50".into(), " ".into()];
        let def = StrategyDefinition::from_spec(&s).unwrap();
        assert_eq!(def.display_name, "ema_trend");
        assert_eq!(
            def.required_indicators(),
            &["atr_14".to_string(), "ema_50".to_string(), "rsi_14".to_string()]
        );
    }

    #[test]
    fn from_spec_rejects_empty_name() {
        let err = StrategyDefinition::from_spec(&spec(3, "  ")).unwrap_err();
        assert!(matches!(err, ProbeError::DefinitionInvalid { ref strategy, .. } if strategy == "#3"));
    }

    #[test]
    fn from_spec_rejects_negative_multiplier() {
        let mut s = spec(1, "neg");
        s.atr_target_mult = -1.0;
        let err = StrategyDefinition::from_spec(&s).unwrap_err();
        assert!(err.to_string().contains("atr_target_mult"));
    }

    #[test]
    fn from_spec_requires_entry_for_allowed_direction() {
        let mut s = spec(1, "short_only_without_short_entries");
        s.direction = StrategyDirection::ShortOnly;
        assert!(StrategyDefinition::from_spec(&s).is_err());
    }

    #[test]
    fn from_spec_reports_dsl_path() {
        let mut s = spec(1, "broken");
        s.exit_short = vec![ConditionNode::op("nope")];
        let err = StrategyDefinition::from_spec(&s).unwrap_err();
        assert!(err.to_string().contains("exit_short[0]"));
        assert_eq!(s.validate_conditions().len(), 1);
    }

    #[test]
    fn entry_requires_all_and_exit_any() {
        let def = StrategyDefinition::from_spec(&spec(1, "t")).unwrap();
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let bars = vec![Bar {
            timestamp: ts,
            open: 101.0,
            high: 102.0,
            low: 100.0,
            close: 101.0,
            volume: 1.0,
        }];
        let mut ind = HashMap::new();
        ind.insert("rsi_14".to_string(), vec![75.0]);
        let series = BarSeries::new("X", "1Day", bars, ind).unwrap();
        let view = series.view(0).unwrap();
        assert!(def.check_entry(Direction::Long, &view));
        assert!(!def.check_entry(Direction::Short, &view));
        assert!(def.check_exit(Direction::Long, &view));
        assert!(!def.check_exit(Direction::Short, &view));
        assert_eq!(
            def.entry_conditions(Direction::Long)[0],
            Condition::Above {
                col: "close".into(),
                reference: Ref::Value(100.0)
            }
        );
    }

    #[test]
    fn registry_rejects_duplicates() {
        let err = StrategyRegistry::from_specs(&[spec(1, "a"), spec(1, "b")]).unwrap_err();
        assert!(err.to_string().contains("duplicate strategy id"));
        let err = StrategyRegistry::from_specs(&[spec(1, "a"), spec(2, "a")]).unwrap_err();
        assert!(err.to_string().contains("duplicate strategy name"));
    }

    #[test]
    fn registry_lookup_and_select() {
        let reg = StrategyRegistry::from_specs(&[spec(7, "b"), spec(2, "a")]).unwrap();
        assert_eq!(reg.len(), 2);
        let ids: Vec<u32> = reg.all().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 7]);
        assert_eq!(reg.by_name("b").map(|d| d.id), Some(7));
        assert_eq!(reg.select(&[]).unwrap().len(), 2);
        assert_eq!(reg.select(&[7, 7]).unwrap().len(), 1);
        assert!(matches!(
            reg.select(&[9]),
            Err(ProbeError::UnknownStrategy { id: 9 })
        ));
    }

    #[test]
    fn catalog_deserializes_with_defaults() {
        let json = r#"{"strategies":[{"id":1,"name":"x","category":"trend",
            "entry_long":[{"op":"above","col":"close","ref":{"value":1}}]}]}"#;
        let catalog: StrategyCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.strategies[0].direction, StrategyDirection::LongShort);
        assert_eq!(catalog.strategies[0].time_stop_bars, 0);
        assert!(StrategyRegistry::from_specs(&catalog.strategies).is_ok());
    }
}
