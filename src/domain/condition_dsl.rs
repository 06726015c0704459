//! JSON condition DSL.
//!
//! Nodes are flat `{ "op": ..., <params> }` objects; the compiler reads only the
//! fields relevant to each `op`. Compilation walks the whole tree and keeps
//! every problem it finds, each tagged with the node's path
//! (e.g. `entry_long[0].conditions[1]`).

use crate::domain::condition::{Condition, Ref};
use crate::domain::error::DslError;
use serde::{Deserialize, Serialize};

const DIVERGENCE_LOOKBACK: usize = 5;
const SQUEEZE_LOOKBACK: usize = 50;
const CROSS_HISTORY_LOOKBACK: usize = 5;
const NARROWEST_RANGE_LOOKBACK: usize = 7;
const PULLBACK_TOLERANCE_ATR: f64 = 0.5;
const RANGE_PCT: f64 = 0.25;
const GAP_ATR_MULT: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionNode {
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<RefNode>,
    pub n: i64,
    pub threshold: f64,
    pub lookback: i64,
    pub multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance_atr_mult: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atr_mult: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_col: Option<String>,
    pub low: f64,
    pub high: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct: Option<f64>,
    pub epsilon: f64,
    pub factor: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionNode>,
}

impl ConditionNode {
    pub fn op(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            ..Default::default()
        }
    }
}

/// Compile a single node, stopping at the first error.
pub fn compile_node(node: &ConditionNode, path: &str) -> Result<Condition, DslError> {
    let mut errors = Vec::new();
    match compile_collect(node, path, &mut errors) {
        Some(c) if errors.is_empty() => Ok(c),
        _ => Err(errors
            .into_iter()
            .next()
            .unwrap_or_else(|| DslError::new(path, "invalid condition"))),
    }
}

/// Compile a named list (`entry_long`, `exit_short`, ...).
pub fn compile_list(nodes: &[ConditionNode], label: &str) -> Result<Vec<Condition>, DslError> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| compile_node(node, &format!("{label}[{i}]")))
        .collect()
}

/// Every error in a named list, in tree order.
pub fn validate_nodes(nodes: &[ConditionNode], label: &str) -> Vec<DslError> {
    let mut errors = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        compile_collect(node, &format!("{label}[{i}]"), &mut errors);
    }
    errors
}

/// Parse a JSON array of nodes and compile it under `label`.
pub fn parse_condition_list(json: &str, label: &str) -> Result<Vec<Condition>, DslError> {
    let trimmed = json.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let nodes: Vec<ConditionNode> = serde_json::from_str(trimmed)
        .map_err(|e| DslError::new(label, format!("invalid JSON: {e}")))?;
    compile_list(&nodes, label)
}

struct NodeCtx<'a> {
    node: &'a ConditionNode,
    path: &'a str,
    errors: &'a mut Vec<DslError>,
    ok: bool,
}

impl NodeCtx<'_> {
    fn fail(&mut self, message: String) {
        self.ok = false;
        self.errors.push(DslError::new(self.path, message));
    }

    fn column(&mut self, field: &str, value: &Option<String>) -> String {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => {
                self.fail(format!("{} requires {}", self.node.op, field));
                String::new()
            }
        }
    }

    fn positive(&mut self, field: &str, value: i64) -> usize {
        if value <= 0 {
            self.fail(format!("{} requires {} > 0", self.node.op, field));
            return 0;
        }
        value as usize
    }

    fn lookback_or(&mut self, default: usize) -> usize {
        if self.node.lookback <= 0 {
            default
        } else {
            self.node.lookback as usize
        }
    }

    fn finite(&mut self, field: &str, value: f64) -> f64 {
        if !value.is_finite() {
            self.fail(format!("{} requires a finite {}", self.node.op, field));
        }
        value
    }

    fn finite_or(&mut self, field: &str, value: Option<f64>, default: f64) -> f64 {
        self.finite(field, value.unwrap_or(default))
    }

    fn required_finite(&mut self, field: &str, value: Option<f64>) -> f64 {
        match value {
            Some(v) => self.finite(field, v),
            None => {
                self.fail(format!("{} requires {}", self.node.op, field));
                0.0
            }
        }
    }

    fn pct(&mut self) -> f64 {
        let pct = self.node.pct.unwrap_or(RANGE_PCT);
        if !(pct > 0.0 && pct <= 1.0) {
            self.fail(format!("{} requires 0 < pct <= 1", self.node.op));
        }
        pct
    }

    fn reference(&mut self) -> Ref {
        match &self.node.reference {
            None => {
                self.fail(format!("{} requires ref", self.node.op));
                Ref::Value(0.0)
            }
            Some(RefNode { col: Some(c), .. }) if !c.trim().is_empty() => {
                Ref::Column(c.trim().to_string())
            }
            Some(RefNode { value: Some(v), .. }) => Ref::Value(self.finite("ref value", *v)),
            Some(_) => {
                self.fail(format!("{} ref must have col or value", self.node.op));
                Ref::Value(0.0)
            }
        }
    }
}

fn compile_collect(
    node: &ConditionNode,
    path: &str,
    errors: &mut Vec<DslError>,
) -> Option<Condition> {
    let op = node.op.trim();
    if op.is_empty() {
        errors.push(DslError::new(path, "missing op"));
        return None;
    }

    if op == "all_of" || op == "any_of" {
        if node.conditions.is_empty() {
            errors.push(DslError::new(
                path,
                format!("{op} requires non-empty conditions"),
            ));
            return None;
        }
        let before = errors.len();
        let children: Vec<Condition> = node
            .conditions
            .iter()
            .enumerate()
            .filter_map(|(i, child)| {
                compile_collect(child, &format!("{path}.conditions[{i}]"), errors)
            })
            .collect();
        if errors.len() > before {
            return None;
        }
        return Some(if op == "all_of" {
            Condition::AllOf(children)
        } else {
            Condition::AnyOf(children)
        });
    }

    let mut ctx = NodeCtx {
        node,
        path,
        errors,
        ok: true,
    };
    let n = node;
    let condition = match op {
        "crosses_above" | "crosses_below" | "above" | "below" => {
            let col = ctx.column("col", &n.col);
            let reference = ctx.reference();
            match op {
                "crosses_above" => Condition::CrossesAbove { col, reference },
                "crosses_below" => Condition::CrossesBelow { col, reference },
                "above" => Condition::Above { col, reference },
                _ => Condition::Below { col, reference },
            }
        }
        "rising" => Condition::Rising {
            col: ctx.column("col", &n.col),
            n: ctx.positive("n", n.n),
        },
        "falling" => Condition::Falling {
            col: ctx.column("col", &n.col),
            n: ctx.positive("n", n.n),
        },
        "pullback_to" => Condition::PullbackTo {
            level_col: ctx.column("level_col", &n.level_col),
            tolerance_atr_mult: ctx.finite_or("tolerance_atr_mult", n.tolerance_atr_mult, PULLBACK_TOLERANCE_ATR),
        },
        "pullback_below" => Condition::PullbackBelow {
            level_col: ctx.column("level_col", &n.level_col),
            tolerance_atr_mult: ctx.finite_or("tolerance_atr_mult", n.tolerance_atr_mult, PULLBACK_TOLERANCE_ATR),
        },
        "bullish_divergence" => Condition::BullishDivergence {
            indicator_col: ctx.column("indicator_col", &n.indicator_col),
            lookback: ctx.lookback_or(DIVERGENCE_LOOKBACK),
        },
        "bearish_divergence" => Condition::BearishDivergence {
            indicator_col: ctx.column("indicator_col", &n.indicator_col),
            lookback: ctx.lookback_or(DIVERGENCE_LOOKBACK),
        },
        "candle_bullish" => Condition::CandleBullish {
            pattern_col: ctx.column("pattern_col", &n.pattern_col),
        },
        "candle_bearish" => Condition::CandleBearish {
            pattern_col: ctx.column("pattern_col", &n.pattern_col),
        },
        "consecutive_higher_closes" => Condition::ConsecutiveHigherCloses {
            n: ctx.positive("n", n.n),
        },
        "consecutive_lower_closes" => Condition::ConsecutiveLowerCloses {
            n: ctx.positive("n", n.n),
        },
        "squeeze" => Condition::Squeeze {
            width_col: ctx.column("width_col", &n.width_col),
            lookback: ctx.lookback_or(SQUEEZE_LOOKBACK),
        },
        "range_exceeds_atr" => Condition::RangeExceedsAtr {
            multiplier: ctx.finite("multiplier", n.multiplier),
        },
        "narrowest_range" => Condition::NarrowestRange {
            lookback: ctx.lookback_or(NARROWEST_RANGE_LOOKBACK),
        },
        "breaks_above_level" => Condition::BreaksAboveLevel {
            level_col: ctx.column("level_col", &n.level_col),
        },
        "breaks_below_level" => Condition::BreaksBelowLevel {
            level_col: ctx.column("level_col", &n.level_col),
        },
        "in_top_pct_of_range" => Condition::InTopPctOfRange { pct: ctx.pct() },
        "in_bottom_pct_of_range" => Condition::InBottomPctOfRange { pct: ctx.pct() },
        "gap_up" => Condition::GapUp {
            atr_mult: ctx.finite_or("atr_mult", n.atr_mult, GAP_ATR_MULT),
        },
        "gap_down" => Condition::GapDown {
            atr_mult: ctx.finite_or("atr_mult", n.atr_mult, GAP_ATR_MULT),
        },
        "deviation_below" => Condition::DeviationBelow {
            col: ctx.column("col", &n.col),
            ref_col: ctx.column("ref_col", &n.ref_col),
            atr_mult: ctx.required_finite("atr_mult", n.atr_mult),
        },
        "deviation_above" => Condition::DeviationAbove {
            col: ctx.column("col", &n.col),
            ref_col: ctx.column("ref_col", &n.ref_col),
            atr_mult: ctx.required_finite("atr_mult", n.atr_mult),
        },
        "was_below_then_crosses_above" => Condition::WasBelowThenCrossesAbove {
            col: ctx.column("col", &n.col),
            threshold: ctx.finite("threshold", n.threshold),
            lookback: ctx.lookback_or(CROSS_HISTORY_LOOKBACK),
        },
        "was_above_then_crosses_below" => Condition::WasAboveThenCrossesBelow {
            col: ctx.column("col", &n.col),
            threshold: ctx.finite("threshold", n.threshold),
            lookback: ctx.lookback_or(CROSS_HISTORY_LOOKBACK),
        },
        "held_above" => Condition::HeldAbove {
            col: ctx.column("col", &n.col),
            threshold: ctx.finite("threshold", n.threshold),
            n: ctx.positive("n", n.n),
        },
        "held_below" => Condition::HeldBelow {
            col: ctx.column("col", &n.col),
            threshold: ctx.finite("threshold", n.threshold),
            n: ctx.positive("n", n.n),
        },
        "bb_width_increasing" => Condition::BbWidthIncreasing {
            n: ctx.positive("n", n.n),
        },
        "adx_in_range" => {
            let low = ctx.finite("low", n.low);
            let high = ctx.finite("high", n.high);
            if low > high {
                ctx.fail("adx_in_range requires low <= high".to_string());
            }
            Condition::AdxInRange { low, high }
        }
        "close_above_upper_channel" => Condition::CloseAboveUpperChannel {
            col: ctx.column("col", &n.col),
            multiplier: ctx.finite("multiplier", n.multiplier),
        },
        "close_below_lower_channel" => Condition::CloseBelowLowerChannel {
            col: ctx.column("col", &n.col),
            multiplier: ctx.finite("multiplier", n.multiplier),
        },
        "breaks_above_sma_envelope" => Condition::BreaksAboveSmaEnvelope {
            col: ctx.column("col", &n.col),
            multiplier: ctx.finite("multiplier", n.multiplier),
        },
        "breaks_below_sma_envelope" => Condition::BreaksBelowSmaEnvelope {
            col: ctx.column("col", &n.col),
            multiplier: ctx.finite("multiplier", n.multiplier),
        },
        "double_tap_below_bb" => Condition::DoubleTapBelowBb {
            lookback: ctx.positive("lookback", n.lookback),
        },
        "double_tap_above_bb" => Condition::DoubleTapAboveBb {
            lookback: ctx.positive("lookback", n.lookback),
        },
        "flat_slope" => Condition::FlatSlope {
            col: ctx.column("col", &n.col),
            epsilon: ctx.finite("epsilon", n.epsilon),
        },
        "atr_below_contracted_sma" => {
            if !(n.factor > 0.0 && n.factor.is_finite()) {
                ctx.fail("atr_below_contracted_sma requires factor > 0".to_string());
            }
            Condition::AtrBelowContractedSma { factor: n.factor }
        }
        "mean_rev_long" => Condition::MeanRevLong {
            ref_col: ctx.column("ref_col", &n.ref_col),
            multiplier: ctx.finite("multiplier", n.multiplier),
        },
        "mean_rev_short" => Condition::MeanRevShort {
            ref_col: ctx.column("ref_col", &n.ref_col),
            multiplier: ctx.finite("multiplier", n.multiplier),
        },
        "majority_bull" => Condition::MajorityBull,
        "majority_bear" => Condition::MajorityBear,
        other => {
            ctx.fail(format!("unknown operator \"{other}\""));
            return None;
        }
    };
    ctx.ok.then_some(condition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<ConditionNode> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn compiles_crosses_above_with_column_ref() {
        let nodes = parse(r#"[{"op":"crosses_above","col":"ema_20","ref":{"col":"ema_50"}}]"#);
        let conds = compile_list(&nodes, "entry_long").unwrap();
        assert_eq!(
            conds,
            vec![Condition::CrossesAbove {
                col: "ema_20".into(),
                reference: Ref::Column("ema_50".into()),
            }]
        );
    }

    #[test]
    fn compiles_literal_ref() {
        let conds =
            parse_condition_list(r#"[{"op":"below","col":"rsi_14","ref":{"value":30}}]"#, "x")
                .unwrap();
        assert_eq!(
            conds[0],
            Condition::Below {
                col: "rsi_14".into(),
                reference: Ref::Value(30.0),
            }
        );
    }

    #[test]
    fn null_and_empty_json_compile_to_nothing() {
        assert!(parse_condition_list("", "x").unwrap().is_empty());
        assert!(parse_condition_list("null", "x").unwrap().is_empty());
        assert!(parse_condition_list("[]", "x").unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = parse_condition_list("[{", "entry_long").unwrap_err();
        assert_eq!(err.path, "entry_long");
        assert!(err.message.contains("invalid JSON"));
    }

    #[test]
    fn unknown_operator_reports_path() {
        let nodes = parse(r#"[{"op":"above","col":"close","ref":{"value":1}},{"op":"moon"}]"#);
        let err = compile_list(&nodes, "entry_short").unwrap_err();
        assert_eq!(err.path, "entry_short[1]");
        assert!(err.message.contains("moon"));
    }

    #[test]
    fn nested_error_path_includes_children() {
        let nodes = parse(
            r#"[{"op":"all_of","conditions":[
                {"op":"above","col":"close","ref":{"value":1}},
                {"op":"any_of","conditions":[{"op":"rising","col":"ema_20"}]}
            ]}]"#,
        );
        let err = compile_list(&nodes, "entry_long").unwrap_err();
        assert_eq!(err.path, "entry_long[0].conditions[1].conditions[0]");
        assert!(err.message.contains("n > 0"));
    }

    #[test]
    fn validate_collects_every_error() {
        let nodes = parse(
            r#"[
                {"op":"crosses_above","ref":{}},
                {"op":"squeeze"},
                {"op":"all_of","conditions":[]},
                {"op":""},
                {"op":"majority_bull"}
            ]"#,
        );
        let errors = validate_nodes(&nodes, "exit_long");
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "exit_long[0]",
                "exit_long[0]",
                "exit_long[1]",
                "exit_long[2]",
                "exit_long[3]"
            ]
        );
        assert!(errors[0].message.contains("requires col"));
        assert!(errors[1].message.contains("ref must have col or value"));
    }

    #[test]
    fn missing_ref_is_an_error() {
        let nodes = parse(r#"[{"op":"above","col":"close"}]"#);
        let err = compile_list(&nodes, "entry_long").unwrap_err();
        assert!(err.message.contains("requires ref"));
    }

    #[test]
    fn lookback_defaults_apply() {
        let nodes = parse(
            r#"[
                {"op":"bullish_divergence","indicator_col":"rsi_14"},
                {"op":"squeeze","width_col":"bb_width"},
                {"op":"was_below_then_crosses_above","col":"rsi_14","threshold":30}
            ]"#,
        );
        let conds = compile_list(&nodes, "entry_long").unwrap();
        assert_eq!(
            conds[0],
            Condition::BullishDivergence {
                indicator_col: "rsi_14".into(),
                lookback: 5
            }
        );
        assert_eq!(
            conds[1],
            Condition::Squeeze {
                width_col: "bb_width".into(),
                lookback: 50
            }
        );
        assert!(matches!(
            conds[2],
            Condition::WasBelowThenCrossesAbove { lookback: 5, .. }
        ));
    }

    #[test]
    fn omitted_tolerances_and_fractions_take_defaults() {
        let nodes = parse(
            r#"[
                {"op":"pullback_to","level_col":"ema_20"},
                {"op":"pullback_below","level_col":"ema_20"},
                {"op":"narrowest_range"},
                {"op":"in_top_pct_of_range"},
                {"op":"in_bottom_pct_of_range"},
                {"op":"gap_up"},
                {"op":"gap_down"},
                {"op":"bearish_divergence","indicator_col":"rsi_14"},
                {"op":"was_above_then_crosses_below","col":"rsi_14","threshold":70}
            ]"#,
        );
        let conds = compile_list(&nodes, "entry_long").unwrap();
        assert_eq!(
            conds[0],
            Condition::PullbackTo {
                level_col: "ema_20".into(),
                tolerance_atr_mult: 0.5
            }
        );
        assert_eq!(
            conds[1],
            Condition::PullbackBelow {
                level_col: "ema_20".into(),
                tolerance_atr_mult: 0.5
            }
        );
        assert_eq!(conds[2], Condition::NarrowestRange { lookback: 7 });
        assert_eq!(conds[3], Condition::InTopPctOfRange { pct: 0.25 });
        assert_eq!(conds[4], Condition::InBottomPctOfRange { pct: 0.25 });
        assert_eq!(conds[5], Condition::GapUp { atr_mult: 1.0 });
        assert_eq!(conds[6], Condition::GapDown { atr_mult: 1.0 });
        assert_eq!(
            conds[7],
            Condition::BearishDivergence {
                indicator_col: "rsi_14".into(),
                lookback: 5
            }
        );
        assert!(matches!(
            conds[8],
            Condition::WasAboveThenCrossesBelow { lookback: 5, .. }
        ));
    }

    #[test]
    fn explicit_zero_tolerance_is_kept() {
        let nodes = parse(r#"[{"op":"pullback_to","level_col":"ema_20","tolerance_atr_mult":0}]"#);
        assert_eq!(
            compile_list(&nodes, "entry_long").unwrap()[0],
            Condition::PullbackTo {
                level_col: "ema_20".into(),
                tolerance_atr_mult: 0.0
            }
        );
    }

    #[test]
    fn deviation_requires_atr_mult() {
        let nodes = parse(r#"[{"op":"deviation_below","col":"close","ref_col":"ema_20"}]"#);
        let err = compile_list(&nodes, "entry_long").unwrap_err();
        assert!(err.message.contains("requires atr_mult"));
    }

    #[test]
    fn required_lookback_and_pct_are_checked() {
        let nodes = parse(
            r#"[
                {"op":"double_tap_below_bb"},
                {"op":"double_tap_below_bb","lookback":-2},
                {"op":"in_top_pct_of_range","pct":0},
                {"op":"in_bottom_pct_of_range","pct":1.5}
            ]"#,
        );
        assert_eq!(validate_nodes(&nodes, "entry_long").len(), 4);
    }

    #[test]
    fn adx_range_bounds_are_ordered() {
        let nodes = parse(r#"[{"op":"adx_in_range","low":40,"high":20}]"#);
        assert!(compile_list(&nodes, "entry_long").is_err());
        let ok = parse(r#"[{"op":"adx_in_range","low":20,"high":40}]"#);
        assert!(compile_list(&ok, "entry_long").is_ok());
    }

    #[test]
    fn composite_compiles_recursively() {
        let nodes = parse(
            r#"[{"op":"any_of","conditions":[
                {"op":"majority_bear"},
                {"op":"gap_down","atr_mult":0.5}
            ]}]"#,
        );
        let conds = compile_list(&nodes, "exit_long").unwrap();
        assert_eq!(
            conds[0],
            Condition::AnyOf(vec![
                Condition::MajorityBear,
                Condition::GapDown { atr_mult: 0.5 }
            ])
        );
    }

    #[test]
    fn node_builder_serializes_sparse_fields() {
        let mut node = ConditionNode::op("candle_bullish");
        node.pattern_col = Some("cdl_hammer".into());
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"pattern_col\":\"cdl_hammer\""));
        assert!(!json.contains("conditions"));
        let back: ConditionNode = serde_json::from_str(&json).unwrap();
        assert_eq!(compile_node(&back, "x").unwrap().op_name(), "candle_bullish");
    }
}
