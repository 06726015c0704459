//! Risk profiles: scale factors applied to a strategy's ATR exit multiples.

use crate::domain::error::ProbeError;
use crate::domain::strategy::ExitParams;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskProfile {
    pub name: String,
    pub stop_scale: f64,
    pub target_scale: f64,
    pub trail_scale: f64,
    pub time_scale: f64,
}

/// Exit distances in price units for one position, fixed at fill time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExitDistances {
    pub stop: Option<f64>,
    pub target: Option<f64>,
    pub trail: Option<f64>,
    pub time_limit: Option<u32>,
}

impl RiskProfile {
    pub fn new(name: &str, stop: f64, target: f64, trail: f64, time: f64) -> Self {
        Self {
            name: name.to_string(),
            stop_scale: stop,
            target_scale: target,
            trail_scale: trail,
            time_scale: time,
        }
    }

    pub fn low() -> Self {
        Self::new("low", 0.75, 0.75, 0.75, 0.6)
    }

    pub fn medium() -> Self {
        Self::new("medium", 1.0, 1.0, 1.0, 1.0)
    }

    pub fn high() -> Self {
        Self::new("high", 1.5, 1.5, 1.5, 1.5)
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "low" => Some(Self::low()),
            "medium" => Some(Self::medium()),
            "high" => Some(Self::high()),
            _ => None,
        }
    }

    /// Resolve `name` from a `[risk.<name>]` section layered over the preset of
    /// the same name. Unknown names with no section are rejected.
    pub fn from_config(config: &dyn ConfigPort, name: &str) -> Result<Self, ProbeError> {
        let section = format!("risk.{name}");
        let base = Self::preset(name);
        let has_section = ["stop_scale", "target_scale", "trail_scale", "time_scale"]
            .iter()
            .any(|key| config.get_string(&section, key).is_some());

        let base = match (base, has_section) {
            (Some(p), false) => return Ok(p),
            (Some(p), true) => p,
            (None, true) => Self::new(name, 1.0, 1.0, 1.0, 1.0),
            (None, false) => {
                return Err(ProbeError::ConfigInvalid {
                    section: "run".to_string(),
                    key: "risk_profiles".to_string(),
                    reason: format!("unknown risk profile '{name}'"),
                });
            }
        };

        let read = |key: &str, default: f64| -> Result<f64, ProbeError> {
            let value = config.get_double(&section, key, default);
            if !value.is_finite() || value < 0.0 {
                return Err(ProbeError::ConfigInvalid {
                    section: section.clone(),
                    key: key.to_string(),
                    reason: format!("{key} must be finite and >= 0"),
                });
            }
            Ok(value)
        };

        Ok(Self {
            name: name.to_string(),
            stop_scale: read("stop_scale", base.stop_scale)?,
            target_scale: read("target_scale", base.target_scale)?,
            trail_scale: read("trail_scale", base.trail_scale)?,
            time_scale: read("time_scale", base.time_scale)?,
        })
    }

    /// Distances for a position opened with `atr` at the fill bar.
    pub fn distances(&self, exits: &ExitParams, atr: f64) -> ExitDistances {
        let scaled = |mult: f64, scale: f64| (mult > 0.0).then_some(mult * scale * atr);
        let time_limit = (exits.time_stop_bars as f64 * self.time_scale).floor() as u32;
        ExitDistances {
            stop: scaled(exits.atr_stop_mult, self.stop_scale),
            target: scaled(exits.atr_target_mult, self.target_scale),
            trail: scaled(exits.trailing_atr_mult, self.trail_scale),
            time_limit: (exits.time_stop_bars > 0 && time_limit > 0).then_some(time_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use approx::assert_relative_eq;

    fn exits() -> ExitParams {
        ExitParams {
            atr_stop_mult: 2.0,
            atr_target_mult: 3.0,
            trailing_atr_mult: 0.0,
            time_stop_bars: 10,
        }
    }

    #[test]
    fn presets_match_names() {
        assert_eq!(RiskProfile::preset("low").unwrap().time_scale, 0.6);
        assert_eq!(RiskProfile::preset("low").unwrap().stop_scale, 0.75);
        assert_eq!(RiskProfile::preset("medium").unwrap().stop_scale, 1.0);
        assert_eq!(RiskProfile::preset("high").unwrap().stop_scale, 1.5);
        assert_eq!(RiskProfile::preset("high").unwrap().time_scale, 1.5);
        assert!(RiskProfile::preset("extreme").is_none());
    }

    #[test]
    fn distances_scale_by_atr_and_profile() {
        let d = RiskProfile::medium().distances(&exits(), 2.0);
        assert_relative_eq!(d.stop.unwrap(), 4.0);
        assert_relative_eq!(d.target.unwrap(), 6.0);
        assert_eq!(d.trail, None);
        assert_eq!(d.time_limit, Some(10));
    }

    #[test]
    fn time_limit_floors_and_drops_zero() {
        let d = RiskProfile::low().distances(&exits(), 1.0);
        assert_eq!(d.time_limit, Some(6));
        let mut e = exits();
        e.time_stop_bars = 1;
        assert_eq!(RiskProfile::low().distances(&e, 1.0).time_limit, None);
        e.time_stop_bars = 0;
        assert_eq!(RiskProfile::high().distances(&e, 1.0).time_limit, None);
    }

    #[test]
    fn from_config_uses_preset_without_section() {
        let cfg = FileConfigAdapter::from_string("[run]\n").unwrap();
        assert_eq!(
            RiskProfile::from_config(&cfg, "high").unwrap(),
            RiskProfile::high()
        );
    }

    #[test]
    fn from_config_overrides_preset_keys() {
        let cfg = FileConfigAdapter::from_string("[risk.medium]\nstop_scale = 3.0\n").unwrap();
        let p = RiskProfile::from_config(&cfg, "medium").unwrap();
        assert_eq!(p.stop_scale, 3.0);
        assert_eq!(p.target_scale, 1.0);
    }

    #[test]
    fn high_profile_widens_a_two_atr_stop_to_three() {
        let d = RiskProfile::high().distances(&exits(), 1.0);
        assert_relative_eq!(d.stop.unwrap(), 3.0);
        assert_relative_eq!(d.target.unwrap(), 4.5);
        assert_eq!(d.time_limit, Some(15));
    }

    #[test]
    fn low_profile_tightens_exits() {
        let d = RiskProfile::low().distances(&exits(), 2.0);
        assert_relative_eq!(d.stop.unwrap(), 3.0);
        assert_relative_eq!(d.target.unwrap(), 4.5);
    }

    #[test]
    fn from_config_defines_custom_profile() {
        let cfg =
            FileConfigAdapter::from_string("[risk.tight]\nstop_scale = 0.5\ntime_scale = 0.5\n")
                .unwrap();
        let p = RiskProfile::from_config(&cfg, "tight").unwrap();
        assert_eq!(p.name, "tight");
        assert_eq!(p.stop_scale, 0.5);
        assert_eq!(p.trail_scale, 1.0);
    }

    #[test]
    fn from_config_rejects_unknown_profile() {
        let cfg = FileConfigAdapter::from_string("[run]\n").unwrap();
        let err = RiskProfile::from_config(&cfg, "yolo").unwrap_err();
        assert!(matches!(err, ProbeError::ConfigInvalid { ref reason, .. } if reason.contains("yolo")));
    }

    #[test]
    fn from_config_rejects_negative_scale() {
        let cfg = FileConfigAdapter::from_string("[risk.low]\ntrail_scale = -1\n").unwrap();
        assert!(RiskProfile::from_config(&cfg, "low").is_err());
    }
}
