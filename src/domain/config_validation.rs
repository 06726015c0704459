//! Configuration validation.
//!
//! Validates the `[run]` and `[runner]` sections before any work starts.

use crate::domain::error::ProbeError;
use crate::domain::risk::RiskProfile;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub fn validate_run_config(config: &dyn ConfigPort) -> Result<(), ProbeError> {
    validate_list(config, "symbols")?;
    validate_list(config, "timeframes")?;
    validate_risk_profiles(config)?;
    validate_dates(config)?;
    Ok(())
}

pub fn validate_runner_config(config: &dyn ConfigPort) -> Result<(), ProbeError> {
    validate_int(config, "workers", 0)?;
    validate_int(config, "channel_capacity", 1)?;
    validate_int(config, "batch_size", 1)?;
    validate_int(config, "max_persist_attempts", 1)?;
    validate_int(config, "backoff_base_ms", 0)?;
    validate_int(config, "backoff_max_ms", 0)?;
    validate_int(config, "deadline_secs", 0)?;
    validate_int(config, "min_bars", 1)?;
    validate_int(config, "progress_every", 1)?;
    validate_backoff_order(config)?;
    Ok(())
}

fn validate_list(config: &dyn ConfigPort, key: &str) -> Result<(), ProbeError> {
    match config.get_list("run", key) {
        Some(items) if !items.is_empty() => Ok(()),
        _ => Err(ProbeError::ConfigMissing {
            section: "run".to_string(),
            key: key.to_string(),
        }),
    }
}

fn validate_risk_profiles(config: &dyn ConfigPort) -> Result<(), ProbeError> {
    let names = config
        .get_list("run", "risk_profiles")
        .unwrap_or_else(|| vec!["medium".to_string()]);
    if names.is_empty() {
        return Err(ProbeError::ConfigInvalid {
            section: "run".to_string(),
            key: "risk_profiles".to_string(),
            reason: "risk_profiles must name at least one profile".to_string(),
        });
    }
    for name in &names {
        RiskProfile::from_config(config, name)?;
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), ProbeError> {
    let start_str = config.get_string("run", "start_date");
    let end_str = config.get_string("run", "end_date");

    let start_date = parse_date(start_str.as_deref(), "start_date")?;
    let end_date = parse_date(end_str.as_deref(), "end_date")?;

    if start_date >= end_date {
        return Err(ProbeError::ConfigInvalid {
            section: "run".to_string(),
            key: "start_date".to_string(),
            reason: "start_date must be before end_date".to_string(),
        });
    }
    Ok(())
}

pub fn parse_date(value: Option<&str>, field: &str) -> Result<NaiveDate, ProbeError> {
    match value {
        None => Err(ProbeError::ConfigMissing {
            section: "run".to_string(),
            key: field.to_string(),
        }),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            ProbeError::ConfigInvalid {
                section: "run".to_string(),
                key: field.to_string(),
                reason: format!("invalid {} format, expected YYYY-MM-DD", field),
            }
        }),
    }
}

/// An absent key is fine; a present one must be an integer >= `min`.
fn validate_int(config: &dyn ConfigPort, key: &str, min: i64) -> Result<(), ProbeError> {
    let Some(raw) = config.get_string("runner", key) else {
        return Ok(());
    };
    let invalid = |reason: String| ProbeError::ConfigInvalid {
        section: "runner".to_string(),
        key: key.to_string(),
        reason,
    };
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{key} must be an integer, got '{raw}'")))?;
    if value < min {
        return Err(invalid(format!("{key} must be at least {min}")));
    }
    Ok(())
}

fn validate_backoff_order(config: &dyn ConfigPort) -> Result<(), ProbeError> {
    let base = config.get_int("runner", "backoff_base_ms", 100);
    let max = config.get_int("runner", "backoff_max_ms", 2000);
    if max < base {
        return Err(ProbeError::ConfigInvalid {
            section: "runner".to_string(),
            key: "backoff_max_ms".to_string(),
            reason: "backoff_max_ms must not be below backoff_base_ms".to_string(),
        });
    }
    Ok(())
}
