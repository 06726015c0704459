//! INI file configuration adapter.
//!
//! Section and key names are case-insensitive; values are returned trimmed.

use crate::domain::error::ProbeError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

#[derive(Debug)]
pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProbeError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| ProbeError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, ProbeError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| ProbeError::ConfigParse {
                file: "<inline>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    /// Names of every `[risk.<name>]` section.
    pub fn risk_sections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .config
            .sections()
            .into_iter()
            .filter_map(|s| s.strip_prefix("risk.").map(str::to_string))
            .collect();
        names.sort();
        names
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get(section, key)
            .map(|v| v.trim().to_string())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    const FULL: &str = r#"
[data]
source = csv
csv_dir = /var/bars

[run]
symbols = AAPL, MSFT ,NVDA
timeframes = 1Hour
risk_profiles = low,high

[runner]
workers = 8
persist_trades = no

[risk.high]
stop_scale = 2.5

[Risk.Scalp]
time_scale = 0.25
"#;

    #[test]
    fn from_string_parses_sections() {
        let adapter = FileConfigAdapter::from_string(FULL).unwrap();
        assert_eq!(adapter.get_string("data", "source"), Some("csv".to_string()));
        assert_eq!(adapter.get_int("runner", "workers", 0), 8);
        assert!(!adapter.get_bool("runner", "persist_trades", true));
        assert_eq!(adapter.get_double("risk.high", "stop_scale", 1.0), 2.5);
    }

    #[test]
    fn get_list_trims_items() {
        let adapter = FileConfigAdapter::from_string(FULL).unwrap();
        assert_eq!(
            adapter.get_list("run", "symbols"),
            Some(vec!["AAPL".to_string(), "MSFT".to_string(), "NVDA".to_string()])
        );
        assert_eq!(adapter.get_list("run", "missing"), None);
    }

    #[test]
    fn risk_sections_are_listed_lowercased() {
        let adapter = FileConfigAdapter::from_string(FULL).unwrap();
        assert_eq!(adapter.risk_sections(), vec!["high", "scalp"]);
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[run]\nsymbols = AAPL\n").unwrap();
        assert_eq!(adapter.get_string("run", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_default_for_missing_or_non_numeric() {
        let adapter = FileConfigAdapter::from_string("[runner]\nbatch_size = abc\n").unwrap();
        assert_eq!(adapter.get_int("runner", "batch_size", 16), 16);
        assert_eq!(adapter.get_int("runner", "missing", 42), 42);
    }

    #[test]
    fn get_double_returns_default_for_non_numeric() {
        let adapter =
            FileConfigAdapter::from_string("[risk.low]\nstop_scale = wide\n").unwrap();
        assert_eq!(adapter.get_double("risk.low", "stop_scale", 1.0), 1.0);
    }

    #[test]
    fn get_bool_accepts_common_spellings() {
        let adapter = FileConfigAdapter::from_string(
            "[runner]\na = true\nb = yes\nc = 1\nd = off\ne = maybe\n",
        )
        .unwrap();
        assert!(adapter.get_bool("runner", "a", false));
        assert!(adapter.get_bool("runner", "b", false));
        assert!(adapter.get_bool("runner", "c", false));
        assert!(!adapter.get_bool("runner", "d", true));
        assert!(adapter.get_bool("runner", "e", true));
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[sqlite]\npath = /tmp/probe.db\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("sqlite", "path"),
            Some("/tmp/probe.db".to_string())
        );
    }

    #[test]
    fn from_file_missing_is_parse_error() {
        let err = FileConfigAdapter::from_file("/nonexistent/path/config.ini").unwrap_err();
        assert!(matches!(err, ProbeError::ConfigParse { file, .. } if file.contains("config.ini")));
    }
}
