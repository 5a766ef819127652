use crate::error::Result;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine-wide settings, usually read from a small YAML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Date returned by the `now()` formula function. Defaults to the current UTC date.
    pub today: Option<NaiveDate>,
    /// Label of the trailing group holding rows without a grouped value
    pub no_value_label: String,
    /// Report validation issues as errors instead of warnings
    pub strict_validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            today: None,
            no_value_label: "No value".to_string(),
            strict_validation: false,
        }
    }
}

impl EngineConfig {
    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Parse an engine config YAML file
pub fn parse_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse an engine config YAML string. An empty document yields the defaults.
pub fn parse_config_str(content: &str) -> Result<EngineConfig> {
    if content.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    let config: EngineConfig = serde_yaml::from_str(content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config = parse_config_str("today: 2024-03-01\nstrict_validation: true\n").unwrap();
        assert_eq!(config.today, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert!(config.strict_validation);
        assert_eq!(config.no_value_label, "No value");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        assert_eq!(parse_config_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_config_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("celldb.yaml");
        std::fs::write(&path, "no_value_label: Unsorted\n").unwrap();
        let config = parse_config(&path).unwrap();
        assert_eq!(config.no_value_label, "Unsorted");
        assert_eq!(config.today, None);
    }
}
