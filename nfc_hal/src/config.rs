//! Reader configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "info"
//! service_name = "nfc-reader-01"
//!
//! [driver]
//! name = "simulation"
//! scenario = "field.toml"
//! cycle_time_ms = 200
//!
//! [poll]
//! enabled = ["type_a", "type_b"]
//!
//! [poll.type_a]
//! device_limit = 2
//! ```

use nfc_common::config::{ConfigError, SharedConfig};
use nfc_common::discovery::config::PollConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest accepted poll cycle period.
pub const MAX_CYCLE_TIME_MS: u64 = 60_000;

fn default_driver_name() -> String {
    "simulation".to_string()
}

fn default_cycle_time_ms() -> u64 {
    200
}

/// Front-end driver selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Registered driver name.
    #[serde(default = "default_driver_name")]
    pub name: String,
    /// Tag population of the simulated field.
    #[serde(default)]
    pub scenario: Option<PathBuf>,
    /// Poll cycle period [ms] (0 = back to back).
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: default_driver_name(),
            scenario: None,
            cycle_time_ms: default_cycle_time_ms(),
        }
    }
}

/// Complete reader configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

impl ReaderConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` on the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.poll.validate()?;
        if self.driver.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "driver.name cannot be empty".to_string(),
            ));
        }
        if self.driver.cycle_time_ms > MAX_CYCLE_TIME_MS {
            return Err(ConfigError::ValidationError(format!(
                "driver.cycle_time_ms {} exceeds {MAX_CYCLE_TIME_MS}",
                self.driver.cycle_time_ms
            )));
        }
        Ok(())
    }

    /// Resolve relative file references against the directory of the config file.
    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(scenario) = self.driver.scenario.as_mut() {
            if scenario.is_relative() {
                *scenario = base.join(&*scenario);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfc_common::config::ConfigLoader;
    use nfc_common::discovery::types::Technology;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ReaderConfig::from_toml("[shared]\nservice_name = \"reader\"\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.driver, DriverConfig::default());
        assert_eq!(config.poll.device_limit(Technology::TypeA), 1);
    }

    #[test]
    fn test_full_config() {
        let config = ReaderConfig::from_toml(
            r#"
[shared]
log_level = "debug"
service_name = "reader"

[driver]
name = "simulation"
scenario = "field.toml"
cycle_time_ms = 0

[poll]
enabled = ["type_a", "i18000p3m3"]

[poll.i18000p3m3]
device_limit = 8
session = 2
"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.driver.scenario, Some(PathBuf::from("field.toml")));
        assert_eq!(config.driver.cycle_time_ms, 0);
        assert_eq!(config.poll.device_limit(Technology::I18000p3m3), 8);
        assert_eq!(config.poll.i18000p3m3.session, 2);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ReaderConfig::from_toml("[shared]\nservice_name = \"reader\"\n").unwrap();
        config.driver.name.clear();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = ReaderConfig::from_toml("[shared]\nservice_name = \"reader\"\n").unwrap();
        config.driver.cycle_time_ms = MAX_CYCLE_TIME_MS + 1;
        assert!(config.validate().is_err());

        let mut config = ReaderConfig::from_toml("[shared]\nservice_name = \"reader\"\n").unwrap();
        config.poll.type_b.cid = 15;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_relative_scenario() {
        let mut config = ReaderConfig::from_toml(
            "[shared]\nservice_name = \"reader\"\n[driver]\nscenario = \"field.toml\"\n",
        )
        .unwrap();
        config.resolve_paths(Path::new("/etc/nfc"));
        assert_eq!(config.driver.scenario, Some(PathBuf::from("/etc/nfc/field.toml")));

        config.resolve_paths(Path::new("/other"));
        assert_eq!(config.driver.scenario, Some(PathBuf::from("/etc/nfc/field.toml")));
    }
}
