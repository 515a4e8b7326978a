//! Configuration Loader
//!
//! Environment-aware configuration loading: YAML file discovery, environment
//! overlay merging, and env-var overrides for the scalar knobs.

use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;

/// Environment sections recognized in the configuration file.
const ENVIRONMENT_SECTIONS: &[&str] = &["development", "test", "production"];

/// Loads [`EngineConfig`] from YAML with environment overlays.
///
/// Resolution order: file values, then the section matching the active
/// environment, then `STEPLINE_*` env-var overrides. A missing file is only
/// an error when `STEPLINE_CONFIG` names one explicitly; otherwise defaults
/// apply.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with environment auto-detection.
    pub fn load() -> ConfigResult<EngineConfig> {
        let environment = Self::detect_environment();
        let mut config = match env::var("STEPLINE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path), &environment)?,
            Err(_) => match Self::find_config_file() {
                Some(path) => Self::from_file(&path, &environment)?,
                None => {
                    debug!("no configuration file found, using defaults");
                    EngineConfig::default()
                }
            },
        };

        Self::apply_overrides(&mut config, |name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file with an explicit environment.
    /// This is useful for testing without modifying global environment
    /// variables.
    pub fn from_file(path: &Path, environment: &str) -> ConfigResult<EngineConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ConfigurationError::file_read_error(path.display().to_string(), err))?;

        let mut yaml: YamlValue = serde_yaml::from_str(&contents)
            .map_err(|err| ConfigurationError::invalid_yaml(path.display().to_string(), err))?;

        // Apply the environment-specific overlay, then drop all sections so
        // they do not reach deserialization.
        if let Some(overlay) = yaml.get(environment).cloned() {
            debug!(environment, "applying environment overlay");
            Self::merge_yaml_values(&mut yaml, overlay);
        }
        if let YamlValue::Mapping(ref mut map) = yaml {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String((*section).to_string()));
            }
        }

        let config: EngineConfig = serde_yaml::from_value(yaml)
            .map_err(|err| ConfigurationError::invalid_yaml(path.display().to_string(), err))?;
        config.validate()?;
        Ok(config)
    }

    /// Detect current environment: STEPLINE_ENV || APP_ENV || 'development'.
    fn detect_environment() -> String {
        env::var("STEPLINE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Look for a configuration file in conventional locations.
    fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("stepline.yaml"),
            PathBuf::from("stepline.yml"),
            PathBuf::from("config/stepline.yaml"),
            PathBuf::from("config/stepline.yml"),
        ];
        candidates.into_iter().find(|path| path.exists())
    }

    /// Apply `STEPLINE_*` scalar overrides through `lookup`, which is the
    /// process environment in production and a plain map in tests.
    pub(crate) fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("STEPLINE_POLLING_INTERVAL_MS") {
            config.polling_interval_ms = Self::parse_override("STEPLINE_POLLING_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("STEPLINE_POLL_FAILURE_RETRY_LIMIT") {
            config.poll_failure_retry_limit =
                Self::parse_override("STEPLINE_POLL_FAILURE_RETRY_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("STEPLINE_POLL_FAILURE_BACKOFF_MS") {
            config.poll_failure_backoff_ms =
                Self::parse_override("STEPLINE_POLL_FAILURE_BACKOFF_MS", &raw)?;
        }
        if let Some(raw) = lookup("STEPLINE_MAX_CAPTURED_OUTPUT_BYTES") {
            config.max_captured_output_bytes =
                Self::parse_override("STEPLINE_MAX_CAPTURED_OUTPUT_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("STEPLINE_DUPLICATE_WINDOW_HOURS") {
            config.duplicate_window_hours =
                Self::parse_override("STEPLINE_DUPLICATE_WINDOW_HOURS", &raw)?;
        }
        Ok(())
    }

    fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> ConfigResult<T> {
        raw.parse::<T>().map_err(|_| {
            ConfigurationError::invalid_value(name, raw, "could not parse numeric override")
        })
    }

    /// Recursively merge YAML values (environment overlay into base config).
    fn merge_yaml_values(base: &mut YamlValue, overlay: YamlValue) {
        match (&mut *base, overlay) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
                for (key, value) in overlay_map {
                    if let Some(existing) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_slot, overlay_value) => {
                *base_slot = overlay_value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config("polling_interval_ms: 500\nduplicate_window_hours: 6\n");
        let config = ConfigLoader::from_file(file.path(), "development").unwrap();
        assert_eq!(config.polling_interval_ms, 500);
        assert_eq!(config.duplicate_window_hours, 6);
        assert_eq!(config.poll_failure_retry_limit, 3);
    }

    #[test]
    fn environment_overlay_wins_over_base_values() {
        let file = write_config(
            r#"
polling_interval_ms: 10000
test:
  polling_interval_ms: 25
production:
  polling_interval_ms: 2000
"#,
        );

        let test_config = ConfigLoader::from_file(file.path(), "test").unwrap();
        assert_eq!(test_config.polling_interval_ms, 25);

        let production_config = ConfigLoader::from_file(file.path(), "production").unwrap();
        assert_eq!(production_config.polling_interval_ms, 2000);

        let development_config = ConfigLoader::from_file(file.path(), "development").unwrap();
        assert_eq!(development_config.polling_interval_ms, 10000);
    }

    #[test]
    fn invalid_yaml_is_reported_with_the_path() {
        let file = write_config("polling_interval_ms: [not a number\n");
        let err = ConfigLoader::from_file(file.path(), "development").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidYaml { .. }));
    }

    #[test]
    fn out_of_range_file_values_fail_validation() {
        let file = write_config("polling_interval_ms: 0\n");
        assert!(ConfigLoader::from_file(file.path(), "development").is_err());
    }

    #[test]
    fn env_overrides_apply_after_file_values() {
        let mut config = EngineConfig::default();
        let vars: HashMap<&str, &str> = [
            ("STEPLINE_POLLING_INTERVAL_MS", "125"),
            ("STEPLINE_DUPLICATE_WINDOW_HOURS", "48"),
        ]
        .into_iter()
        .collect();

        ConfigLoader::apply_overrides(&mut config, |name| {
            vars.get(name).map(|value| value.to_string())
        })
        .unwrap();

        assert_eq!(config.polling_interval_ms, 125);
        assert_eq!(config.duplicate_window_hours, 48);
        assert_eq!(config.poll_failure_backoff_ms, 5000);
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut config = EngineConfig::default();
        let err = ConfigLoader::apply_overrides(&mut config, |name| {
            (name == "STEPLINE_POLLING_INTERVAL_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
