// src/config/loader.rs
//! Layered TOML configuration loader
//!
//! Layers, lowest precedence first: built-in defaults, each configuration
//! file in order, then `STIM_` environment variables. The merged result is
//! validated before it is returned.

use crate::config::ExperimentConfig;
use crate::error::ConfigError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prefix of environment overrides, e.g. `STIM_STIMULATION__AMPLITUDE_MA=3.5`
pub const ENV_PREFIX: &str = "STIM_";
/// Separator between table and key in an environment override
const ENV_SEPARATOR: &str = "__";

/// Configuration loader
pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    use_environment: bool,
}

impl ConfigLoader {
    /// Loader reading `stim.toml` and `config/local.toml` from the working directory
    pub fn new() -> Self {
        Self::with_paths(vec![
            PathBuf::from("stim.toml"),
            PathBuf::from("config/local.toml"),
        ])
    }

    /// Create loader with custom paths
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            config_paths: paths,
            use_environment: true,
        }
    }

    /// Disable environment overrides
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    pub fn config_paths(&self) -> &[PathBuf] {
        &self.config_paths
    }

    /// Merge every layer into a validated configuration. Missing files are skipped.
    pub fn load(&self) -> Result<ExperimentConfig, ConfigError> {
        let mut merged = toml::Value::try_from(ExperimentConfig::default())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        for path in &self.config_paths {
            if !path.exists() {
                debug!(path = %path.display(), "Configuration file not present, skipped");
                continue;
            }
            let layer = load_config_file(path)?;
            merge_toml_values(&mut merged, layer);
            info!(path = %path.display(), "Configuration file loaded");
        }

        if self.use_environment {
            apply_environment_overrides(&mut merged, std::env::vars());
        }

        let config: ExperimentConfig = merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a single file on top of the defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<ExperimentConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<ExperimentConfig, ConfigError> {
        let config: ExperimentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write `config` as TOML
    pub fn export_config<P: AsRef<Path>>(
        config: &ExperimentConfig,
        path: P,
    ) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn load_config_file(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

fn merge_toml_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(&key) {
                    merge_toml_values(base_value, value);
                } else {
                    base_table.insert(key, value);
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn apply_environment_overrides(
    config: &mut toml::Value,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = stripped
            .to_lowercase()
            .split(ENV_SEPARATOR)
            .map(str::to_string)
            .collect();
        debug!(variable = %key, "Applying environment override");
        set_nested_value(config, &path, parse_env_value(&value));
    }
}

fn parse_env_value(value: &str) -> toml::Value {
    if let Ok(int_val) = value.parse::<i64>() {
        toml::Value::Integer(int_val)
    } else if let Ok(float_val) = value.parse::<f64>() {
        toml::Value::Float(float_val)
    } else if let Ok(bool_val) = value.parse::<bool>() {
        toml::Value::Boolean(bool_val)
    } else {
        toml::Value::String(value.to_string())
    }
}

fn set_nested_value(config: &mut toml::Value, path: &[String], value: toml::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = config;
    for part in parents {
        let toml::Value::Table(table) = current else {
            return;
        };
        current = table
            .entry(part.clone())
            .or_insert_with(|| toml::Value::Table(toml::value::Table::new()));
    }
    if let toml::Value::Table(table) = current {
        // Integers written for float fields keep their float type
        let value = match (table.get(last), value) {
            (Some(toml::Value::Float(_)), toml::Value::Integer(i)) => toml::Value::Float(i as f64),
            (_, value) => value,
        };
        table.insert(last.clone(), value);
    }
}
