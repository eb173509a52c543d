use std::path::{Path, PathBuf};

use crate::config::schema::Settings;
use crate::error::ConfigError;

pub const ENV_GROUP_VARS_DIR: &str = "GROUPVARS_GROUP_VARS_DIR";
pub const ENV_INVENTORY: &str = "GROUPVARS_INVENTORY";
pub const ENV_SKIP_EVAL: &str = "GROUPVARS_SKIP_EVAL";
pub const ENV_EJSON_KEYDIR: &str = "EJSON_KEYDIR";

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

/// Parses settings from YAML. JSON input is accepted as well.
pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    // An empty file means "all defaults".
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }

    let settings: Settings = serde_yaml::from_str(content)?;
    validate_settings(&settings)?;

    Ok(settings)
}

/// `<platform config dir>/groupvars/settings.yaml`, if the platform has one.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("groupvars").join("settings.yaml"))
}

impl Settings {
    /// Applies `GROUPVARS_*` and `EJSON_KEYDIR` overrides from the process
    /// environment and re-validates the result.
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(dir) = env_value(ENV_GROUP_VARS_DIR) {
            self.group_vars_dir = PathBuf::from(dir);
        }

        if let Some(inventory) = env_value(ENV_INVENTORY) {
            self.inventory = PathBuf::from(inventory);
        }

        if let Some(raw) = env_value(ENV_SKIP_EVAL) {
            self.skip_eval = parse_bool(ENV_SKIP_EVAL, &raw)?;
        }

        if let Some(key_dir) = env_value(ENV_EJSON_KEYDIR) {
            self.ejson.key_dir = PathBuf::from(key_dir);
        }

        validate_settings(&self)?;
        Ok(self)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            name: name.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.group_vars_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "group_vars_dir must not be empty".to_string(),
        });
    }

    if settings.inventory.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "inventory must not be empty".to_string(),
        });
    }

    if settings.ejson.key_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "ejson.key_dir must not be empty".to_string(),
        });
    }

    if settings.log.level.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "log.level must not be empty".to_string(),
        });
    }

    Ok(())
}
