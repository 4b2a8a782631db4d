//! Service configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file (with
//! the `toml-config` feature), then `XCACHE_*` environment variables, then
//! whatever the embedding host or CLI sets explicitly.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::DEFAULT_MAX_DESCRIPTOR_BYTES;

pub const ENV_MAX_ENTRIES: &str = "XCACHE_MAX_ENTRIES";
pub const ENV_RETAIN_RELEASED: &str = "XCACHE_RETAIN_RELEASED";
pub const ENV_MAX_DESCRIPTOR_BYTES: &str = "XCACHE_MAX_DESCRIPTOR_BYTES";
pub const ENV_DEVICE_ORDINAL: &str = "XCACHE_DEVICE_ORDINAL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "toml-config")]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on live plus reclaimable entries. Zero means unbounded.
    pub max_entries: usize,
    /// Keep compiled executables of released entries so a later request for
    /// the same key can revive them without recompiling.
    pub retain_released: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 0,
            retain_released: true,
        }
    }
}

impl CacheConfig {
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_entries != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub max_descriptor_bytes: usize,
    pub device_ordinal: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            max_descriptor_bytes: DEFAULT_MAX_DESCRIPTOR_BYTES,
            device_ordinal: 0,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies `XCACHE_*` overrides resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_ENTRIES) {
            self.cache.max_entries = parse_value(ENV_MAX_ENTRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_RETAIN_RELEASED) {
            self.cache.retain_released = parse_flag(ENV_RETAIN_RELEASED, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_DESCRIPTOR_BYTES) {
            self.max_descriptor_bytes = parse_value(ENV_MAX_DESCRIPTOR_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_DEVICE_ORDINAL) {
            self.device_ordinal = parse_value(ENV_DEVICE_ORDINAL, &value)?;
        }
        Ok(())
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Reads a TOML file, then applies environment overrides on top.
    #[cfg(feature = "toml-config")]
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: err.to_string(),
        })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(lookup(&[
                (ENV_MAX_ENTRIES, "16"),
                (ENV_RETAIN_RELEASED, "off"),
                (ENV_DEVICE_ORDINAL, "3"),
            ]))
            .unwrap();
        assert_eq!(config.cache.max_entries, 16);
        assert!(!config.cache.retain_released);
        assert_eq!(config.device_ordinal, 3);
        assert_eq!(config.max_descriptor_bytes, DEFAULT_MAX_DESCRIPTOR_BYTES);
    }

    #[test]
    fn malformed_env_value_is_reported() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_env(lookup(&[(ENV_MAX_ENTRIES, "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_ENTRIES));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let config = ServiceConfig::from_toml_str("[cache]\nmax_entries = 8\n").unwrap();
        assert_eq!(config.cache.max_entries, 8);
        assert!(config.cache.retain_released);
        assert_eq!(config.device_ordinal, 0);
    }
}
