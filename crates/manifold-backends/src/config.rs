//! Device configuration
//!
//! A [`DeviceConfig`] is a mode tag plus a string-keyed settings map, the
//! shape accepted by `Device::setup`. Recognized keys are driver-specific;
//! unknown keys are ignored so callers can share one property set across
//! modes.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BackendError, Result};

/// A single configuration setting value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl SettingValue {
    /// Interpret the value as an integer.
    ///
    /// String values that parse as integers are accepted, matching the
    /// text-based property lists this configuration shape comes from.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(v) => Some(*v),
            SettingValue::Str(s) => s.trim().parse().ok(),
            SettingValue::Bool(_) => None,
        }
    }

    /// Interpret the value as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Str(s) => f.write_str(s),
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Str(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Str(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        SettingValue::Int(v as i64)
    }
}

impl From<usize> for SettingValue {
    fn from(v: usize) -> Self {
        SettingValue::Int(v as i64)
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

/// Mode tag plus driver-specific settings
///
/// ```
/// use manifold_backends::config::DeviceConfig;
///
/// let config = DeviceConfig::new("host-parallel")
///     .set("schedule", "dynamic")
///     .set("chunk", 64);
/// assert_eq!(config.mode_str(), "host-parallel");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    mode: String,
    settings: BTreeMap<String, SettingValue>,
}

impl DeviceConfig {
    /// Create a configuration for the given mode tag
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            settings: BTreeMap::new(),
        }
    }

    /// Add or replace a setting
    pub fn set(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// The configured mode tag, unparsed
    pub fn mode_str(&self) -> &str {
        &self.mode
    }

    /// Raw setting lookup
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.settings.get(key)
    }

    /// Integer setting; present-but-non-integer values are configuration errors
    pub fn int_setting(&self, key: &str) -> Result<Option<i64>> {
        match self.settings.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_int()
                .map(Some)
                .ok_or_else(|| BackendError::config(format!("setting '{key}' must be an integer, got '{value}'"))),
        }
    }

    /// String setting; present-but-non-string values are configuration errors
    pub fn str_setting(&self, key: &str) -> Result<Option<&str>> {
        match self.settings.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| BackendError::config(format!("setting '{key}' must be a string, got '{value}'"))),
        }
    }

    /// Strictly positive integer setting
    pub fn positive_setting(&self, key: &str) -> Result<Option<usize>> {
        match self.int_setting(key)? {
            None => Ok(None),
            Some(v) if v > 0 => Ok(Some(v as usize)),
            Some(v) => Err(BackendError::config(format!(
                "setting '{key}' must be a positive integer, got {v}"
            ))),
        }
    }
}
