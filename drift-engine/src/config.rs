//! Typed key-value configuration.
//!
//! Values are stored as JSON. Keys are dotted paths (`collector.timeout-secs`)
//! resolved against nested maps; a literal key containing dots is found
//! first when present. Accessors never panic on a type mismatch: `get_*`
//! returns `None`, `try_get_*` reports the mismatch.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::remote::DEFAULT_TIMEOUT;

/// Delete resources that exist remotely but are absent from the input.
pub const DELETE_ORPHANS: &str = "delete-orphans";
/// Timeout in seconds for a collector listing.
pub const COLLECTOR_TIMEOUT_SECS: &str = "collector.timeout-secs";
/// Timeout in seconds for a single change handler call.
pub const HANDLER_TIMEOUT_SECS: &str = "handler.timeout-secs";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration key '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("invalid option '{0}', expected key=value")]
    InvalidOption(String),

    #[error("configuration root must be a map")]
    NotAMap,

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Typed key-value store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: Map<String, Value>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            _ => Err(ConfigError::NotAMap),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_json_value(value)
    }

    /// Set a value at a dotted key, creating intermediate maps.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }

    /// Apply a `key=value` option. Values parse as YAML scalars so that
    /// `true`, `42` and `[a, b]` keep their types.
    pub fn with_option(self, option: &str) -> Result<Self, ConfigError> {
        let (key, raw) = option
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidOption(option.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidOption(option.to_string()));
        }
        let value = serde_yaml::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(self.with(key, value))
    }

    /// Overlay another configuration; its values win.
    pub fn merged(mut self, other: &Configuration) -> Self {
        for (k, v) in &other.values {
            merge_value(self.values.entry(k.clone()).or_insert(Value::Null), v);
        }
        self
    }

    fn set(&mut self, key: &str, value: Value) {
        let mut parts = key.split('.').peekable();
        let mut current = &mut self.values;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                current.insert(part.to_string(), value);
                return;
            }
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.values.get(key) {
            return Some(v);
        }
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.values.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn try_get_string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(mismatch(key, "string")),
        }
    }

    pub fn try_get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => s
                .parse::<bool>()
                .map(Some)
                .map_err(|_| mismatch(key, "boolean")),
            Some(_) => Err(mismatch(key, "boolean")),
        }
    }

    pub fn try_get_i64(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| mismatch(key, "integer")),
            Some(Value::String(s)) => s.parse().map(Some).map_err(|_| mismatch(key, "integer")),
            Some(_) => Err(mismatch(key, "integer")),
        }
    }

    pub fn try_get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.try_get_i64(key)? {
            None => Ok(None),
            Some(n) => u64::try_from(n)
                .map(Some)
                .map_err(|_| mismatch(key, "non-negative integer")),
        }
    }

    pub fn try_get_string_list(&self, key: &str) -> Result<Option<Vec<String>>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    _ => Err(mismatch(key, "list of strings")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(Value::String(s)) => Ok(Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            Some(_) => Err(mismatch(key, "list of strings")),
        }
    }

    pub fn try_get_config(&self, key: &str) -> Result<Option<Configuration>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Configuration { values: map.clone() })),
            Some(_) => Err(mismatch(key, "map")),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.try_get_string(key).ok().flatten()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.try_get_bool(key).ok().flatten()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.try_get_i64(key).ok().flatten()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.try_get_u64(key).ok().flatten()
    }

    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.try_get_string_list(key).ok().flatten()
    }

    pub fn get_config(&self, key: &str) -> Option<Configuration> {
        self.try_get_config(key).ok().flatten()
    }

    /// A duration given in whole seconds, or `default` when unset.
    pub fn duration_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .try_get_u64(key)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    }

    pub fn delete_orphans(&self) -> Result<bool, ConfigError> {
        Ok(self.try_get_bool(DELETE_ORPHANS)?.unwrap_or(false))
    }

    pub fn collector_timeout(&self) -> Result<Duration, ConfigError> {
        self.duration_secs(COLLECTOR_TIMEOUT_SECS, DEFAULT_TIMEOUT)
    }

    pub fn handler_timeout(&self) -> Result<Duration, ConfigError> {
        self.duration_secs(HANDLER_TIMEOUT_SECS, DEFAULT_TIMEOUT)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn mismatch(key: &str, expected: &'static str) -> ConfigError {
    ConfigError::TypeMismatch {
        key: key.to_string(),
        expected,
    }
}

fn merge_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                merge_value(base.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
