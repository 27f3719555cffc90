//! Typed accessors over raw configuration fragments.
//!
//! Fragments are untyped `serde_json::Value` trees. These helpers read one
//! key at a time and turn shape errors into `ConfigError::Config` messages that
//! name the offending key and context.

use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult};

pub type Fragment = Value;

pub fn as_object<'a>(cfg: &'a Value, context: &str) -> ConfigResult<&'a Map<String, Value>> {
    cfg.as_object()
        .ok_or_else(|| ConfigError::config(format!("Expected a mapping in {}", context)))
}

pub fn required<'a>(cfg: &'a Value, key: &str, context: &str) -> ConfigResult<&'a Value> {
    cfg.get(key).ok_or_else(|| {
        ConfigError::config(format!(
            "Required entry '{}' not present in {}",
            key, context
        ))
    })
}

pub fn required_str<'a>(cfg: &'a Value, key: &str, context: &str) -> ConfigResult<&'a str> {
    required(cfg, key, context)?.as_str().ok_or_else(|| {
        ConfigError::config(format!("Entry '{}' must be a string in {}", key, context))
    })
}

pub fn optional_str<'a>(cfg: &'a Value, key: &str, context: &str) -> ConfigResult<Option<&'a str>> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ConfigError::config(format!(
            "Entry '{}' must be a string in {}",
            key, context
        ))),
    }
}

pub fn optional_bool(cfg: &Value, key: &str, default: bool, context: &str) -> ConfigResult<bool> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ConfigError::config(format!(
            "Entry '{}' must be a boolean in {}",
            key, context
        ))),
    }
}

pub fn optional_u64(cfg: &Value, key: &str, default: u64, context: &str) -> ConfigResult<u64> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_u64().ok_or_else(|| {
            ConfigError::config(format!(
                "Entry '{}' must be a non-negative integer in {}",
                key, context
            ))
        }),
    }
}

pub fn optional_f64(cfg: &Value, key: &str, default: f64, context: &str) -> ConfigResult<f64> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_f64().ok_or_else(|| {
            ConfigError::config(format!("Entry '{}' must be a number in {}", key, context))
        }),
    }
}

/// Read a list of strings. A missing key yields an empty list.
pub fn string_list(cfg: &Value, key: &str, context: &str) -> ConfigResult<Vec<String>> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ConfigError::config(format!(
                        "Entry '{}' must be a list of strings in {}",
                        key, context
                    ))
                })
            })
            .collect(),
        Some(_) => Err(ConfigError::config(format!(
            "Entry '{}' must be a list of strings in {}",
            key, context
        ))),
    }
}

/// True when the value is an integer (signed or unsigned), as opposed to a float.
pub fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64()
}
