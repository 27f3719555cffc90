//! References to pluggable functions (extent masks, fuse functions).
//!
//! Functions are referenced by dotted name, either as a bare string or as a
//! mapping with call arguments. The engine only validates and compares
//! references; binding them to code is the renderer's business.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult};
use crate::fragment::optional_bool;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionRef {
    /// Dotted path, e.g. `datacube_ows.ogc_utils.mask_by_val`.
    pub function: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub pass_product_cfg: bool,
    pub mapped_bands: bool,
}

impl FunctionRef {
    pub fn named(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            pass_product_cfg: false,
            mapped_bands: false,
        }
    }

    pub fn parse(cfg: &Value, context: &str) -> ConfigResult<Self> {
        match cfg {
            Value::String(s) => Self::checked_name(s, context).map(Self::named),
            Value::Object(map) => {
                let function = match map.get("function") {
                    Some(Value::String(s)) => Self::checked_name(s, context)?,
                    _ => {
                        return Err(ConfigError::config(format!(
                            "Function mapping in {} must have a string 'function' entry",
                            context
                        )))
                    }
                };
                let args = match map.get("args") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(a)) => a.clone(),
                    Some(_) => {
                        return Err(ConfigError::config(format!(
                            "Function args in {} must be a list",
                            context
                        )))
                    }
                };
                let kwargs = match map.get("kwargs") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(k)) => k.clone(),
                    Some(_) => {
                        return Err(ConfigError::config(format!(
                            "Function kwargs in {} must be a mapping",
                            context
                        )))
                    }
                };
                Ok(Self {
                    function: function.to_string(),
                    args,
                    kwargs,
                    pass_product_cfg: optional_bool(cfg, "pass_product_cfg", false, context)?,
                    mapped_bands: optional_bool(cfg, "mapped_bands", false, context)?,
                })
            }
            _ => Err(ConfigError::config(format!(
                "Function reference in {} must be a string or a mapping",
                context
            ))),
        }
    }

    /// Parse an optional function entry; null and absent are both `None`.
    pub fn parse_optional(cfg: Option<&Value>, context: &str) -> ConfigResult<Option<Self>> {
        match cfg {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Self::parse(v, context).map(Some),
        }
    }

    fn checked_name<'a>(name: &'a str, context: &str) -> ConfigResult<&'a str> {
        if name.contains('.') && !name.starts_with('.') && !name.ends_with('.') {
            Ok(name)
        } else {
            Err(ConfigError::config(format!(
                "Function reference '{}' in {} is not a fully qualified name",
                name, context
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_and_mapping_forms() {
        let f = FunctionRef::parse(&json!("masks.valid_data"), "layer x").unwrap();
        assert_eq!(f, FunctionRef::named("masks.valid_data"));

        let f = FunctionRef::parse(
            &json!({"function": "masks.by_val", "kwargs": {"band": "red", "val": 0}, "mapped_bands": true}),
            "layer x",
        )
        .unwrap();
        assert_eq!(f.kwargs["band"], "red");
        assert!(f.mapped_bands);
        assert!(!f.pass_product_cfg);
    }

    #[test]
    fn test_equality_includes_arguments() {
        let a = FunctionRef::parse(&json!({"function": "f.g", "args": [1]}), "c").unwrap();
        let b = FunctionRef::parse(&json!({"function": "f.g", "args": [2]}), "c").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_invalid_references() {
        assert!(FunctionRef::parse(&json!("nodots"), "c").is_err());
        assert!(FunctionRef::parse(&json!(42), "c").is_err());
        assert!(FunctionRef::parse(&json!({"args": []}), "c").is_err());
        assert!(FunctionRef::parse(&json!({"function": "a.b", "args": {}}), "c").is_err());
        assert_eq!(FunctionRef::parse_optional(Some(&Value::Null), "c").unwrap(), None);
    }
}
