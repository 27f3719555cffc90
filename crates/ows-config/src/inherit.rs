//! Deep-merge inheritance (`inherits`).
//!
//! A child fragment is merged over its parent: mappings merge key-wise,
//! everything else (sequences included) is replaced outright by the child's
//! value.

use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::keyed::{EntryRegistry, KeyVals, KeyedLookup, LookupSubs};

pub const INHERITS_KEY: &str = "inherits";

/// Marker set on merged fragments so they are never expanded twice.
pub const INHERITANCE_EXPANDED: &str = "inheritance_expanded";

/// Merge `child` over `parent`. Child values win; nested mappings merge.
pub fn deep_merge(parent: &Value, child: &Value) -> Value {
    match (parent, child) {
        (Value::Object(pm), Value::Object(cm)) => {
            let mut merged = pm.clone();
            for (key, child_val) in cm {
                let value = match pm.get(key) {
                    Some(parent_val) => deep_merge(parent_val, child_val),
                    None => child_val.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (_, child) => child.clone(),
    }
}

/// Resolve `cfg["inherits"]` against the registry (or inline) and merge.
///
/// When `inherits` supplies every index key of `E` (falling back to
/// `defaults`), the parent is the registered entry with those keys; otherwise
/// `inherits` is itself the parent fragment.
pub fn expand_inherit<'a, E>(
    cfg: Value,
    registry: &'a EntryRegistry,
    subs: LookupSubs<'a>,
    defaults: &KeyVals,
) -> ConfigResult<Value>
where
    E: KeyedLookup + ?Sized,
{
    let Some(inherits) = cfg.get(INHERITS_KEY) else {
        return Ok(cfg);
    };
    let inherits_map = inherits
        .as_object()
        .ok_or_else(|| ConfigError::config("'inherits' must be a mapping"))?;

    let mut keyvals = KeyVals::new();
    let mut by_lookup = true;
    for key in E::INDEX_KEYS {
        let value = match inherits_map.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(ConfigError::config(format!(
                    "Inherited key '{}' must be a string, got {}",
                    key, other
                )))
            }
            None => defaults.get(*key).cloned(),
        };
        match value {
            Some(v) => {
                keyvals.insert(key.to_string(), v);
            }
            None => {
                by_lookup = false;
                break;
            }
        }
    }

    let parent = if by_lookup {
        E::lookup(registry, &keyvals, subs)?.clone()
    } else {
        inherits.clone()
    };

    let mut merged = deep_merge(&parent, &cfg);
    if let Value::Object(map) = &mut merged {
        map.insert(INHERITANCE_EXPANDED.to_string(), Value::Bool(true));
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyed::RegisteredLayer;
    use serde_json::json;

    struct Layerish;

    impl KeyedLookup for Layerish {
        const INDEX_KEYS: &'static [&'static str] = &["layer"];

        fn lookup_impl<'a>(
            registry: &'a EntryRegistry,
            keyvals: &KeyVals,
            subs: LookupSubs<'a>,
        ) -> ConfigResult<&'a Value> {
            let name = &keyvals["layer"];
            subs.find_layer(registry, name)
                .map(|r| &r.raw)
                .ok_or_else(|| ConfigError::EntryNotFound(format!("Could not find layer {}", name)))
        }
    }

    #[test]
    fn test_disjoint_merge_is_union() {
        let parent = json!({"a": 1, "nested": {"x": 1}});
        let child = json!({"b": 2, "other": {"y": 2}});
        assert_eq!(
            deep_merge(&parent, &child),
            json!({"a": 1, "b": 2, "nested": {"x": 1}, "other": {"y": 2}})
        );
    }

    #[test]
    fn test_self_merge_is_identity() {
        let cfg = json!({"bands": {"red": ["r"]}, "styles": [1, 2, 3], "title": "t"});
        assert_eq!(deep_merge(&cfg, &cfg), cfg);
    }

    #[test]
    fn test_lists_replaced_maps_merged() {
        let parent = json!({"styles": [1, 2], "limits": {"wms": {"max": 5, "min": 1}}});
        let child = json!({"styles": [3], "limits": {"wms": {"max": 10}}});
        assert_eq!(
            deep_merge(&parent, &child),
            json!({"styles": [3], "limits": {"wms": {"max": 10, "min": 1}}})
        );
    }

    #[test]
    fn test_child_scalar_replaces_parent_map() {
        let parent = json!({"a": {"x": 1}});
        let child = json!({"a": null});
        assert_eq!(deep_merge(&parent, &child), json!({"a": null}));
    }

    #[test]
    fn test_expand_from_registry() {
        let mut registry = EntryRegistry::new();
        registry
            .register_layer(
                "parent",
                RegisteredLayer::new(json!({"name": "parent", "title": "Parent", "keep": [1]})),
            )
            .unwrap();
        let cfg = json!({"name": "child", "inherits": {"layer": "parent"}});
        let merged =
            expand_inherit::<Layerish>(cfg, &registry, LookupSubs::none(), &KeyVals::new()).unwrap();
        assert_eq!(merged["name"], "child");
        assert_eq!(merged["title"], "Parent");
        assert_eq!(merged["keep"], json!([1]));
        assert_eq!(merged[INHERITANCE_EXPANDED], true);
    }

    #[test]
    fn test_expand_inline_parent() {
        let registry = EntryRegistry::new();
        let cfg = json!({"name": "child", "inherits": {"title": "Inline"}});
        let merged =
            expand_inherit::<Layerish>(cfg, &registry, LookupSubs::none(), &KeyVals::new()).unwrap();
        assert_eq!(merged["title"], "Inline");
    }

    #[test]
    fn test_expand_missing_parent() {
        let registry = EntryRegistry::new();
        let cfg = json!({"name": "child", "inherits": {"layer": "ghost"}});
        let err = expand_inherit::<Layerish>(cfg, &registry, LookupSubs::none(), &KeyVals::new())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_no_inherits_unchanged() {
        let registry = EntryRegistry::new();
        let cfg = json!({"name": "plain"});
        let out = expand_inherit::<Layerish>(cfg.clone(), &registry, LookupSubs::none(), &KeyVals::new())
            .unwrap();
        assert_eq!(out, cfg);
    }
}
