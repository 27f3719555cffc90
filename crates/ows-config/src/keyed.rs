//! Keyed entry lookup.
//!
//! Named layers and styles can be referenced from elsewhere in the
//! configuration (most importantly by `inherits`). The [`EntryRegistry`]
//! records the raw fragment of every entry parsed so far, and the
//! [`KeyedLookup`] trait describes how an entry type finds one of its own kind
//! from a set of key values.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::inherit::{self, INHERITANCE_EXPANDED};

/// Key values identifying an entry, e.g. `{"layer": "ls8", "style": "rgb"}`.
pub type KeyVals = BTreeMap<String, String>;

/// Raw fragments recorded for a parsed named layer.
#[derive(Debug, Clone, Default)]
pub struct RegisteredLayer {
    /// The layer's fragment after inheritance expansion.
    pub raw: Value,
    /// Style fragments (after inheritance expansion) keyed by style name.
    pub styles: BTreeMap<String, Value>,
}

impl RegisteredLayer {
    pub fn new(raw: Value) -> Self {
        Self {
            raw,
            styles: BTreeMap::new(),
        }
    }
}

/// Registry of every entry parsed so far, used for cross-references and
/// global uniqueness checks.
#[derive(Debug, Default)]
pub struct EntryRegistry {
    layers: BTreeMap<String, RegisteredLayer>,
    folder_labels: BTreeSet<String>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a folder's object label. Labels are unique across the tree.
    pub fn register_folder(&mut self, label: &str) -> ConfigResult<()> {
        if !self.folder_labels.insert(label.to_string()) {
            return Err(ConfigError::config(format!(
                "Duplicate folder label: {}",
                label
            )));
        }
        Ok(())
    }

    /// Record a named layer. Names are unique across the tree.
    pub fn register_layer(&mut self, name: &str, record: RegisteredLayer) -> ConfigResult<()> {
        if self.layers.contains_key(name) {
            return Err(ConfigError::config(format!("Duplicate layer name: {}", name)));
        }
        self.layers.insert(name.to_string(), record);
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Option<&RegisteredLayer> {
        self.layers.get(name)
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    pub fn has_folder(&self, label: &str) -> bool {
        self.folder_labels.contains(label)
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }
}

/// Entries not yet published to the registry that a lookup should consult
/// first, such as the layer currently being parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupSubs<'a> {
    pub layer: Option<(&'a str, &'a RegisteredLayer)>,
}

impl<'a> LookupSubs<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_layer(name: &'a str, record: &'a RegisteredLayer) -> Self {
        Self {
            layer: Some((name, record)),
        }
    }

    /// Find a layer by name, preferring the substitution.
    pub fn find_layer(&self, registry: &'a EntryRegistry, name: &str) -> Option<&'a RegisteredLayer> {
        match self.layer {
            Some((sub_name, record)) if sub_name == name => Some(record),
            _ => registry.layer(name),
        }
    }
}

/// An entry type that can be found in the registry by its index keys.
pub trait KeyedLookup {
    /// Keys that together identify one entry of this type.
    const INDEX_KEYS: &'static [&'static str];

    /// Find the raw fragment of the entry identified by `keyvals`.
    fn lookup_impl<'a>(
        registry: &'a EntryRegistry,
        keyvals: &KeyVals,
        subs: LookupSubs<'a>,
    ) -> ConfigResult<&'a Value>;

    /// Validate that every index key is supplied, then delegate to
    /// [`KeyedLookup::lookup_impl`].
    fn lookup<'a>(
        registry: &'a EntryRegistry,
        keyvals: &KeyVals,
        subs: LookupSubs<'a>,
    ) -> ConfigResult<&'a Value> {
        for key in Self::INDEX_KEYS {
            if !keyvals.contains_key(*key) {
                return Err(ConfigError::config(format!(
                    "Key value {} missing from keyvals: {:?}",
                    key, keyvals
                )));
            }
        }
        Self::lookup_impl(registry, keyvals, subs)
    }
}

/// A keyed entry whose fragment may carry an `inherits` pointer.
pub trait InheritanceExpandable: KeyedLookup {
    /// Merge `cfg` over its parent, if it names one.
    fn expand_inherit(
        cfg: Value,
        registry: &EntryRegistry,
        subs: LookupSubs<'_>,
        defaults: &KeyVals,
    ) -> ConfigResult<Value>
    where
        Self: Sized,
    {
        inherit::expand_inherit::<Self>(cfg, registry, subs, defaults)
    }

    /// Prepare a fragment for construction: expand inheritance unless an
    /// earlier pass already did.
    fn prepare_fragment(
        cfg: Value,
        registry: &EntryRegistry,
        subs: LookupSubs<'_>,
        defaults: &KeyVals,
    ) -> ConfigResult<Value>
    where
        Self: Sized,
    {
        if cfg.get(INHERITANCE_EXPANDED).and_then(Value::as_bool) == Some(true) {
            return Ok(cfg);
        }
        Self::expand_inherit(cfg, registry, subs, defaults)
    }
}
