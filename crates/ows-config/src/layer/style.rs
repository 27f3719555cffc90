//! Style entries of a named layer.
//!
//! Only the parts of a style the layer tree depends on are modelled here:
//! identity, metadata and the bands it reads. Colour ramps and band math are
//! rendering concerns.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::bands::BandIndex;
use crate::entry::{ConfigEntry, Deferred, Readiness};
use crate::error::{ConfigError, ConfigResult};
use crate::fragment::{as_object, required_str, string_list};
use crate::keyed::{EntryRegistry, InheritanceExpandable, KeyVals, KeyedLookup, LookupSubs};
use crate::metadata::{Metadata, MetadataBearing};

#[derive(Debug, Clone)]
pub struct StyleDef {
    state: Readiness,
    pub layer: String,
    pub name: String,
    pub metadata: Metadata,
    raw_needed_bands: Vec<String>,
    needed_bands: Deferred<BTreeSet<String>>,
}

impl KeyedLookup for StyleDef {
    const INDEX_KEYS: &'static [&'static str] = &["layer", "style"];

    fn lookup_impl<'a>(
        registry: &'a EntryRegistry,
        keyvals: &KeyVals,
        subs: LookupSubs<'a>,
    ) -> ConfigResult<&'a Value> {
        let layer = &keyvals["layer"];
        let style = &keyvals["style"];
        let record = subs.find_layer(registry, layer).ok_or_else(|| {
            ConfigError::EntryNotFound(format!("Could not find layer {}", layer))
        })?;
        record.styles.get(style).ok_or_else(|| {
            ConfigError::EntryNotFound(format!(
                "Could not find style {} in layer {}",
                style, layer
            ))
        })
    }
}

impl InheritanceExpandable for StyleDef {}

impl StyleDef {
    /// Expand `inherits` for a style fragment of `layer`.
    ///
    /// An inherits block naming only `style` refers to a sibling style in
    /// the same layer.
    pub fn prepare(
        cfg: Value,
        layer: &str,
        registry: &EntryRegistry,
        subs: LookupSubs<'_>,
    ) -> ConfigResult<Value> {
        let defaults = KeyVals::from([("layer".to_string(), layer.to_string())]);
        Self::prepare_fragment(cfg, registry, subs, &defaults)
    }

    /// Build a style from an already expanded fragment.
    pub fn parse(cfg: &Value, layer: &str, parent_keywords: &BTreeSet<String>) -> ConfigResult<Self> {
        let context = format!("style of layer {}", layer);
        as_object(cfg, &context)?;
        let name = required_str(cfg, "name", &context)?.to_string();
        let context = format!("style {} of layer {}", name, layer);

        let mut state = Readiness::new(context.clone());
        let needed_bands = Deferred::declare("needed_bands", &mut state)?;
        Ok(Self {
            metadata: Metadata::parse(cfg, &context, parent_keywords)?,
            raw_needed_bands: string_list(cfg, "needed_bands", &context)?,
            layer: layer.to_string(),
            name,
            state,
            needed_bands,
        })
    }

    pub fn make_ready(&mut self, band_idx: &BandIndex) -> ConfigResult<()> {
        let bands = self
            .raw_needed_bands
            .iter()
            .map(|b| band_idx.band(b).map(str::to_string))
            .collect::<ConfigResult<BTreeSet<String>>>()?;
        self.needed_bands.set(&mut self.state, bands);
        self.state.complete()
    }

    /// Canonical names of the bands this style reads.
    pub fn needed_bands(&self) -> ConfigResult<&BTreeSet<String>> {
        self.needed_bands.get(&self.state)
    }
}

impl ConfigEntry for StyleDef {
    fn readiness(&self) -> &Readiness {
        &self.state
    }
}

impl MetadataBearing for StyleDef {
    fn metadata_label(&self) -> String {
        format!("style.{}.{}", self.layer, self.name)
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyed::RegisteredLayer;
    use serde_json::json;

    #[test]
    fn test_sibling_style_inherits() {
        let registry = EntryRegistry::new();
        let mut record = RegisteredLayer::new(json!({"name": "ls8"}));
        record.styles.insert(
            "rgb".to_string(),
            json!({"name": "rgb", "title": "True colour", "needed_bands": ["red", "green", "blue"]}),
        );
        let cfg = json!({"name": "rgb_bright", "inherits": {"style": "rgb"}, "title": "Bright"});
        let expanded =
            StyleDef::prepare(cfg, "ls8", &registry, LookupSubs::with_layer("ls8", &record)).unwrap();
        assert_eq!(expanded["needed_bands"], json!(["red", "green", "blue"]));
        assert_eq!(expanded["title"], "Bright");

        let style = StyleDef::parse(&expanded, "ls8", &BTreeSet::new()).unwrap();
        assert_eq!(style.metadata_label(), "style.ls8.rgb_bright");
        assert!(style.needed_bands().unwrap_err().is_not_ready());
    }

    #[test]
    fn test_cross_layer_inherits() {
        let mut registry = EntryRegistry::new();
        let mut record = RegisteredLayer::new(json!({"name": "ls7"}));
        record
            .styles
            .insert("ndvi".to_string(), json!({"name": "ndvi", "title": "NDVI"}));
        registry.register_layer("ls7", record).unwrap();

        let cfg = json!({"name": "ndvi", "inherits": {"layer": "ls7", "style": "ndvi"}});
        let expanded = StyleDef::prepare(cfg, "ls8", &registry, LookupSubs::none()).unwrap();
        assert_eq!(expanded["title"], "NDVI");

        let cfg = json!({"name": "x", "inherits": {"layer": "ls7", "style": "ghost"}});
        let err = StyleDef::prepare(cfg, "ls8", &registry, LookupSubs::none()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_needed_bands_canonicalised() {
        let band_idx = BandIndex::parse(Some(&json!({"nbart_red": ["red"]})), "ls8").unwrap();
        let mut style = StyleDef::parse(
            &json!({"name": "red", "title": "Red", "needed_bands": ["red"]}),
            "ls8",
            &BTreeSet::new(),
        )
        .unwrap();
        style.make_ready(&band_idx).unwrap();
        assert!(style.needed_bands().unwrap().contains("nbart_red"));

        let mut bad = StyleDef::parse(
            &json!({"name": "nir", "title": "NIR", "needed_bands": ["nir"]}),
            "ls8",
            &BTreeSet::new(),
        )
        .unwrap();
        assert!(bad.make_ready(&band_idx).is_err());
        assert!(!bad.is_ready());
    }
}
