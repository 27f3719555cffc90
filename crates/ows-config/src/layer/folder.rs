use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{error, warn};

use super::{parse_ows_layer, LayerNode, ParentInfo, ReadyContext};
use crate::entry::{ConfigEntry, Readiness};
use crate::error::{ConfigError, ConfigResult};
use crate::fragment::{as_object, optional_str};
use crate::keyed::EntryRegistry;
use crate::metadata::{Attribution, Metadata, MetadataBearing};

/// A non-mappable grouping node.
#[derive(Debug)]
pub struct Folder {
    state: Readiness,
    /// Object label, unique across the tree (`folder.<label>`).
    pub label: String,
    pub metadata: Metadata,
    pub attribution: Option<Attribution>,
    /// Children parsed but not yet (successfully) made ready.
    unready_layers: Vec<LayerNode>,
    /// Children promoted by `make_ready`.
    child_layers: Vec<LayerNode>,
    /// Errors of children that failed to parse.
    skipped: Vec<String>,
}

impl Folder {
    pub fn parse(
        cfg: &Value,
        parent: ParentInfo<'_>,
        sibling_idx: usize,
        registry: &mut EntryRegistry,
    ) -> ConfigResult<Self> {
        let label = match optional_str(cfg, "label", "folder")? {
            Some(label) => format!("folder.{}", label),
            None => match parent.label {
                Some(parent_label) => format!("{}.{}", parent_label, sibling_idx),
                None => format!("folder.{}", sibling_idx),
            },
        };
        as_object(cfg, &label)?;
        let metadata = Metadata::parse(cfg, &label, parent.keywords)?;
        let attribution = Attribution::parse(cfg.get("attribution"), &label)?
            .or_else(|| parent.attribution.cloned());

        let children = match cfg.get("layers") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            Some(Value::Array(_)) | None => {
                return Err(ConfigError::config(format!(
                    "No layers section in {}",
                    label
                )))
            }
            Some(_) => {
                return Err(ConfigError::config(format!(
                    "Layers section in {} must be a list",
                    label
                )))
            }
        };
        registry.register_folder(&label)?;

        let mut folder = Self {
            state: Readiness::new(label.clone()),
            label,
            metadata,
            attribution,
            unready_layers: Vec::new(),
            child_layers: Vec::new(),
            skipped: Vec::new(),
        };
        folder.parse_children(children, registry, true);
        Ok(folder)
    }

    /// The hidden folder wrapping the top-level `layers` list.
    pub(crate) fn root(
        layers: &[Value],
        title: &str,
        keywords: &BTreeSet<String>,
        attribution: Option<&Attribution>,
        registry: &mut EntryRegistry,
    ) -> ConfigResult<Self> {
        if layers.is_empty() {
            return Err(ConfigError::config("No layers section in configuration"));
        }
        let label = "folder.ows_root_hidden".to_string();
        registry.register_folder(&label)?;
        let mut folder = Self {
            state: Readiness::new(label.clone()),
            label,
            metadata: Metadata {
                title: title.to_string(),
                abstract_: String::new(),
                keywords: keywords.clone(),
            },
            attribution: attribution.cloned(),
            unready_layers: Vec::new(),
            child_layers: Vec::new(),
            skipped: Vec::new(),
        };
        folder.parse_children(layers, registry, false);
        Ok(folder)
    }

    fn parse_children(&mut self, children: &[Value], registry: &mut EntryRegistry, labelled: bool) {
        let keywords = self.metadata.keywords.clone();
        let label = self.label.clone();
        let parent = ParentInfo {
            label: labelled.then_some(label.as_str()),
            keywords: &keywords,
            attribution: self.attribution.as_ref(),
        };
        let mut parsed = Vec::new();
        let mut skipped = Vec::new();
        for (idx, child) in children.iter().enumerate() {
            if !child.is_object() {
                warn!(
                    folder = %label,
                    index = idx,
                    "Non-mapping entry in layers list (trailing comma?) - skipping"
                );
                skipped.push(format!("Entry {} of {} is not a mapping", idx, label));
                continue;
            }
            match parse_ows_layer(child, parent, idx, registry) {
                Ok(node) => parsed.push(node),
                Err(e) => {
                    error!(
                        folder = %label,
                        index = idx,
                        error = %e,
                        "Could not parse layer - skipping"
                    );
                    skipped.push(e.to_string());
                }
            }
        }
        self.unready_layers = parsed;
        self.skipped = skipped;
    }

    /// Make every pending child ready. Children that fail stay pending; the
    /// folder itself always becomes ready.
    pub fn make_ready(&mut self, ctx: &ReadyContext<'_>) -> ConfigResult<()> {
        let pending = std::mem::take(&mut self.unready_layers);
        for mut child in pending {
            match child.make_ready(ctx) {
                Ok(()) => self.child_layers.push(child),
                Err(e) => {
                    error!(
                        folder = %self.label,
                        layer = %child.label(),
                        error = %e,
                        "Could not load layer"
                    );
                    self.unready_layers.push(child);
                }
            }
        }
        self.state.complete()
    }

    /// Number of ready children.
    pub fn layer_count(&self) -> usize {
        self.child_layers.len()
    }

    pub fn child_layers(&self) -> &[LayerNode] {
        &self.child_layers
    }

    pub fn child_layers_mut(&mut self) -> &mut [LayerNode] {
        &mut self.child_layers
    }

    pub fn unready_layers(&self) -> &[LayerNode] {
        &self.unready_layers
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Ready children first, then pending ones.
    pub fn all_layers(&self) -> impl Iterator<Item = &LayerNode> {
        self.child_layers.iter().chain(self.unready_layers.iter())
    }

    pub fn all_layers_mut(&mut self) -> impl Iterator<Item = &mut LayerNode> {
        self.child_layers
            .iter_mut()
            .chain(self.unready_layers.iter_mut())
    }
}

impl ConfigEntry for Folder {
    fn readiness(&self) -> &Readiness {
        &self.state
    }
}

impl MetadataBearing for Folder {
    fn metadata_label(&self) -> String {
        self.label.clone()
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
