//! The layer tree: folders and named layers.

mod folder;
mod named;
mod style;

pub use folder::Folder;
pub use named::{ImageProcessing, NamedLayer, NativeSpec};
pub use style::StyleDef;

use std::collections::BTreeSet;

use serde_json::Value;

use crate::crs::CrsTable;
use crate::datacube::DatacubeIndex;
use crate::error::ConfigResult;
use crate::global::Services;
use crate::keyed::EntryRegistry;
use crate::metadata::Attribution;
use crate::ranges::RangeStore;

/// What a layer fragment describes, decided once from its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Folder,
    SingleProduct,
    MultiProduct,
}

impl LayerKind {
    /// A fragment without `name` is a folder; `multi_product` selects the
    /// named layer variant.
    pub fn of(cfg: &Value) -> Self {
        if cfg.get("name").is_none() {
            LayerKind::Folder
        } else if cfg.get("multi_product").and_then(Value::as_bool) == Some(true) {
            LayerKind::MultiProduct
        } else {
            LayerKind::SingleProduct
        }
    }
}

/// Everything `make_ready` needs from the outside world.
#[derive(Clone, Copy)]
pub struct ReadyContext<'a> {
    pub index: &'a dyn DatacubeIndex,
    pub ranges: &'a dyn RangeStore,
    pub crs: &'a CrsTable,
    pub services: Services,
    /// Range maintenance in progress: range failures are logged as errors.
    pub maintenance_mode: bool,
}

/// Inherited context passed from a folder to its children.
#[derive(Debug, Clone, Copy)]
pub struct ParentInfo<'a> {
    /// Object label of the parent folder, `None` for the hidden root.
    pub label: Option<&'a str>,
    pub keywords: &'a BTreeSet<String>,
    pub attribution: Option<&'a Attribution>,
}

/// A node of the layer tree.
#[derive(Debug)]
pub enum LayerNode {
    Folder(Box<Folder>),
    Named(Box<NamedLayer>),
}

impl LayerNode {
    pub fn make_ready(&mut self, ctx: &ReadyContext<'_>) -> ConfigResult<()> {
        match self {
            LayerNode::Folder(f) => f.make_ready(ctx),
            LayerNode::Named(l) => l.make_ready(ctx),
        }
    }

    /// Folder label or layer name.
    pub fn label(&self) -> &str {
        match self {
            LayerNode::Folder(f) => &f.label,
            LayerNode::Named(l) => &l.name,
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            LayerNode::Folder(_) => LayerKind::Folder,
            LayerNode::Named(l) => l.kind,
        }
    }

    pub fn is_ready(&self) -> bool {
        use crate::entry::ConfigEntry;
        match self {
            LayerNode::Folder(f) => f.is_ready(),
            LayerNode::Named(l) => l.is_ready(),
        }
    }

    /// Visit every named layer below (and including) this node, ready or
    /// not.
    pub fn for_each_named<'a>(&'a self, visit: &mut dyn FnMut(&'a NamedLayer)) {
        match self {
            LayerNode::Named(l) => visit(&**l),
            LayerNode::Folder(f) => {
                for child in f.all_layers() {
                    child.for_each_named(visit);
                }
            }
        }
    }

    pub fn for_each_named_mut(&mut self, visit: &mut dyn FnMut(&mut NamedLayer)) {
        match self {
            LayerNode::Named(l) => visit(&mut **l),
            LayerNode::Folder(f) => {
                for child in f.all_layers_mut() {
                    child.for_each_named_mut(visit);
                }
            }
        }
    }
}

/// Parse one entry of a `layers` list into a tree node.
pub fn parse_ows_layer(
    cfg: &Value,
    parent: ParentInfo<'_>,
    sibling_idx: usize,
    registry: &mut EntryRegistry,
) -> ConfigResult<LayerNode> {
    match LayerKind::of(cfg) {
        LayerKind::Folder => {
            Folder::parse(cfg, parent, sibling_idx, registry).map(|f| LayerNode::Folder(Box::new(f)))
        }
        kind => NamedLayer::parse(cfg.clone(), kind, parent, registry)
            .map(|l| LayerNode::Named(Box::new(l))),
    }
}
