//! The configuration root.
//!
//! [`OwsConfig`] owns the published CRS table, service settings, tile
//! matrix sets and the layer tree. It is parsed from an expanded
//! configuration fragment and made ready against a datacube index and a
//! range store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::crs::{Crs, CrsTable};
use crate::datacube::DatacubeIndex;
use crate::entry::{ConfigEntry, Deferred, Readiness};
use crate::error::{ConfigError, ConfigResult};
use crate::expand::ModuleRegistry;
use crate::fragment::{
    as_object, optional_bool, optional_str, optional_u64, required, required_str, string_list,
};
use crate::keyed::EntryRegistry;
use crate::layer::{Folder, LayerNode, NamedLayer, ReadyContext};
use crate::metadata::{Attribution, MessageCatalogue, Metadata, MetadataBearing};
use crate::ranges::{compute_ranges, RangeStore};
use crate::source::read_config;
use crate::tile::{parse_tile_matrix_sets, TileMatrixSet};

pub const DEFAULT_MAX_TILE_SIZE: u32 = 256;
pub const DEFAULT_LOCALE: &str = "en";

/// Which OGC services are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Services {
    pub wms: bool,
    pub wcs: bool,
    pub wmts: bool,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            wms: true,
            wcs: false,
            wmts: true,
        }
    }
}

impl Services {
    fn parse(cfg: Option<&Value>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let Some(cfg) = cfg else {
            return Ok(defaults);
        };
        let services = Self {
            wms: optional_bool(cfg, "wms", defaults.wms, "services")?,
            wcs: optional_bool(cfg, "wcs", defaults.wcs, "services")?,
            wmts: optional_bool(cfg, "wmts", defaults.wmts, "services")?,
        };
        if !(services.wms || services.wcs || services.wmts) {
            return Err(ConfigError::config(
                "At least one service must be active (wms, wcs or wmts)",
            ));
        }
        Ok(services)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactAddress {
    #[serde(rename = "type")]
    pub address_type: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactInfo {
    pub person: Option<String>,
    pub organisation: Option<String>,
    pub position: Option<String>,
    pub address: Option<ContactAddress>,
    pub telephone: Option<String>,
    pub fax: Option<String>,
    pub email: Option<String>,
}

/// The `wms` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WmsSettings {
    pub max_width: u32,
    pub max_height: u32,
    /// Authority name to URL.
    pub authorities: BTreeMap<String, String>,
}

impl WmsSettings {
    fn parse(cfg: Option<&Value>) -> ConfigResult<Self> {
        let empty = Value::Object(Default::default());
        let cfg = cfg.unwrap_or(&empty);
        let dimension = |key: &str| -> ConfigResult<u32> {
            let v = optional_u64(cfg, key, u64::from(DEFAULT_MAX_TILE_SIZE), "wms")?;
            u32::try_from(v)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::config(format!("wms {} must be a positive integer", key)))
        };
        let authorities = match cfg.get("authorities") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                ConfigError::config(format!("wms authorities must map names to URLs: {}", e))
            })?,
        };
        Ok(Self {
            max_width: dimension("max_width")?,
            max_height: dimension("max_height")?,
            authorities,
        })
    }
}

/// One WCS output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WcsFormat {
    pub name: String,
    pub mime: String,
    pub extension: String,
    pub multi_time: bool,
}

/// The `wcs` section. Only present when WCS is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WcsSettings {
    pub formats: BTreeMap<String, WcsFormat>,
    pub native_format: String,
}

impl WcsSettings {
    fn parse(cfg: Option<&Value>) -> ConfigResult<Self> {
        let cfg = cfg.ok_or_else(|| {
            ConfigError::config("WCS section missing (and WCS is enabled)")
        })?;
        let formats_cfg = as_object(required(cfg, "formats", "wcs")?, "wcs formats")?;
        if formats_cfg.is_empty() {
            return Err(ConfigError::config("WCS formats section is empty"));
        }
        let mut formats = BTreeMap::new();
        for (name, fmt) in formats_cfg {
            let context = format!("wcs format {}", name);
            formats.insert(
                name.clone(),
                WcsFormat {
                    name: name.clone(),
                    mime: required_str(fmt, "mime", &context)?.to_string(),
                    extension: required_str(fmt, "extension", &context)?.to_string(),
                    multi_time: optional_bool(fmt, "multi-time", false, &context)?,
                },
            );
        }
        let native_format = required_str(cfg, "native_format", "wcs")?.to_string();
        if !formats.contains_key(&native_format) {
            return Err(ConfigError::config(format!(
                "Configured native format {} not a supported format",
                native_format
            )));
        }
        Ok(Self {
            formats,
            native_format,
        })
    }
}

/// Outcome of a range maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeUpdateSummary {
    pub updated: Vec<String>,
    /// Layers whose products have no datasets.
    pub empty: Vec<String>,
    /// Layer name and error text.
    pub failed: Vec<(String, String)>,
}

/// The resolved configuration tree.
#[derive(Debug)]
pub struct OwsConfig {
    state: Readiness,
    pub services: Services,
    pub metadata: Metadata,
    pub info_url: Option<String>,
    pub allowed_urls: Vec<String>,
    pub contact_info: Option<ContactInfo>,
    pub attribution: Option<Attribution>,
    pub fees: Option<String>,
    pub access_constraints: Option<String>,
    pub default_locale: String,
    pub locales: Vec<String>,
    pub message_file: Option<PathBuf>,
    pub translations_directory: Option<PathBuf>,
    pub response_headers: BTreeMap<String, String>,
    pub crs_table: CrsTable,
    pub wms: WmsSettings,
    pub wcs: Option<WcsSettings>,
    pub tile_matrix_sets: BTreeMap<String, TileMatrixSet>,
    root: Folder,
    registry: EntryRegistry,
    messages: Deferred<Option<MessageCatalogue>>,
    live_crs: Deferred<BTreeMap<String, Crs>>,
}

impl OwsConfig {
    /// Read, expand and parse a configuration.
    pub fn load(path: Option<&str>, modules: &ModuleRegistry) -> ConfigResult<Self> {
        let cfg = read_config(path, modules)?;
        Self::parse(&cfg)
    }

    /// Parse an expanded configuration fragment.
    pub fn parse(cfg: &Value) -> ConfigResult<Self> {
        as_object(cfg, "configuration")?;
        let global = required(cfg, "global", "configuration")?;
        as_object(global, "global section")?;

        let services = Services::parse(global.get("services"))?;
        let metadata = Metadata::parse(global, "global section", &BTreeSet::new())?;
        let allowed_urls = match required(global, "allowed_urls", "global section")? {
            Value::String(s) => vec![s.clone()],
            _ => string_list(global, "allowed_urls", "global section")?,
        };
        if allowed_urls.is_empty() {
            return Err(ConfigError::config("allowed_urls must not be empty"));
        }
        let contact_info = match global.get("contact_info") {
            None | Some(Value::Null) => None,
            Some(v) => Some(serde_json::from_value(v.clone()).map_err(|e| {
                ConfigError::config(format!("Invalid contact_info: {}", e))
            })?),
        };
        let attribution = Attribution::parse(global.get("attribution"), "global section")?;

        let (default_locale, locales) = Self::parse_locales(global)?;
        let response_headers = match global.get("response_headers") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                ConfigError::config(format!("response_headers must map names to strings: {}", e))
            })?,
        };

        let crs_table = CrsTable::parse(
            required(global, "published_CRSs", "global section")?,
            services.wcs,
        )?;
        let wms = WmsSettings::parse(cfg.get("wms"))?;
        let wcs = if services.wcs {
            Some(WcsSettings::parse(cfg.get("wcs"))?)
        } else {
            None
        };
        let tile_matrix_sets = parse_tile_matrix_sets(
            cfg.get("wmts").and_then(|w| w.get("tile_matrix_sets")),
            &crs_table,
        )?;

        let layers = match cfg.get("layers") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Err(ConfigError::config("No layers section in configuration")),
        };
        let mut registry = EntryRegistry::new();
        let root = Folder::root(
            layers,
            &metadata.title,
            &metadata.keywords,
            attribution.as_ref(),
            &mut registry,
        )?;

        let mut state = Readiness::new("global configuration");
        let messages = Deferred::declare("messages", &mut state)?;
        let live_crs = Deferred::declare("live_crs", &mut state)?;

        Ok(Self {
            state,
            services,
            info_url: optional_str(global, "info_url", "global section")?.map(str::to_string),
            fees: optional_str(global, "fees", "global section")?.map(str::to_string),
            access_constraints: optional_str(global, "access_constraints", "global section")?
                .map(str::to_string),
            message_file: optional_str(global, "message_file", "global section")?.map(PathBuf::from),
            translations_directory: optional_str(global, "translations_directory", "global section")?
                .map(PathBuf::from),
            metadata,
            allowed_urls,
            contact_info,
            attribution,
            default_locale,
            locales,
            response_headers,
            crs_table,
            wms,
            wcs,
            tile_matrix_sets,
            root,
            registry,
            messages,
            live_crs,
        })
    }

    fn parse_locales(global: &Value) -> ConfigResult<(String, Vec<String>)> {
        let locales = string_list(global, "locales", "global section")?;
        let default_locale = optional_str(global, "default_locale", "global section")?;
        match (default_locale, locales.is_empty()) {
            (None, true) => Ok((DEFAULT_LOCALE.to_string(), vec![DEFAULT_LOCALE.to_string()])),
            (Some(d), true) => Ok((d.to_string(), vec![d.to_string()])),
            (None, false) => Ok((locales[0].clone(), locales)),
            (Some(d), false) => {
                if !locales.iter().any(|l| l == d) {
                    return Err(ConfigError::config(format!(
                        "default_locale {} is not one of the configured locales",
                        d
                    )));
                }
                Ok((d.to_string(), locales))
            }
        }
    }

    /// Validate the whole tree against the index and range store.
    pub fn make_ready(&mut self, index: &dyn DatacubeIndex, ranges: &dyn RangeStore) -> ConfigResult<()> {
        self.make_ready_with(index, ranges, false)
    }

    pub fn make_ready_with(
        &mut self,
        index: &dyn DatacubeIndex,
        ranges: &dyn RangeStore,
        maintenance_mode: bool,
    ) -> ConfigResult<()> {
        let messages = match &self.message_file {
            None => None,
            Some(path) => match MessageCatalogue::load(path) {
                Ok(catalogue) => {
                    info!(path = %path.display(), messages = catalogue.len(), "Loaded message file");
                    Some(catalogue)
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Message file could not be read - using inline metadata"
                    );
                    None
                }
            },
        };
        self.messages.set(&mut self.state, messages);

        let live = self.crs_table.live_table()?;
        self.live_crs.set(&mut self.state, live);

        let ctx = ReadyContext {
            index,
            ranges,
            crs: &self.crs_table,
            services: self.services,
            maintenance_mode,
        };
        self.root.make_ready(&ctx)?;
        self.state.complete()
    }

    /// Recompute and store the ranges of every named layer, then reload
    /// them into the tree.
    pub fn update_ranges(
        &mut self,
        index: &dyn DatacubeIndex,
        store: &dyn RangeStore,
    ) -> ConfigResult<RangeUpdateSummary> {
        let mut summary = RangeUpdateSummary::default();
        let crs_table = &self.crs_table;
        for node in self.root.all_layers_mut() {
            node.for_each_named_mut(&mut |layer: &mut NamedLayer| {
                let outcome = layer
                    .product_names
                    .resolve(index, &format!("layer {}", layer.name))
                    .and_then(|(products, _)| {
                        compute_ranges(index, &products, layer.time_resolution, crs_table)
                    })
                    .and_then(|ranges| match ranges {
                        Some(r) => store.put_range(&layer.name, r).map(|_| true),
                        None => Ok(false),
                    });
                match outcome {
                    Ok(true) => {
                        info!(layer = %layer.name, "Updated ranges");
                        layer.force_range_update(store, true);
                        summary.updated.push(layer.name.clone());
                    }
                    Ok(false) => {
                        warn!(layer = %layer.name, "No datasets found for layer");
                        summary.empty.push(layer.name.clone());
                    }
                    Err(e) => {
                        error!(layer = %layer.name, error = %e, "Range update failed");
                        summary.failed.push((layer.name.clone(), e.to_string()));
                    }
                }
            });
        }
        Ok(summary)
    }

    /// The hidden root folder.
    pub fn layers(&self) -> &Folder {
        &self.root
    }

    /// Named layers promoted into the live tree, by name.
    pub fn layer_index(&self) -> BTreeMap<&str, &NamedLayer> {
        let mut index = BTreeMap::new();
        collect_promoted(&self.root, &mut index);
        index
    }

    pub fn layer(&self, name: &str) -> Option<&NamedLayer> {
        self.layer_index().get(name).copied()
    }

    /// A promoted layer, mutably, for refreshing dynamic ranges at request
    /// time.
    pub fn layer_mut(&mut self, name: &str) -> Option<&mut NamedLayer> {
        find_promoted_mut(&mut self.root, name)
    }

    /// Every named layer in the tree, promoted or pending.
    pub fn all_named_layers(&self) -> Vec<&NamedLayer> {
        let mut out = Vec::new();
        for node in self.root.all_layers() {
            node.for_each_named(&mut |l| out.push(l));
        }
        out
    }

    /// Products backing ready layers that publish an extent.
    pub fn active_products(&self) -> BTreeSet<String> {
        self.layer_index()
            .values()
            .filter(|l| l.is_ready() && l.has_ranges())
            .filter_map(|l| l.products().ok())
            .flat_map(|products| products.iter().map(|p| p.name.clone()))
            .collect()
    }

    /// Product name to the ready layers it backs.
    pub fn native_product_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for layer in self.layer_index().values().filter(|l| l.is_ready()) {
            for product in &layer.product_names.names {
                index.entry(product.clone()).or_default().push(layer.name.clone());
            }
        }
        index
    }

    pub fn registry(&self) -> &EntryRegistry {
        &self.registry
    }

    pub fn messages(&self) -> ConfigResult<Option<&MessageCatalogue>> {
        self.messages.get(&self.state).map(Option::as_ref)
    }

    pub fn live_crs(&self, name: &str) -> ConfigResult<Option<&Crs>> {
        self.live_crs.get(&self.state).map(|table| table.get(name))
    }

    pub fn wcs_enabled(&self) -> bool {
        self.services.wcs
    }
}

fn collect_promoted<'a>(folder: &'a Folder, out: &mut BTreeMap<&'a str, &'a NamedLayer>) {
    for child in folder.child_layers() {
        match child {
            LayerNode::Named(l) => {
                out.insert(l.name.as_str(), &**l);
            }
            LayerNode::Folder(f) => collect_promoted(f, out),
        }
    }
}

fn find_promoted_mut<'a>(folder: &'a mut Folder, name: &str) -> Option<&'a mut NamedLayer> {
    for child in folder.child_layers_mut() {
        match child {
            LayerNode::Named(l) if l.name == name => return Some(&mut **l),
            LayerNode::Named(_) => {}
            LayerNode::Folder(f) => {
                if let Some(found) = find_promoted_mut(f, name) {
                    return Some(found);
                }
            }
        }
    }
    None
}

impl ConfigEntry for OwsConfig {
    fn readiness(&self) -> &Readiness {
        &self.state
    }
}

impl MetadataBearing for OwsConfig {
    fn metadata_label(&self) -> String {
        "global".to_string()
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
