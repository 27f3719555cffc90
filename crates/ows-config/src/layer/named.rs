use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use super::style::StyleDef;
use super::{LayerKind, ParentInfo, ReadyContext};
use crate::bands::BandIndex;
use crate::bbox::BoundingBox;
use crate::datacube::ProductHandle;
use crate::entry::{ConfigEntry, Deferred, Readiness};
use crate::error::{ConfigError, ConfigResult};
use crate::flags::{FlagBand, FlagProductSet};
use crate::fragment::{as_object, optional_bool, optional_str, required, required_str, string_list};
use crate::func::FunctionRef;
use crate::keyed::{
    EntryRegistry, InheritanceExpandable, KeyVals, KeyedLookup, LookupSubs, RegisteredLayer,
};
use crate::metadata::{Attribution, Metadata, MetadataBearing};
use crate::products::ProductNames;
use crate::ranges::{LayerRanges, RangeStore};
use crate::resource_limits::ResourceLimits;
use crate::time::{DefaultTimeRule, TimeAxis, TimeRes};

/// The `image_processing` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageProcessing {
    pub extent_mask_func: Vec<FunctionRef>,
    /// As configured; canonical names are available once the layer is ready.
    pub always_fetch_bands: Vec<String>,
    pub manual_merge: bool,
    pub fuse_func: Option<FunctionRef>,
    pub apply_solar_corrections: bool,
}

impl ImageProcessing {
    fn parse(cfg: &Value, layer: &str) -> ConfigResult<Self> {
        let context = format!("image_processing of layer {}", layer);
        let section = required(cfg, "image_processing", &format!("layer {}", layer))?;
        as_object(section, &context)?;
        let extent_mask_func = match required(section, "extent_mask_func", &context)? {
            Value::Array(items) => items
                .iter()
                .map(|f| FunctionRef::parse(f, &context))
                .collect::<ConfigResult<Vec<_>>>()?,
            single => vec![FunctionRef::parse(single, &context)?],
        };
        Ok(Self {
            extent_mask_func,
            always_fetch_bands: string_list(section, "always_fetch_bands", &context)?,
            manual_merge: optional_bool(section, "manual_merge", false, &context)?,
            fuse_func: FunctionRef::parse_optional(section.get("fuse_func"), &context)?,
            apply_solar_corrections: optional_bool(section, "apply_solar_corrections", false, &context)?,
        })
    }
}

/// Native grid of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSpec {
    /// Published CRS name, when known.
    pub crs: Option<String>,
    /// Resolution as (x, y) in native CRS units.
    pub resolution: Option<(f64, f64)>,
}

/// A mappable layer backed by one or more products.
#[derive(Debug)]
pub struct NamedLayer {
    state: Readiness,
    pub name: String,
    pub kind: LayerKind,
    pub metadata: Metadata,
    pub attribution: Option<Attribution>,
    pub product_names: ProductNames,
    pub time_resolution: TimeRes,
    pub default_time_rule: DefaultTimeRule,
    pub time_axis: Option<TimeAxis>,
    /// Re-read ranges every time they are requested.
    pub dynamic: bool,
    /// Configured to be left out of capabilities documents.
    pub hide: bool,
    pub image_processing: ImageProcessing,
    pub resource_limits: ResourceLimits,
    pub band_idx: BandIndex,
    pub flag_bands: Vec<FlagBand>,
    pub flag_product_sets: Vec<FlagProductSet>,
    styles: Vec<StyleDef>,
    default_style_name: String,
    cfg_native_crs: Option<String>,
    cfg_native_resolution: Option<(f64, f64)>,
    wcs_default_bands: Vec<String>,
    products: Deferred<Vec<ProductHandle>>,
    low_res_products: Deferred<Vec<ProductHandle>>,
    /// `None` once resolved means the range lookup failed and the layer is hidden.
    ranges: Deferred<Option<LayerRanges>>,
    default_time: Deferred<Option<DateTime<Utc>>>,
    native: Deferred<NativeSpec>,
    always_fetch_bands: Deferred<Vec<String>>,
    default_bands: Deferred<Vec<String>>,
}

impl KeyedLookup for NamedLayer {
    const INDEX_KEYS: &'static [&'static str] = &["layer"];

    fn lookup_impl<'a>(
        registry: &'a EntryRegistry,
        keyvals: &KeyVals,
        subs: LookupSubs<'a>,
    ) -> ConfigResult<&'a Value> {
        let name = &keyvals["layer"];
        subs.find_layer(registry, name)
            .map(|record| &record.raw)
            .ok_or_else(|| ConfigError::EntryNotFound(format!("Could not find layer {}", name)))
    }
}

impl InheritanceExpandable for NamedLayer {}

impl NamedLayer {
    /// Parse a named layer fragment and record it in the registry.
    pub fn parse(
        cfg: Value,
        kind: LayerKind,
        parent: ParentInfo<'_>,
        registry: &mut EntryRegistry,
    ) -> ConfigResult<Self> {
        let cfg = Self::prepare_fragment(cfg, registry, LookupSubs::none(), &KeyVals::new())?;
        let name = required_str(&cfg, "name", "named layer")?.to_string();
        if registry.has_layer(&name) {
            return Err(ConfigError::config(format!("Duplicate layer name: {}", name)));
        }
        let context = format!("layer {}", name);
        let multi_product = kind == LayerKind::MultiProduct;

        let metadata = Metadata::parse(&cfg, &context, parent.keywords)?;
        let attribution = Attribution::parse(cfg.get("attribution"), &context)?
            .or_else(|| parent.attribution.cloned());
        let product_names = ProductNames::parse_layer(&cfg, multi_product, &context)?;

        let time_resolution = match optional_str(&cfg, "time_resolution", &context)? {
            Some(token) => TimeRes::parse(token, &name)?,
            None => TimeRes::Solar,
        };
        let default_time_rule = DefaultTimeRule::parse(cfg.get("default_time"), time_resolution, &name)?;
        let time_axis = match cfg.get("time_axis") {
            None | Some(Value::Null) => None,
            Some(axis) => Some(TimeAxis::parse(axis, time_resolution, &name)?),
        };

        let image_processing = ImageProcessing::parse(&cfg, &name)?;
        let resource_limits = ResourceLimits::parse(cfg.get("resource_limits"), &name)?;
        let band_idx = BandIndex::parse(cfg.get("bands"), &name)?;
        let flag_bands = FlagBand::parse_all(cfg.get("flags"), &name, &product_names, multi_product)?;
        let flag_product_sets = FlagProductSet::build_list_from_flagbands(&flag_bands, &name)?;

        let cfg_native_crs = optional_str(&cfg, "native_crs", &context)?.map(str::to_string);
        let cfg_native_resolution = match cfg.get("native_resolution") {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_resolution(v).ok_or_else(|| {
                ConfigError::config(format!(
                    "native_resolution must be a pair of numbers in layer {}",
                    name
                ))
            })?),
        };
        let wcs_default_bands = match cfg.get("wcs") {
            Some(wcs) => string_list(wcs, "default_bands", &context)?,
            None => Vec::new(),
        };

        let mut record = RegisteredLayer::new(cfg.clone());
        let (styles, default_style_name) = Self::parse_styles(&cfg, &name, &metadata.keywords, registry, &mut record)?;

        let mut state = Readiness::new(context.clone());
        let products = Deferred::declare("products", &mut state)?;
        let low_res_products = Deferred::declare("low_res_products", &mut state)?;
        let ranges = Deferred::declare("ranges", &mut state)?;
        let default_time = Deferred::declare("default_time", &mut state)?;
        let native = Deferred::declare("native", &mut state)?;
        let always_fetch_bands = Deferred::declare("always_fetch_bands", &mut state)?;
        let default_bands = Deferred::declare("default_bands", &mut state)?;

        registry.register_layer(&name, record)?;

        Ok(Self {
            state,
            kind,
            hide: optional_bool(&cfg, "hide", false, &context)?,
            dynamic: optional_bool(&cfg, "dynamic", false, &context)?,
            name,
            metadata,
            attribution,
            product_names,
            time_resolution,
            default_time_rule,
            time_axis,
            image_processing,
            resource_limits,
            band_idx,
            flag_bands,
            flag_product_sets,
            styles,
            default_style_name,
            cfg_native_crs,
            cfg_native_resolution,
            wcs_default_bands,
            products,
            low_res_products,
            ranges,
            default_time,
            native,
            always_fetch_bands,
            default_bands,
        })
    }

    fn parse_styles(
        cfg: &Value,
        name: &str,
        keywords: &BTreeSet<String>,
        registry: &EntryRegistry,
        record: &mut RegisteredLayer,
    ) -> ConfigResult<(Vec<StyleDef>, String)> {
        let context = format!("layer {}", name);
        let styling = required(cfg, "styling", &context)?;
        let style_cfgs = match styling.get("styles") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                return Err(ConfigError::config(format!(
                    "Missing or empty styles section in layer {}",
                    name
                )))
            }
        };

        let mut styles: Vec<StyleDef> = Vec::with_capacity(style_cfgs.len());
        for style_cfg in style_cfgs {
            let expanded = StyleDef::prepare(
                style_cfg.clone(),
                name,
                registry,
                LookupSubs::with_layer(name, record),
            )?;
            let style = StyleDef::parse(&expanded, name, keywords)?;
            if record.styles.contains_key(&style.name) {
                return Err(ConfigError::config(format!(
                    "Duplicate style name {} in layer {}",
                    style.name, name
                )));
            }
            record.styles.insert(style.name.clone(), expanded);
            styles.push(style);
        }

        let default_style_name = match optional_str(styling, "default_style", &context)? {
            Some(s) => s.to_string(),
            None => styles[0].name.clone(),
        };
        Ok((styles, default_style_name))
    }

    /// Validate against the index and load ranges.
    ///
    /// Failing to load ranges hides the layer rather than failing: a hidden
    /// layer is ready but publishes no extent.
    pub fn make_ready(&mut self, ctx: &ReadyContext<'_>) -> ConfigResult<()> {
        let (products, low_res) = self.product_names.resolve(ctx.index, &format!("layer {}", self.name))?;
        self.products.set(&mut self.state, products.clone());
        self.low_res_products.set(&mut self.state, low_res);

        self.band_idx.make_ready(ctx.index, &products)?;
        for flag_band in self.flag_bands.iter_mut() {
            flag_band.make_ready(ctx.index)?;
        }
        for set in &mut self.flag_product_sets {
            set.make_ready(&self.flag_bands, &self.band_idx)?;
        }

        let always_fetch = self.band_idx.canonicalise(&self.image_processing.always_fetch_bands)?;
        self.always_fetch_bands.set(&mut self.state, always_fetch);

        let native = self.resolve_native(ctx, &products)?;
        self.native.set(&mut self.state, native);

        let default_bands = if self.wcs_default_bands.is_empty() {
            self.band_idx.band_names()
        } else {
            self.band_idx.canonicalise(&self.wcs_default_bands)?
        };
        self.default_bands.set(&mut self.state, default_bands);

        for style in &mut self.styles {
            style.make_ready(&self.band_idx)?;
        }
        if !self.styles.iter().any(|s| s.name == self.default_style_name) {
            return Err(ConfigError::config(format!(
                "Default style {} is not in the 'styles' for layer {}",
                self.default_style_name, self.name
            )));
        }

        self.force_range_update(ctx.ranges, ctx.maintenance_mode);
        self.state.complete()
    }

    fn resolve_native(&self, ctx: &ReadyContext<'_>, products: &[ProductHandle]) -> ConfigResult<NativeSpec> {
        let storage = products.first().and_then(|p| p.storage.as_ref());

        let mut crs = match (storage, &self.cfg_native_crs) {
            (Some(storage), Some(configured)) if storage.crs != *configured => {
                info!(
                    layer = %self.name,
                    configured = %configured,
                    product_crs = %storage.crs,
                    "Native CRS of layer overridden by product storage metadata"
                );
                Some(storage.crs.clone())
            }
            (Some(storage), _) => Some(storage.crs.clone()),
            (None, configured) => configured.clone(),
        };
        if let Some(c) = &crs {
            if !ctx.crs.contains(c) {
                warn!(
                    layer = %self.name,
                    crs = %c,
                    "Native CRS of layer is not a published CRS"
                );
                crs = None;
            }
        }

        let resolution = storage
            .and_then(|s| {
                let x = s.resolution.get("x").or_else(|| s.resolution.get("longitude"))?;
                let y = s.resolution.get("y").or_else(|| s.resolution.get("latitude"))?;
                Some((*x, *y))
            })
            .or(self.cfg_native_resolution);

        if ctx.services.wcs {
            if crs.is_none() {
                return Err(ConfigError::config(format!(
                    "No published native CRS could be determined for layer {}",
                    self.name
                )));
            }
            if resolution.is_none() {
                return Err(ConfigError::config(format!(
                    "No native resolution supplied for WCS enabled layer {}",
                    self.name
                )));
            }
        }
        Ok(NativeSpec { crs, resolution })
    }

    /// Re-read this layer's ranges from the store.
    ///
    /// Any failure hides the layer. In maintenance mode the failure is
    /// logged as an error, otherwise as a warning. Never changes readiness.
    pub fn force_range_update(&mut self, store: &dyn RangeStore, maintenance_mode: bool) {
        let (ranges, default_time) = match self.load_ranges(store) {
            Ok((ranges, default_time)) => (Some(ranges), default_time),
            Err(e) => {
                if maintenance_mode {
                    error!(layer = %self.name, error = %e, "Could not load ranges for layer");
                } else {
                    warn!(layer = %self.name, error = %e, "Could not load ranges for layer - hiding");
                }
                (None, None)
            }
        };
        self.default_time.set(&mut self.state, default_time);
        self.ranges.set(&mut self.state, ranges);
    }

    fn load_ranges(&self, store: &dyn RangeStore) -> ConfigResult<(LayerRanges, Option<DateTime<Utc>>)> {
        let ranges = store.get_range(&self.name)?.ok_or_else(|| {
            ConfigError::config(format!(
                "No ranges found for layer {} - has range maintenance been run?",
                self.name
            ))
        })?;
        if ranges.times.is_empty() {
            return Err(ConfigError::config(format!(
                "Layer {} has no datasets",
                self.name
            )));
        }
        let times = self.times_from(&ranges);
        let default_time = self.default_time_rule.resolve(&times, &self.name);
        Ok((ranges, default_time))
    }

    fn times_from(&self, ranges: &LayerRanges) -> Vec<DateTime<Utc>> {
        match (&self.time_axis, ranges.start_time(), ranges.end_time()) {
            (Some(axis), Some(start), Some(end)) => axis.dates(start.date_naive(), end.date_naive()),
            _ => ranges.times.clone(),
        }
    }

    /// Ranges for serving a request. Dynamic layers re-read the store first.
    pub fn ranges_for_request(&mut self, store: &dyn RangeStore) -> ConfigResult<&LayerRanges> {
        if self.dynamic {
            self.force_range_update(store, false);
        }
        self.ranges()
    }

    pub fn ranges(&self) -> ConfigResult<&LayerRanges> {
        self.ranges.get(&self.state)?.as_ref().ok_or_else(|| {
            ConfigError::config(format!("Layer {} is hidden: no ranges are available", self.name))
        })
    }

    /// True once a range lookup has succeeded.
    pub fn has_ranges(&self) -> bool {
        matches!(self.ranges.get(&self.state), Ok(Some(_)))
    }

    /// Bounding boxes per published CRS; empty for hidden layers.
    pub fn bboxes(&self) -> BTreeMap<String, BoundingBox> {
        self.ranges().map(|r| r.bboxes.clone()).unwrap_or_default()
    }

    /// Times the layer publishes: the regular axis when one is configured,
    /// else the dataset times.
    pub fn available_times(&self) -> ConfigResult<Vec<DateTime<Utc>>> {
        self.ranges().map(|r| self.times_from(r))
    }

    pub fn default_time(&self) -> ConfigResult<Option<DateTime<Utc>>> {
        self.default_time.get(&self.state).copied()
    }

    /// True when the layer must not appear in capabilities documents.
    pub fn is_hidden(&self) -> bool {
        self.hide || matches!(self.ranges.get(&self.state), Ok(None))
    }

    pub fn products(&self) -> ConfigResult<&[ProductHandle]> {
        self.products.get(&self.state).map(Vec::as_slice)
    }

    pub fn low_res_products(&self) -> ConfigResult<&[ProductHandle]> {
        self.low_res_products.get(&self.state).map(Vec::as_slice)
    }

    pub fn native(&self) -> ConfigResult<&NativeSpec> {
        self.native.get(&self.state)
    }

    pub fn always_fetch_bands(&self) -> ConfigResult<&[String]> {
        self.always_fetch_bands.get(&self.state).map(Vec::as_slice)
    }

    /// Bands returned by WCS when a request names none.
    pub fn wcs_default_bands(&self) -> ConfigResult<&[String]> {
        self.default_bands.get(&self.state).map(Vec::as_slice)
    }

    pub fn styles(&self) -> &[StyleDef] {
        &self.styles
    }

    pub fn style_index(&self) -> BTreeMap<&str, &StyleDef> {
        self.styles.iter().map(|s| (s.name.as_str(), s)).collect()
    }

    pub fn default_style(&self) -> ConfigResult<&StyleDef> {
        self.styles
            .iter()
            .find(|s| s.name == self.default_style_name)
            .ok_or_else(|| {
                ConfigError::config(format!(
                    "Default style {} is not in the 'styles' for layer {}",
                    self.default_style_name, self.name
                ))
            })
    }
}

fn parse_resolution(v: &Value) -> Option<(f64, f64)> {
    match v.as_array()?.as_slice() {
        [x, y] => Some((x.as_f64()?, y.as_f64()?)),
        _ => None,
    }
}

impl ConfigEntry for NamedLayer {
    fn readiness(&self) -> &Readiness {
        &self.state
    }
}

impl MetadataBearing for NamedLayer {
    fn metadata_label(&self) -> String {
        format!("layer.{}", self.name)
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
