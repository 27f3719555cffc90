//! Flag (pixel quality) bands and their grouping into product sets.
//!
//! A layer may read flag bands from its own products or from separate
//! products. Flag bands that read from the same product tuple are grouped
//! into one [`FlagProductSet`] so each product set is loaded once.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::bands::BandIndex;
use crate::datacube::{DatacubeIndex, ProductHandle};
use crate::entry::{ConfigEntry, Deferred, Readiness};
use crate::error::{ConfigError, ConfigResult};
use crate::fragment::{as_object, optional_bool, required_str, string_list};
use crate::func::FunctionRef;
use crate::products::ProductNames;

/// One configured flag band.
#[derive(Debug, Clone)]
pub struct FlagBand {
    state: Readiness,
    layer: String,
    pub band: String,
    pub product_names: ProductNames,
    /// True when the flag band lives in the layer's own products.
    pub main_product: bool,
    pub ignore_time: bool,
    pub manual_merge: bool,
    pub fuse_func: Option<FunctionRef>,
    pub ignore_info_flags: Vec<String>,
    products: Deferred<Vec<ProductHandle>>,
    low_res_products: Deferred<Vec<ProductHandle>>,
    info_mask: Deferred<u64>,
}

impl FlagBand {
    pub fn parse(
        cfg: &Value,
        layer: &str,
        layer_products: &ProductNames,
        multi_product: bool,
    ) -> ConfigResult<Self> {
        let context = format!("flags of layer {}", layer);
        as_object(cfg, &context)?;
        let band = required_str(cfg, "band", &context)?.to_string();
        let context = format!("flag band {} of layer {}", band, layer);
        let product_names = ProductNames::parse_flag(cfg, layer_products, multi_product, &context)?;
        let main_product = product_names == *layer_products;

        let mut state = Readiness::new(context.clone());
        let products = Deferred::declare("products", &mut state)?;
        let low_res_products = Deferred::declare("low_res_products", &mut state)?;
        let info_mask = Deferred::declare("info_mask", &mut state)?;

        Ok(Self {
            layer: layer.to_string(),
            band,
            product_names,
            main_product,
            ignore_time: optional_bool(cfg, "ignore_time", false, &context)?,
            manual_merge: optional_bool(cfg, "manual_merge", false, &context)?,
            fuse_func: FunctionRef::parse_optional(cfg.get("fuse_func"), &context)?,
            ignore_info_flags: string_list(cfg, "ignore_info_flags", &context)?,
            state,
            products,
            low_res_products,
            info_mask,
        })
    }

    /// Parse a layer's `flags` section: one mapping or a list of mappings,
    /// kept in configuration order. Band names must be unique within the layer.
    pub fn parse_all(
        cfg: Option<&Value>,
        layer: &str,
        layer_products: &ProductNames,
        multi_product: bool,
    ) -> ConfigResult<Vec<FlagBand>> {
        let entries: Vec<&Value> = match cfg {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
        };
        let mut flag_bands: Vec<FlagBand> = Vec::with_capacity(entries.len());
        for entry in entries {
            let fb = FlagBand::parse(entry, layer, layer_products, multi_product)?;
            if flag_bands.iter().any(|existing| existing.band == fb.band) {
                return Err(ConfigError::config(format!(
                    "Duplicate flag band name: {} in layer {}",
                    fb.band, layer
                )));
            }
            flag_bands.push(fb);
        }
        Ok(flag_bands)
    }

    /// Resolve products and compute the info mask.
    ///
    /// The info mask starts with every bit set; each integer bit named in
    /// `ignore_info_flags` (looked up in the first product's flag
    /// definition for this band) is cleared.
    pub fn make_ready(&mut self, index: &dyn DatacubeIndex) -> ConfigResult<()> {
        let (products, low_res) = self.product_names.resolve(index, self.state.context())?;

        let mut mask = u64::MAX;
        if !self.ignore_info_flags.is_empty() {
            let first = products.first().ok_or_else(|| {
                ConfigError::config(format!("No products for {}", self.state.context()))
            })?;
            let native = index.list_measurements_for(first, std::slice::from_ref(&self.band))?;
            let measurement = native.get(&self.band).ok_or_else(|| {
                ConfigError::config(format!(
                    "Product {} does not have flag band {} in layer {}",
                    first.name, self.band, self.layer
                ))
            })?;
            for flag in &self.ignore_info_flags {
                let def = measurement.flags_definition.get(flag).ok_or_else(|| {
                    ConfigError::config(format!(
                        "Unknown flag {} in ignore_info_flags for {}",
                        flag,
                        self.state.context()
                    ))
                })?;
                if let Some(bit) = def.bit().filter(|b| *b < 64) {
                    mask &= !(1u64 << bit);
                }
            }
        }

        self.products.set(&mut self.state, products);
        self.low_res_products.set(&mut self.state, low_res);
        self.info_mask.set(&mut self.state, mask);
        self.state.complete()
    }

    pub fn products(&self) -> ConfigResult<&[ProductHandle]> {
        self.products.get(&self.state).map(Vec::as_slice)
    }

    pub fn low_res_products(&self) -> ConfigResult<&[ProductHandle]> {
        self.low_res_products.get(&self.state).map(Vec::as_slice)
    }

    pub fn info_mask(&self) -> ConfigResult<u64> {
        self.info_mask.get(&self.state).copied()
    }
}

impl ConfigEntry for FlagBand {
    fn readiness(&self) -> &Readiness {
        &self.state
    }
}

/// Flag bands sharing one product tuple.
#[derive(Debug, Clone)]
pub struct FlagProductSet {
    state: Readiness,
    layer: String,
    pub product_names: ProductNames,
    /// Member flag band names, first member first.
    pub members: Vec<String>,
    pub bands: BTreeSet<String>,
    pub main_product: bool,
    pub ignore_time: bool,
    pub manual_merge: bool,
    pub fuse_func: Option<FunctionRef>,
    products: Deferred<Vec<ProductHandle>>,
    low_res_products: Deferred<Vec<ProductHandle>>,
}

impl FlagProductSet {
    fn from_flag_band(fb: &FlagBand, layer: &str) -> ConfigResult<Self> {
        let mut state = Readiness::new(format!(
            "flag product set {} of layer {}",
            fb.product_names.names.join(","),
            layer
        ));
        let products = Deferred::declare("products", &mut state)?;
        let low_res_products = Deferred::declare("low_res_products", &mut state)?;
        Ok(Self {
            state,
            layer: layer.to_string(),
            product_names: fb.product_names.clone(),
            members: vec![fb.band.clone()],
            bands: BTreeSet::from([fb.band.clone()]),
            main_product: fb.main_product,
            ignore_time: fb.ignore_time,
            manual_merge: fb.manual_merge,
            fuse_func: fb.fuse_func.clone(),
            products,
            low_res_products,
        })
    }

    fn add_flag_band(&mut self, fb: &FlagBand) -> ConfigResult<()> {
        if fb.ignore_time != self.ignore_time {
            return Err(ConfigError::config(format!(
                "Flag product set {} in layer {} has both ignore_time and non-ignore_time flag bands",
                self.product_names.names.join(","),
                self.layer
            )));
        }
        if let Some(incoming) = &fb.fuse_func {
            match &self.fuse_func {
                Some(existing) if existing != incoming => {
                    return Err(ConfigError::config(format!(
                        "Flag band {} in layer {} has a fuse function that conflicts with flag product set {}",
                        fb.band,
                        self.layer,
                        self.product_names.names.join(",")
                    )));
                }
                Some(_) => {}
                None => self.fuse_func = Some(incoming.clone()),
            }
        }
        if fb.manual_merge {
            self.manual_merge = true;
        }
        self.members.push(fb.band.clone());
        self.bands.insert(fb.band.clone());
        Ok(())
    }

    /// Group flag bands by product tuple, preserving first-seen order.
    pub fn build_list_from_flagbands<'a>(
        flag_bands: impl IntoIterator<Item = &'a FlagBand>,
        layer: &str,
    ) -> ConfigResult<Vec<FlagProductSet>> {
        let mut sets: Vec<FlagProductSet> = Vec::new();
        for fb in flag_bands {
            match sets.iter_mut().find(|s| s.product_names == fb.product_names) {
                Some(set) => set.add_flag_band(fb)?,
                None => sets.push(FlagProductSet::from_flag_band(fb, layer)?),
            }
        }
        Ok(sets)
    }

    /// Adopt the resolved products of the first member flag band.
    /// Main-product sets canonicalise their band names.
    pub fn make_ready(
        &mut self,
        flag_bands: &[FlagBand],
        band_idx: &BandIndex,
    ) -> ConfigResult<()> {
        let first = self
            .members
            .first()
            .and_then(|name| flag_bands.iter().find(|fb| fb.band == *name))
            .ok_or_else(|| {
                ConfigError::config(format!("{} has no member flag bands", self.state.context()))
            })?;
        let products = first.products()?.to_vec();
        let low_res = first.low_res_products()?.to_vec();

        if self.main_product {
            self.bands = self
                .bands
                .iter()
                .map(|b| band_idx.band(b).map(str::to_string))
                .collect::<ConfigResult<BTreeSet<String>>>()?;
        }
        self.products.set(&mut self.state, products);
        self.low_res_products.set(&mut self.state, low_res);
        self.state.complete()
    }

    pub fn products(&self) -> ConfigResult<&[ProductHandle]> {
        self.products.get(&self.state).map(Vec::as_slice)
    }

    pub fn low_res_products(&self) -> ConfigResult<&[ProductHandle]> {
        self.low_res_products.get(&self.state).map(Vec::as_slice)
    }
}

impl ConfigEntry for FlagProductSet {
    fn readiness(&self) -> &Readiness {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::datacube::{FlagDef, Measurement, MemoryIndex, Product};
    use serde_json::json;

    fn layer_products() -> ProductNames {
        ProductNames::new(vec!["ls8".into()], vec![], "layer ls8").unwrap()
    }

    fn fb(cfg: Value) -> FlagBand {
        FlagBand::parse(&cfg, "ls8", &layer_products(), false).unwrap()
    }

    #[test]
    fn test_parse_defaults_to_main_product() {
        let f = fb(json!({"band": "fmask"}));
        assert!(f.main_product);
        assert!(!f.ignore_time);
        assert!(f.products().unwrap_err().is_not_ready());

        let f = fb(json!({"band": "water", "product": "wofs", "ignore_time": true}));
        assert!(!f.main_product);
        assert_eq!(f.product_names.names, vec!["wofs"]);
    }

    #[test]
    fn test_duplicate_flag_bands() {
        let err = FlagBand::parse_all(
            Some(&json!([{"band": "fmask"}, {"band": "fmask", "product": "other"}])),
            "ls8",
            &layer_products(),
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate flag band name: fmask"));

        let single = FlagBand::parse_all(Some(&json!({"band": "fmask"})), "ls8", &layer_products(), false)
            .unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn test_sets_follow_configuration_order() {
        let bands = FlagBand::parse_all(
            Some(&json!([
                {"band": "water", "product": "wofs"},
                {"band": "fmask"},
                {"band": "cloud", "product": "wofs"}
            ])),
            "ls8",
            &layer_products(),
            false,
        )
        .unwrap();
        let names: Vec<&str> = bands.iter().map(|fb| fb.band.as_str()).collect();
        assert_eq!(names, vec!["water", "fmask", "cloud"]);

        let sets = FlagProductSet::build_list_from_flagbands(&bands, "ls8").unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].product_names.names, vec!["wofs"]);
        assert_eq!(sets[0].members, vec!["water", "cloud"]);
        assert_eq!(sets[1].members, vec!["fmask"]);
    }

    #[test]
    fn test_merge_compatible_bands() {
        let a = fb(json!({"band": "water", "product": "wofs"}));
        let b = fb(json!({"band": "wet", "product": "wofs", "manual_merge": true, "fuse_func": "fuse.wofs"}));
        let c = fb(json!({"band": "fmask"}));
        let sets = FlagProductSet::build_list_from_flagbands([&c, &a, &b], "ls8").unwrap();
        assert_eq!(sets.len(), 2);
        let wofs = &sets[1];
        assert_eq!(wofs.bands, BTreeSet::from(["water".to_string(), "wet".to_string()]));
        assert!(wofs.manual_merge);
        assert_eq!(wofs.fuse_func, Some(FunctionRef::named("fuse.wofs")));
    }

    #[test]
    fn test_all_sets_searched_for_match() {
        let a = fb(json!({"band": "a", "product": "p1"}));
        let b = fb(json!({"band": "b", "product": "p2"}));
        let c = fb(json!({"band": "c", "product": "p3"}));
        let d = fb(json!({"band": "d", "product": "p3"}));
        let sets = FlagProductSet::build_list_from_flagbands([&a, &b, &c, &d], "ls8").unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[2].members, vec!["c", "d"]);
    }

    #[test]
    fn test_merge_incompatible_bands() {
        let a = fb(json!({"band": "water", "product": "wofs", "ignore_time": true}));
        let b = fb(json!({"band": "wet", "product": "wofs"}));
        let err = FlagProductSet::build_list_from_flagbands([&a, &b], "ls8").unwrap_err();
        assert!(err.to_string().contains("ignore_time"));
        assert!(err.to_string().contains("ls8"));

        let a = fb(json!({"band": "water", "product": "wofs", "fuse_func": "fuse.a"}));
        let b = fb(json!({"band": "wet", "product": "wofs", "fuse_func": "fuse.b"}));
        let err = FlagProductSet::build_list_from_flagbands([&a, &b], "ls8").unwrap_err();
        assert!(err.to_string().contains("fuse function"));

        let a = fb(json!({"band": "water", "product": "wofs", "fuse_func": "fuse.a"}));
        let b = fb(json!({"band": "wet", "product": "wofs"}));
        assert!(FlagProductSet::build_list_from_flagbands([&a, &b], "ls8").is_ok());
    }

    fn flag_index() -> MemoryIndex {
        let mut index = MemoryIndex::new();
        let defs = BTreeMap::from([
            ("cloud".to_string(), FlagDef { bits: json!(1), description: None, values: None }),
            ("shadow".to_string(), FlagDef { bits: json!(3), description: None, values: None }),
            ("multi".to_string(), FlagDef { bits: json!([4, 5]), description: None, values: None }),
        ]);
        index.add_product(Product::new("ls8").with_measurement(Measurement {
            name: "fmask".to_string(),
            dtype: "uint8".to_string(),
            nodata: Some(0.0),
            aliases: vec!["pq".to_string()],
            flags_definition: defs,
        }));
        index
    }

    #[test]
    fn test_info_mask() {
        let index = flag_index();
        let mut f = fb(json!({"band": "fmask", "ignore_info_flags": ["cloud", "shadow", "multi"]}));
        f.make_ready(&index).unwrap();
        assert!(f.is_ready());
        assert_eq!(f.info_mask().unwrap(), !0b1010u64);
        assert_eq!(f.products().unwrap()[0].name, "ls8");

        let mut f = fb(json!({"band": "fmask", "ignore_info_flags": ["ghost"]}));
        assert!(f.make_ready(&index).is_err());

        let mut f = fb(json!({"band": "fmask", "product": "missing"}));
        let err = f.make_ready(&index).unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(err.to_string().contains("ls8"));
    }

    #[test]
    fn test_product_set_adopts_products_and_canonicalises() {
        let index = flag_index();
        let mut bands = FlagBand::parse_all(Some(&json!({"band": "pq"})), "ls8", &layer_products(), false)
            .unwrap();
        for f in bands.iter_mut() {
            f.make_ready(&index).unwrap();
        }
        let mut sets = FlagProductSet::build_list_from_flagbands(&bands, "ls8").unwrap();
        let mut band_idx = BandIndex::parse(None, "ls8").unwrap();
        band_idx
            .make_ready(&index, &[index.get_product_by_name("ls8").unwrap().unwrap()])
            .unwrap();

        sets[0].make_ready(&bands, &band_idx).unwrap();
        assert!(sets[0].is_ready());
        assert_eq!(sets[0].bands, BTreeSet::from(["fmask".to_string()]));
        assert_eq!(sets[0].products().unwrap().len(), 1);
    }
}
