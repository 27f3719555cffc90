//! Per-layer band name and alias resolution.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::datacube::{dtype_size, DatacubeIndex, ProductHandle};
use crate::entry::{ConfigEntry, Deferred, Readiness};
use crate::error::{ConfigError, ConfigResult};
use crate::fragment::as_object;

/// Native metadata of one band, agreed across every backing product.
#[derive(Debug, Clone, PartialEq)]
pub struct BandInfo {
    pub nodata: Option<f64>,
    pub dtype: String,
}

fn nodata_matches(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
        (None, None) => true,
        _ => false,
    }
}

/// Canonical band names and their aliases.
#[derive(Debug, Clone)]
pub struct BandIndex {
    state: Readiness,
    layer: String,
    /// Canonical name to aliases, in configuration order.
    bands: Vec<(String, Vec<String>)>,
    /// Every canonical name and alias to its canonical name.
    lookup: BTreeMap<String, String>,
    measurements: Deferred<BTreeMap<String, BandInfo>>,
}

impl BandIndex {
    /// Parse the layer's `bands` mapping (absent means auto-discover at
    /// ready time).
    pub fn parse(cfg: Option<&Value>, layer: &str) -> ConfigResult<Self> {
        let mut state = Readiness::new(format!("band index of layer {}", layer));
        let measurements = Deferred::declare("measurements", &mut state)?;
        let mut idx = Self {
            state,
            layer: layer.to_string(),
            bands: Vec::new(),
            lookup: BTreeMap::new(),
            measurements,
        };
        let Some(cfg) = cfg.filter(|v| !v.is_null()) else {
            return Ok(idx);
        };
        let context = format!("bands of layer {}", layer);
        for (band, aliases) in as_object(cfg, &context)? {
            let aliases = match aliases {
                Value::Array(items) => items
                    .iter()
                    .map(|a| a.as_str().map(str::to_string))
                    .collect::<Option<Vec<String>>>(),
                _ => None,
            }
            .ok_or_else(|| {
                ConfigError::config(format!(
                    "Aliases of band {} must be a list of strings in layer {}",
                    band, layer
                ))
            })?;
            idx.add_band(band, aliases)?;
        }
        Ok(idx)
    }

    fn add_band(&mut self, band: &str, aliases: Vec<String>) -> ConfigResult<()> {
        self.insert_name(band, band)?;
        for alias in &aliases {
            if alias != band {
                self.insert_name(alias, band)?;
            }
        }
        self.bands.push((band.to_string(), aliases));
        Ok(())
    }

    fn insert_name(&mut self, name: &str, canonical: &str) -> ConfigResult<()> {
        if self.lookup.contains_key(name) {
            return Err(ConfigError::config(format!(
                "Duplicate band name/alias: {} in layer {}",
                name, self.layer
            )));
        }
        self.lookup.insert(name.to_string(), canonical.to_string());
        Ok(())
    }

    /// Resolve native band metadata against the backing products.
    ///
    /// With no configured bands, every band of the first product is adopted.
    /// Nodata and dtype must agree across products, with NaN matching NaN.
    pub fn make_ready(&mut self, index: &dyn DatacubeIndex, products: &[ProductHandle]) -> ConfigResult<()> {
        let mut resolved: BTreeMap<String, BandInfo> = BTreeMap::new();
        for (i, product) in products.iter().enumerate() {
            if i == 0 && self.bands.is_empty() {
                for m in &product.measurements {
                    self.add_band(&m.name, m.aliases.clone())?;
                }
            }
            let wanted = self.band_names();
            let native = index.list_measurements_for(product, &wanted)?;
            for band in &wanted {
                let Some(m) = native.get(band) else {
                    return Err(ConfigError::config(format!(
                        "Product {} in layer {} does not have a band named {}",
                        product.name, self.layer, band
                    )));
                };
                let info = BandInfo {
                    nodata: m.nodata,
                    dtype: m.dtype.clone(),
                };
                match resolved.get(band) {
                    None => {
                        resolved.insert(band.clone(), info);
                    }
                    Some(first) => {
                        if !nodata_matches(first.nodata, info.nodata) {
                            return Err(ConfigError::config(format!(
                                "Nodata value mismatch between products for band {} in multi-product layer {}",
                                band, self.layer
                            )));
                        }
                        if first.dtype != info.dtype {
                            return Err(ConfigError::config(format!(
                                "Data type mismatch between products for band {} in multi-product layer {}",
                                band, self.layer
                            )));
                        }
                    }
                }
            }
        }
        self.measurements.set(&mut self.state, resolved);
        self.state.complete()
    }

    /// Canonical name for a band name or alias.
    pub fn band(&self, name_alias: &str) -> ConfigResult<&str> {
        self.lookup.get(name_alias).map(String::as_str).ok_or_else(|| {
            ConfigError::config(format!(
                "Unknown band name/alias: {} in layer {}",
                name_alias, self.layer
            ))
        })
    }

    /// Display label of a band: its first alias, else its canonical name.
    pub fn band_label(&self, name_alias: &str) -> ConfigResult<&str> {
        let canonical = self.band(name_alias)?;
        Ok(self
            .bands
            .iter()
            .find(|(b, _)| b == canonical)
            .and_then(|(_, aliases)| aliases.first())
            .map(String::as_str)
            .unwrap_or(canonical))
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|(b, _)| b.clone()).collect()
    }

    /// Canonicalise a list of names or aliases.
    pub fn canonicalise(&self, names: &[String]) -> ConfigResult<Vec<String>> {
        names.iter().map(|n| self.band(n).map(str::to_string)).collect()
    }

    fn info(&self, name_alias: &str) -> ConfigResult<&BandInfo> {
        let canonical = self.band(name_alias)?;
        let measurements = self.measurements.get(&self.state)?;
        measurements.get(canonical).ok_or_else(|| {
            ConfigError::config(format!(
                "No native metadata for band {} in layer {}",
                canonical, self.layer
            ))
        })
    }

    pub fn nodata_val(&self, name_alias: &str) -> ConfigResult<Option<f64>> {
        self.info(name_alias).map(|i| i.nodata)
    }

    pub fn dtype_val(&self, name_alias: &str) -> ConfigResult<&str> {
        self.info(name_alias).map(|i| i.dtype.as_str())
    }

    pub fn dtype_size(&self, name_alias: &str) -> ConfigResult<usize> {
        let dtype = self.dtype_val(name_alias)?;
        dtype_size(dtype).ok_or_else(|| {
            ConfigError::config(format!(
                "Unsupported data type {} for band {} in layer {}",
                dtype, name_alias, self.layer
            ))
        })
    }
}

impl ConfigEntry for BandIndex {
    fn readiness(&self) -> &Readiness {
        &self.state
    }
}
