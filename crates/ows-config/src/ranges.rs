//! Layer extents: spatial bounding boxes and available times.
//!
//! Extents are computed from the index by range maintenance and kept in a
//! [`RangeStore`]. Named layers read them back at ready time.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::crs::CrsTable;
use crate::datacube::{DatacubeIndex, ProductHandle};
use crate::error::{ConfigError, ConfigResult};
use crate::time::TimeRes;

const GEOGRAPHIC_EXTENT_CRS: &str = "EPSG:4326";

/// A closed numeric interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

/// Stored extent of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRanges {
    pub lat: ValueRange,
    pub lon: ValueRange,
    /// Sorted, de-duplicated available times.
    pub times: Vec<DateTime<Utc>>,
    /// Bounding box per published CRS.
    pub bboxes: BTreeMap<String, BoundingBox>,
}

impl LayerRanges {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.times.first().copied()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.times.last().copied()
    }

    pub fn time_set(&self) -> BTreeSet<DateTime<Utc>> {
        self.times.iter().copied().collect()
    }
}

/// Extent storage.
pub trait RangeStore: Send + Sync {
    fn get_range(&self, layer: &str) -> ConfigResult<Option<LayerRanges>>;

    fn put_range(&self, layer: &str, ranges: LayerRanges) -> ConfigResult<()>;
}

/// In-memory [`RangeStore`], optionally persisted as a JSON file.
#[derive(Debug, Default)]
pub struct MemoryRangeStore {
    ranges: RwLock<BTreeMap<String, LayerRanges>>,
}

impl MemoryRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let ranges = serde_json::from_str(&content).map_err(|e| ConfigError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            ranges: RwLock::new(ranges),
        })
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let ranges = self.read()?;
        let content = serde_json::to_string_pretty(&*ranges).map_err(|e| ConfigError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn layer_names(&self) -> ConfigResult<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn read(&self) -> ConfigResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, LayerRanges>>> {
        self.ranges
            .read()
            .map_err(|_| ConfigError::config("Range store lock poisoned"))
    }
}

impl RangeStore for MemoryRangeStore {
    fn get_range(&self, layer: &str) -> ConfigResult<Option<LayerRanges>> {
        Ok(self.read()?.get(layer).cloned())
    }

    fn put_range(&self, layer: &str, ranges: LayerRanges) -> ConfigResult<()> {
        self.ranges
            .write()
            .map_err(|_| ConfigError::config("Range store lock poisoned"))?
            .insert(layer.to_string(), ranges);
        Ok(())
    }
}

/// Compute a layer's extent from the datasets of its products.
///
/// Returns `None` when the products have no datasets. Every dataset must
/// carry an `EPSG:4326` footprint; footprints in other CRSs contribute to
/// the bounding box of every published CRS that is, or aliases, that CRS.
pub fn compute_ranges(
    index: &dyn DatacubeIndex,
    products: &[ProductHandle],
    time_res: TimeRes,
    crs_table: &CrsTable,
) -> ConfigResult<Option<LayerRanges>> {
    let mut geo: Option<BoundingBox> = None;
    let mut native: BTreeMap<String, BoundingBox> = BTreeMap::new();
    let mut times = BTreeSet::new();

    for product in products {
        for dataset in index.find_datasets(product)? {
            let Some(footprint) = dataset.extents.get(GEOGRAPHIC_EXTENT_CRS) else {
                return Err(ConfigError::config(format!(
                    "Dataset {} of product {} has no {} extent",
                    dataset.id, product.name, GEOGRAPHIC_EXTENT_CRS
                )));
            };
            geo = Some(geo.map_or(*footprint, |g| g.union(footprint)));
            for (crs, bbox) in &dataset.extents {
                native
                    .entry(crs.clone())
                    .and_modify(|b| *b = b.union(bbox))
                    .or_insert(*bbox);
            }
            times.insert(time_res.bucket(dataset.time, Some(footprint.centre_x())));
        }
    }

    let Some(geo) = geo else {
        return Ok(None);
    };
    let bboxes = crs_table
        .names()
        .filter_map(|name| {
            let canonical = crs_table.canonical(name)?;
            native.get(canonical).map(|b| (name.to_string(), *b))
        })
        .collect();

    Ok(Some(LayerRanges {
        lat: ValueRange {
            min: geo.min_y,
            max: geo.max_y,
        },
        lon: ValueRange {
            min: geo.min_x,
            max: geo.max_x,
        },
        times: times.into_iter().collect(),
        bboxes,
    }))
}
