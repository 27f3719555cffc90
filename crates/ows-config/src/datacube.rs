//! Datacube index collaborator.
//!
//! The engine only needs three operations from the index: product lookup by
//! name, measurement metadata for a set of bands, and the datasets of a
//! product. [`MemoryIndex`] implements them over an in-process catalogue,
//! loadable from a JSON or YAML file.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::bbox::BoundingBox;
use crate::error::{ConfigError, ConfigResult};
use crate::expand::{load_fragment_file, FileFormat};

/// One bit-flag definition within a flags measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDef {
    /// Bit position. Usually an integer; lists and other forms are carried
    /// through but take no part in info masking.
    pub bits: Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub values: Option<Value>,
}

impl FlagDef {
    /// The bit position, when it is a plain integer.
    pub fn bit(&self) -> Option<u32> {
        self.bits.as_u64().and_then(|b| u32::try_from(b).ok())
    }
}

/// A band as the index describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub dtype: String,
    #[serde(default, deserialize_with = "deserialize_nodata")]
    pub nodata: Option<f64>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub flags_definition: BTreeMap<String, FlagDef>,
}

impl Measurement {
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

// Index metadata writes NaN nodata as a string.
fn deserialize_nodata<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "nan" => Ok(Some(f64::NAN)),
            "inf" => Ok(Some(f64::INFINITY)),
            "-inf" => Ok(Some(f64::NEG_INFINITY)),
            _ => s
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid nodata value: {}", s))),
        },
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid nodata value: {}",
            other
        ))),
    }
}

/// Byte size of a numeric dtype name.
pub fn dtype_size(dtype: &str) -> Option<usize> {
    match dtype {
        "int8" | "uint8" | "bool" => Some(1),
        "int16" | "uint16" | "float16" => Some(2),
        "int32" | "uint32" | "float32" => Some(4),
        "int64" | "uint64" | "float64" => Some(8),
        _ => None,
    }
}

/// Storage grid metadata declared by a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSpec {
    pub crs: String,
    /// Resolution per axis name, e.g. `{"x": 25.0, "y": -25.0}`.
    #[serde(default)]
    pub resolution: BTreeMap<String, f64>,
}

/// A datacube product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
    #[serde(default)]
    pub storage: Option<StorageSpec>,
}

impl Product {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measurements: Vec::new(),
            storage: None,
        }
    }

    pub fn with_measurement(mut self, measurement: Measurement) -> Self {
        self.measurements.push(measurement);
        self
    }

    pub fn with_storage(mut self, storage: StorageSpec) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn measurement(&self, name: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.answers_to(name))
    }
}

pub type ProductHandle = Arc<Product>;

/// One indexed dataset: an acquisition time and its footprint per CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub time: DateTime<Utc>,
    /// Footprint keyed by CRS name. `EPSG:4326` supplies lat/lon ranges.
    #[serde(default)]
    pub extents: BTreeMap<String, BoundingBox>,
}

/// The index operations the configuration engine consumes.
pub trait DatacubeIndex: Send + Sync {
    fn get_product_by_name(&self, name: &str) -> ConfigResult<Option<ProductHandle>>;

    /// Measurement metadata for the named bands (names or aliases).
    /// Bands the product does not have are absent from the result.
    fn list_measurements_for(
        &self,
        product: &Product,
        bands: &[String],
    ) -> ConfigResult<BTreeMap<String, Measurement>> {
        Ok(bands
            .iter()
            .filter_map(|band| {
                product
                    .measurement(band)
                    .map(|m| (band.clone(), m.clone()))
            })
            .collect())
    }

    fn find_datasets(&self, product: &Product) -> ConfigResult<Vec<DatasetRecord>>;
}

/// Serialized form of an in-memory catalogue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalogue {
    #[serde(default)]
    pub products: Vec<Product>,
    /// Datasets keyed by product name.
    #[serde(default)]
    pub datasets: BTreeMap<String, Vec<DatasetRecord>>,
}

/// In-memory [`DatacubeIndex`].
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    products: BTreeMap<String, ProductHandle>,
    datasets: BTreeMap<String, Vec<DatasetRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalogue(catalogue: Catalogue) -> Self {
        let mut index = Self::new();
        for product in catalogue.products {
            index.add_product(product);
        }
        for (product, datasets) in catalogue.datasets {
            index.datasets.entry(product).or_default().extend(datasets);
        }
        index
    }

    /// Load a catalogue file (JSON, or YAML by extension).
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let value = load_fragment_file(path, FileFormat::from_path(path))?;
        let catalogue: Catalogue = serde_json::from_value(value).map_err(|e| ConfigError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::from_catalogue(catalogue))
    }

    pub fn add_product(&mut self, product: Product) -> ProductHandle {
        let handle = Arc::new(product);
        self.products.insert(handle.name.clone(), handle.clone());
        handle
    }

    pub fn add_dataset(&mut self, product: &str, dataset: DatasetRecord) {
        self.datasets
            .entry(product.to_string())
            .or_default()
            .push(dataset);
    }

    pub fn product_names(&self) -> impl Iterator<Item = &str> {
        self.products.keys().map(String::as_str)
    }
}

impl DatacubeIndex for MemoryIndex {
    fn get_product_by_name(&self, name: &str) -> ConfigResult<Option<ProductHandle>> {
        Ok(self.products.get(name).cloned())
    }

    fn find_datasets(&self, product: &Product) -> ConfigResult<Vec<DatasetRecord>> {
        Ok(self.datasets.get(&product.name).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_measurement_nodata_forms() {
        let m: Measurement = serde_json::from_value(json!({
            "name": "red", "dtype": "int16", "nodata": -999, "aliases": ["band_4"]
        }))
        .unwrap();
        assert_eq!(m.nodata, Some(-999.0));
        assert!(m.answers_to("band_4"));

        let m: Measurement =
            serde_json::from_value(json!({"name": "ndvi", "dtype": "float32", "nodata": "NaN"})).unwrap();
        assert!(m.nodata.unwrap().is_nan());

        let m: Measurement = serde_json::from_value(json!({"name": "x", "dtype": "uint8"})).unwrap();
        assert_eq!(m.nodata, None);

        assert!(serde_json::from_value::<Measurement>(
            json!({"name": "x", "dtype": "uint8", "nodata": "lots"})
        )
        .is_err());
    }

    #[test]
    fn test_flag_def_bit() {
        let f: FlagDef = serde_json::from_value(json!({"bits": 3})).unwrap();
        assert_eq!(f.bit(), Some(3));
        let f: FlagDef = serde_json::from_value(json!({"bits": [0, 1]})).unwrap();
        assert_eq!(f.bit(), None);
    }

    #[test]
    fn test_dtype_size() {
        assert_eq!(dtype_size("uint8"), Some(1));
        assert_eq!(dtype_size("int16"), Some(2));
        assert_eq!(dtype_size("float32"), Some(4));
        assert_eq!(dtype_size("float64"), Some(8));
        assert_eq!(dtype_size("complex128"), None);
    }

    #[test]
    fn test_memory_index() {
        let catalogue: Catalogue = serde_json::from_value(json!({
            "products": [{
                "name": "ls8",
                "measurements": [{"name": "red", "dtype": "int16", "nodata": -999}],
                "storage": {"crs": "EPSG:3577", "resolution": {"x": 25.0, "y": -25.0}}
            }],
            "datasets": {
                "ls8": [{
                    "id": "a",
                    "time": "2021-01-01T00:00:00Z",
                    "extents": {"EPSG:4326": {"left": 130.0, "bottom": -30.0, "right": 131.0, "top": -29.0}}
                }]
            }
        }))
        .unwrap();
        let index = MemoryIndex::from_catalogue(catalogue);
        let product = index.get_product_by_name("ls8").unwrap().unwrap();
        assert_eq!(product.storage.as_ref().unwrap().crs, "EPSG:3577");
        assert!(index.get_product_by_name("s2").unwrap().is_none());
        assert_eq!(index.find_datasets(&product).unwrap().len(), 1);

        let found = index
            .list_measurements_for(&product, &["red".to_string(), "blue".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["red"].dtype, "int16");
    }
}
