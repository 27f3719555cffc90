//! In-memory index and range store generators.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ows_config::bbox::BoundingBox;
use ows_config::datacube::{DatasetRecord, Measurement, MemoryIndex, Product, StorageSpec};
use ows_config::ranges::{LayerRanges, MemoryRangeStore, RangeStore, ValueRange};

/// Surface reflectance bands used by the default fixture products.
pub const DEFAULT_BANDS: [&str; 3] = ["red", "green", "blue"];

/// The first dataset time of generated products (2021-01-01T00:00:00Z).
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base time")
}

pub fn measurement(name: &str, dtype: &str, nodata: Option<f64>) -> Measurement {
    Measurement {
        name: name.to_string(),
        dtype: dtype.to_string(),
        nodata,
        aliases: Vec::new(),
        flags_definition: BTreeMap::new(),
    }
}

/// A product with `bands` (int16, nodata -999) stored in EPSG:3857.
pub fn product(name: &str, bands: &[&str]) -> Product {
    let mut product = Product::new(name).with_storage(StorageSpec {
        crs: "EPSG:3857".to_string(),
        resolution: BTreeMap::from([("x".to_string(), 25.0), ("y".to_string(), -25.0)]),
    });
    for band in bands {
        product = product.with_measurement(measurement(band, "int16", Some(-999.0)));
    }
    product
}

/// A dataset covering a one degree square at (`lon`, `lat`), `days` after
/// [`base_time`].
pub fn dataset(id: &str, days: i64, lon: f64, lat: f64) -> DatasetRecord {
    DatasetRecord {
        id: id.to_string(),
        time: base_time() + Duration::days(days),
        extents: BTreeMap::from([
            (
                "EPSG:4326".to_string(),
                BoundingBox::new(lon, lat, lon + 1.0, lat + 1.0),
            ),
            (
                "EPSG:3857".to_string(),
                BoundingBox::new(lon * 111_000.0, lat * 111_000.0, (lon + 1.0) * 111_000.0, (lat + 1.0) * 111_000.0),
            ),
        ]),
    }
}

/// An index holding one product per name, each with [`DEFAULT_BANDS`] and
/// three daily datasets.
pub fn index_with_products(names: &[&str]) -> MemoryIndex {
    let mut index = MemoryIndex::new();
    for name in names {
        index.add_product(product(name, &DEFAULT_BANDS));
        for day in 0..3 {
            index.add_dataset(name, dataset(&format!("{}-{}", name, day), day, 130.0, -30.0));
        }
    }
    index
}

/// Ranges with `days` daily times starting at [`base_time`].
pub fn layer_ranges(days: i64) -> LayerRanges {
    let bbox = BoundingBox::new(130.0, -30.0, 131.0, -29.0);
    LayerRanges {
        lat: ValueRange { min: -30.0, max: -29.0 },
        lon: ValueRange { min: 130.0, max: 131.0 },
        times: (0..days).map(|d| base_time() + Duration::days(d)).collect(),
        bboxes: BTreeMap::from([("EPSG:4326".to_string(), bbox)]),
    }
}

/// A store with three days of ranges for every layer name.
pub fn store_with_ranges(layers: &[&str]) -> MemoryRangeStore {
    let store = MemoryRangeStore::new();
    for layer in layers {
        store
            .put_range(layer, layer_ranges(3))
            .expect("in-memory store accepts ranges");
    }
    store
}
