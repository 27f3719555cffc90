//! Configuration fragments shared by tests.
//!
//! Every builder returns a plain `serde_json::Value` so tests can tweak the
//! fragment before handing it to the parser.

use serde_json::{json, Value};

/// Name of the geographic CRS every fixture publishes.
pub const GEOGRAPHIC_CRS: &str = "EPSG:4326";

/// A `published_CRSs` section with a geographic CRS, web mercator and an
/// alias of it.
pub fn published_crss() -> Value {
    json!({
        "EPSG:4326": {"geographic": true, "vertical_coord_first": true},
        "EPSG:3857": {"geographic": false, "horizontal_coord": "x", "vertical_coord": "y"},
        "EPSG:900913": {"alias": "EPSG:3857"}
    })
}

/// A minimal valid `global` section.
pub fn global_section() -> Value {
    json!({
        "title": "Test OWS",
        "abstract": "Configuration used by tests",
        "keywords": ["test"],
        "allowed_urls": ["http://localhost/ows"],
        "published_CRSs": published_crss()
    })
}

/// A `wcs` section with GeoTIFF as the native format.
pub fn wcs_section() -> Value {
    json!({
        "formats": {
            "GeoTIFF": {"mime": "image/geotiff", "extension": "tif", "multi-time": false},
            "netCDF": {"mime": "application/x-netcdf", "extension": "nc", "multi-time": true}
        },
        "native_format": "GeoTIFF"
    })
}

/// A style fragment.
pub fn style(name: &str) -> Value {
    json!({"name": name, "title": format!("{} style", name)})
}

/// A single-product named layer with one style.
pub fn layer(name: &str, product: &str) -> Value {
    json!({
        "name": name,
        "title": format!("Layer {}", name),
        "product_name": product,
        "image_processing": {"extent_mask_func": "masks.valid_data"},
        "styling": {"styles": [style("simple")]}
    })
}

/// A folder wrapping `layers`.
pub fn folder(title: &str, layers: Vec<Value>) -> Value {
    json!({"title": title, "layers": layers})
}

/// A full configuration document with the given top-level layers.
pub fn config(layers: Vec<Value>) -> Value {
    json!({
        "global": global_section(),
        "layers": layers
    })
}

/// Apply `patch` on top of `base`, object key by object key.
pub fn patched(mut base: Value, patch: Value) -> Value {
    if let (Some(target), Value::Object(patch)) = (base.as_object_mut(), patch) {
        for (key, value) in patch {
            target.insert(key, value);
        }
    }
    base
}
