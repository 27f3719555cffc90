//! WMTS tile matrix set definitions.
//!
//! Two sets are always available (`WholeWorld_WebMercator` and
//! `GoogleMapsCompatible`); configured sets are merged over them by
//! identifier.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::bbox::BoundingBox;
use crate::crs::CrsTable;
use crate::error::{ConfigError, ConfigResult};
use crate::fragment::{as_object, is_integer, optional_bool, optional_str, required, required_str};

const WEB_MERCATOR_EXTENT: f64 = 20037508.342789244;
const WEB_MERCATOR_TOP_SCALE: f64 = 559082264.0287178;
const WEB_MERCATOR_LEVELS: u32 = 19;

/// OGC standard rendering pixel size in metres.
const STANDARD_PIXEL_SIZE: f64 = 0.00028;

/// A single tile matrix (zoom level).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileMatrix {
    /// Identifier (the zoom level as a string)
    pub identifier: String,
    pub scale_denominator: f64,
    pub top_left_corner: (f64, f64),
    pub tile_width: u32,
    pub tile_height: u32,
    pub matrix_width: u64,
    pub matrix_height: u64,
}

impl TileMatrix {
    /// Units per pixel for this matrix.
    pub fn resolution(&self) -> f64 {
        self.scale_denominator * STANDARD_PIXEL_SIZE
    }

    /// Bounding box of one tile.
    pub fn tile_bbox(&self, col: u64, row: u64) -> BoundingBox {
        let res = self.resolution();
        let tile_span_x = res * self.tile_width as f64;
        let tile_span_y = res * self.tile_height as f64;

        let min_x = self.top_left_corner.0 + col as f64 * tile_span_x;
        let max_y = self.top_left_corner.1 - row as f64 * tile_span_y;
        BoundingBox::new(min_x, max_y - tile_span_y, min_x + tile_span_x, max_y)
    }

    /// Tile containing a coordinate, if inside the matrix.
    pub fn coord_to_tile(&self, x: f64, y: f64) -> Option<(u64, u64)> {
        let res = self.resolution();
        let tile_span_x = res * self.tile_width as f64;
        let tile_span_y = res * self.tile_height as f64;

        let col = ((x - self.top_left_corner.0) / tile_span_x).floor();
        let row = ((self.top_left_corner.1 - y) / tile_span_y).floor();
        if col < 0.0 || row < 0.0 || col >= self.matrix_width as f64 || row >= self.matrix_height as f64 {
            return None;
        }
        Some((col as u64, row as u64))
    }
}

/// A configured tile matrix set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileMatrixSet {
    pub identifier: String,
    pub crs: String,
    pub matrix_origin: (f64, f64),
    pub tile_size: (u32, u32),
    /// Scale denominators, coarsest first.
    pub scale_set: Vec<f64>,
    /// Well-known scale set URI.
    pub wkss: Option<String>,
    /// Exponent offsets applied to matrix width and height per level.
    pub matrix_exponent_initial_offsets: (u32, u32),
    pub force_raw_crs_name: bool,
}

impl TileMatrixSet {
    /// Parse one `tile_matrix_sets` entry and check it against the published CRSs.
    pub fn parse(identifier: &str, cfg: &Value, crs_table: &CrsTable) -> ConfigResult<Self> {
        let context = format!("tile matrix set {}", identifier);
        as_object(cfg, &context)?;

        let crs = required_str(cfg, "crs", &context)?;
        if !crs_table.contains(crs) {
            return Err(ConfigError::config(format!(
                "Tile matrix set {} has unpublished CRS: {}",
                identifier, crs
            )));
        }

        let matrix_origin = match number_pair(required(cfg, "matrix_origin", &context)?) {
            Some((x, y)) => (x, y),
            None => {
                return Err(ConfigError::config(format!(
                    "Tile matrix set {} matrix_origin must contain two numbers",
                    identifier
                )))
            }
        };

        let tile_size = match uint_pair(required(cfg, "tile_size", &context)?) {
            Some((w, h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(ConfigError::config(format!(
                    "Tile matrix set {} tile_size must contain two positive integers",
                    identifier
                )))
            }
        };

        let scale_set = match required(cfg, "scale_set", &context)? {
            Value::Array(items) => items
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<f64>>>()
                .ok_or_else(|| {
                    ConfigError::config(format!(
                        "Tile matrix set {} scale_set must be a list of numbers",
                        identifier
                    ))
                })?,
            _ => {
                return Err(ConfigError::config(format!(
                    "Tile matrix set {} scale_set must be a list of numbers",
                    identifier
                )))
            }
        };
        if scale_set.is_empty() {
            return Err(ConfigError::config(format!(
                "Tile matrix set {} has no scale denominators in scale_set",
                identifier
            )));
        }
        if scale_set.windows(2).any(|w| w[1] >= w[0]) {
            return Err(ConfigError::config(format!(
                "Tile matrix set {} scale_set must be strictly decreasing",
                identifier
            )));
        }

        let matrix_exponent_initial_offsets = match cfg.get("matrix_exponent_initial_offsets") {
            None | Some(Value::Null) => (0, 0),
            Some(v) => uint_pair(v).ok_or_else(|| {
                ConfigError::config(format!(
                    "Tile matrix set {} matrix_exponent_initial_offsets must contain two non-negative integers",
                    identifier
                ))
            })?,
        };

        Ok(Self {
            identifier: identifier.to_string(),
            crs: crs.to_string(),
            matrix_origin,
            tile_size,
            scale_set,
            wkss: optional_str(cfg, "wkss", &context)?.map(str::to_string),
            matrix_exponent_initial_offsets,
            force_raw_crs_name: optional_bool(cfg, "force_raw_crs_name", false, &context)?,
        })
    }

    /// Tile matrix for a zoom level.
    pub fn matrix(&self, level: usize) -> Option<TileMatrix> {
        let scale_denominator = *self.scale_set.get(level)?;
        let (off_x, off_y) = self.matrix_exponent_initial_offsets;
        Some(TileMatrix {
            identifier: level.to_string(),
            scale_denominator,
            top_left_corner: self.matrix_origin,
            tile_width: self.tile_size.0,
            tile_height: self.tile_size.1,
            matrix_width: 1u64 << (level as u32 + off_x).min(63),
            matrix_height: 1u64 << (level as u32 + off_y).min(63),
        })
    }

    pub fn matrices(&self) -> Vec<TileMatrix> {
        (0..self.scale_set.len()).filter_map(|z| self.matrix(z)).collect()
    }

    pub fn levels(&self) -> usize {
        self.scale_set.len()
    }
}

fn number_pair(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [a, b] => Some((a.as_f64()?, b.as_f64()?)),
        _ => None,
    }
}

fn uint_pair(value: &Value) -> Option<(u32, u32)> {
    match value.as_array()?.as_slice() {
        [a, b] if is_integer(a) && is_integer(b) => Some((
            u32::try_from(a.as_u64()?).ok()?,
            u32::try_from(b.as_u64()?).ok()?,
        )),
        _ => None,
    }
}

fn web_mercator(identifier: &str) -> TileMatrixSet {
    TileMatrixSet {
        identifier: identifier.to_string(),
        crs: "EPSG:3857".to_string(),
        matrix_origin: (-WEB_MERCATOR_EXTENT, WEB_MERCATOR_EXTENT),
        tile_size: (256, 256),
        scale_set: (0..WEB_MERCATOR_LEVELS)
            .map(|z| WEB_MERCATOR_TOP_SCALE / f64::from(1u32 << z))
            .collect(),
        wkss: Some("urn:ogc:def:wkss:OGC:1.0:GoogleMapsCompatible".to_string()),
        matrix_exponent_initial_offsets: (0, 0),
        force_raw_crs_name: false,
    }
}

/// The built-in sets, before any configuration is applied.
pub fn builtin_tile_matrix_sets() -> BTreeMap<String, TileMatrixSet> {
    ["WholeWorld_WebMercator", "GoogleMapsCompatible"]
        .into_iter()
        .map(|id| (id.to_string(), web_mercator(id)))
        .collect()
}

/// Parse the `wmts.tile_matrix_sets` section merged over the built-ins.
///
/// Built-ins are only kept when their CRS is published; a configured set
/// with the same identifier replaces the built-in.
pub fn parse_tile_matrix_sets(
    cfg: Option<&Value>,
    crs_table: &CrsTable,
) -> ConfigResult<BTreeMap<String, TileMatrixSet>> {
    let mut sets: BTreeMap<String, TileMatrixSet> = builtin_tile_matrix_sets()
        .into_iter()
        .filter(|(_, tms)| crs_table.contains(&tms.crs))
        .collect();
    if let Some(cfg) = cfg {
        for (identifier, tms_cfg) in as_object(cfg, "tile_matrix_sets")? {
            sets.insert(
                identifier.clone(),
                TileMatrixSet::parse(identifier, tms_cfg, crs_table)?,
            );
        }
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crs_table() -> CrsTable {
        CrsTable::parse(
            &json!({
                "EPSG:3857": {"geographic": false, "horizontal_coord": "x", "vertical_coord": "y"},
                "EPSG:4326": {"geographic": true}
            }),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_web_mercator() {
        let sets = builtin_tile_matrix_sets();
        let tms = &sets["GoogleMapsCompatible"];
        assert_eq!(tms.levels(), 19);
        assert_eq!(tms.scale_set[0], 559082264.0287178);
        assert!((tms.scale_set[1] - 279541132.0143589).abs() < 1e-6);

        let z0 = tms.matrix(0).unwrap();
        assert_eq!(z0.matrix_width, 1);
        // Level 0 covers the whole world in one tile.
        let bbox = z0.tile_bbox(0, 0);
        assert!((bbox.min_x + WEB_MERCATOR_EXTENT).abs() < 1.0);
        assert!((bbox.max_x - WEB_MERCATOR_EXTENT).abs() < 1.0);
        assert_eq!(z0.coord_to_tile(0.0, 0.0), Some((0, 0)));

        let z2 = tms.matrix(2).unwrap();
        assert_eq!(z2.matrix_width, 4);
        assert_eq!(z2.coord_to_tile(1.0, -1.0), Some((2, 2)));
        assert_eq!(z2.coord_to_tile(-3.0e7, 0.0), None);
    }

    #[test]
    fn test_builtins_dropped_without_published_crs() {
        let table = CrsTable::parse(&json!({"EPSG:4326": {"geographic": true}}), false).unwrap();
        assert!(parse_tile_matrix_sets(None, &table).unwrap().is_empty());
    }

    #[test]
    fn test_parse_custom_set() {
        let cfg = json!({
            "geo": {
                "crs": "EPSG:4326",
                "matrix_origin": [-180.0, 90.0],
                "tile_size": [256, 256],
                "scale_set": [279541132.0, 139770566.0],
                "matrix_exponent_initial_offsets": [1, 0]
            }
        });
        let sets = parse_tile_matrix_sets(Some(&cfg), &crs_table()).unwrap();
        assert_eq!(sets.len(), 3);
        let geo = &sets["geo"];
        assert_eq!(geo.matrix(0).unwrap().matrix_width, 2);
        assert_eq!(geo.matrix(0).unwrap().matrix_height, 1);
        assert_eq!(geo.matrices().len(), 2);
    }

    #[test]
    fn test_invalid_sets_rejected() {
        let table = crs_table();
        let base = json!({
            "crs": "EPSG:4326",
            "matrix_origin": [-180.0, 90.0],
            "tile_size": [256, 256],
            "scale_set": [2.0, 1.0]
        });
        assert!(TileMatrixSet::parse("ok", &base, &table).is_ok());

        let mut bad = base.clone();
        bad["crs"] = json!("EPSG:3577");
        assert!(TileMatrixSet::parse("t", &bad, &table).is_err());

        let mut bad = base.clone();
        bad["tile_size"] = json!([256, 0]);
        assert!(TileMatrixSet::parse("t", &bad, &table).is_err());

        let mut bad = base.clone();
        bad["scale_set"] = json!([]);
        assert!(TileMatrixSet::parse("t", &bad, &table).is_err());

        let mut bad = base.clone();
        bad["scale_set"] = json!([1.0, 2.0]);
        assert!(TileMatrixSet::parse("t", &bad, &table).is_err());

        let mut bad = base;
        bad["matrix_origin"] = json!([1.0]);
        assert!(TileMatrixSet::parse("t", &bad, &table).is_err());
    }
}
