//! Coordinate Reference System types and utilities.
//!
//! The published CRS table is parsed from the `published_CRSs` section of the
//! global configuration. Each entry is either a full definition or an alias of
//! another published entry.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::fragment::{as_object, optional_bool, optional_str};

/// Axis order for coordinate interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrder {
    /// X (longitude/easting), Y (latitude/northing)
    XY,
    /// Y (latitude/northing), X (longitude/easting)
    LatLon,
}

/// One published CRS as configured.
#[derive(Debug, Clone, PartialEq)]
pub struct CrsDef {
    /// Display name, e.g. "EPSG:3857".
    pub name: String,
    pub geographic: bool,
    pub horizontal_coord: String,
    pub vertical_coord: String,
    pub vertical_coord_first: bool,
    /// OGC URI form used in GML documents.
    pub gml_name: String,
    /// Canonical entry this is an alias of, if any.
    pub alias_of: Option<String>,
}

impl CrsDef {
    pub fn axis_order(&self) -> AxisOrder {
        if self.vertical_coord_first {
            AxisOrder::LatLon
        } else {
            AxisOrder::XY
        }
    }
}

/// Build the OGC URI for a CRS identifier.
pub fn make_gml_name(name: &str) -> String {
    match name.strip_prefix("EPSG:") {
        Some(code) => format!("http://www.opengis.net/def/crs/EPSG/0/{}", code),
        None => name.to_string(),
    }
}

/// The table of published CRSs, aliases included.
#[derive(Debug, Clone, Default)]
pub struct CrsTable {
    published: BTreeMap<String, CrsDef>,
}

impl CrsTable {
    /// Parse `published_CRSs`.
    ///
    /// Geographic entries must use `longitude`/`latitude` coordinate names.
    /// Aliases pointing at an unpublished target are logged and skipped.
    /// When WCS is enabled at least one geographic CRS is required.
    pub fn parse(cfg: &Value, wcs_enabled: bool) -> ConfigResult<Self> {
        let entries = as_object(cfg, "published_CRSs")?;
        let mut published = BTreeMap::new();
        let mut aliases = Vec::new();

        for (name, def) in entries {
            let context = format!("published CRS {}", name);
            if let Some(target) = optional_str(def, "alias", &context)? {
                aliases.push((name.clone(), target.to_string()));
                continue;
            }
            let geographic = match def.get("geographic") {
                Some(Value::Bool(b)) => *b,
                Some(_) => {
                    return Err(ConfigError::config(format!(
                        "'geographic' must be a boolean in {}",
                        context
                    )))
                }
                None => {
                    return Err(ConfigError::config(format!(
                        "Required entry 'geographic' not present in {}",
                        context
                    )))
                }
            };
            let crs_def = CrsDef {
                name: name.clone(),
                geographic,
                horizontal_coord: optional_str(def, "horizontal_coord", &context)?
                    .unwrap_or("longitude")
                    .to_string(),
                vertical_coord: optional_str(def, "vertical_coord", &context)?
                    .unwrap_or("latitude")
                    .to_string(),
                vertical_coord_first: optional_bool(def, "vertical_coord_first", false, &context)?,
                gml_name: make_gml_name(name),
                alias_of: None,
            };
            if crs_def.geographic {
                if crs_def.horizontal_coord != "longitude" {
                    return Err(ConfigError::config(format!(
                        "Published CRS {} is geographic but has a horizontal coordinate that is not 'longitude'",
                        name
                    )));
                }
                if crs_def.vertical_coord != "latitude" {
                    return Err(ConfigError::config(format!(
                        "Published CRS {} is geographic but has a vertical coordinate that is not 'latitude'",
                        name
                    )));
                }
            }
            published.insert(name.clone(), crs_def);
        }

        for (alias, target) in aliases {
            let Some(target_def) = published.get(&target) else {
                warn!(
                    alias = %alias,
                    target = %target,
                    "CRS alias refers to a CRS that is not published - skipping"
                );
                continue;
            };
            let mut alias_def = target_def.clone();
            alias_def.name = alias.clone();
            alias_def.gml_name = make_gml_name(&alias);
            alias_def.alias_of = Some(target);
            published.insert(alias, alias_def);
        }

        let table = Self { published };
        if wcs_enabled && table.geographic().next().is_none() {
            return Err(ConfigError::config(
                "At least one geographic CRS must be supplied",
            ));
        }
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<&CrsDef> {
        self.published.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.published.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.published.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }

    /// Published geographic CRSs (aliases included).
    pub fn geographic(&self) -> impl Iterator<Item = &CrsDef> {
        self.published.values().filter(|d| d.geographic)
    }

    /// Canonical (non-alias) name for a published CRS.
    pub fn canonical<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.published
            .get(name)
            .map(|d| d.alias_of.as_deref().unwrap_or(name))
    }

    /// Build the live CRS objects for every published entry.
    pub fn live_table(&self) -> ConfigResult<BTreeMap<String, Crs>> {
        self.published
            .values()
            .map(|def| {
                let source = def.alias_of.as_deref().unwrap_or(&def.name);
                Crs::parse(source, def.axis_order()).map(|crs| (def.name.clone(), crs))
            })
            .collect()
    }
}

/// A resolved CRS identifier with its axis order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crs {
    pub authority: String,
    pub code: u32,
    pub axis_order: AxisOrder,
}

impl Crs {
    /// Parse a CRS identifier.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326"
    /// - "CRS:84"
    /// - "urn:ogc:def:crs:EPSG::3577"
    pub fn parse(s: &str, axis_order: AxisOrder) -> ConfigResult<Self> {
        let invalid = || ConfigError::config(format!("Invalid CRS identifier: {}", s));
        let upper = s.to_uppercase();
        let (authority, code) = match upper.strip_prefix("URN:OGC:DEF:CRS:") {
            Some(rest) => {
                let (authority, code) = rest.split_once(':').ok_or_else(invalid)?;
                // Optional version segment: "EPSG:6.6:4326" or "EPSG::4326".
                let code = code.rsplit(':').next().unwrap_or(code);
                (authority.to_string(), code.to_string())
            }
            None => {
                let (authority, code) = upper.split_once(':').ok_or_else(invalid)?;
                (authority.to_string(), code.to_string())
            }
        };
        if authority.is_empty() {
            return Err(invalid());
        }
        let code = code.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self {
            authority,
            code,
            axis_order,
        })
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "EPSG:3857": {"geographic": false, "horizontal_coord": "x", "vertical_coord": "y"},
            "EPSG:4326": {"geographic": true, "vertical_coord_first": true},
            "EPSG:900913": {"alias": "EPSG:3857"},
            "EPSG:9999": {"alias": "EPSG:1234"}
        })
    }

    #[test]
    fn test_parse_table_with_aliases() {
        let table = CrsTable::parse(&sample(), true).unwrap();
        assert_eq!(table.len(), 3);
        assert!(!table.contains("EPSG:9999"));

        let alias = table.get("EPSG:900913").unwrap();
        assert_eq!(alias.alias_of.as_deref(), Some("EPSG:3857"));
        assert_eq!(alias.horizontal_coord, "x");
        assert_eq!(alias.gml_name, "http://www.opengis.net/def/crs/EPSG/0/900913");
        assert_eq!(table.canonical("EPSG:900913"), Some("EPSG:3857"));
        assert_eq!(table.canonical("EPSG:4326"), Some("EPSG:4326"));

        let geo = table.get("EPSG:4326").unwrap();
        assert_eq!(geo.axis_order(), AxisOrder::LatLon);
    }

    #[test]
    fn test_geographic_coord_names_enforced() {
        let cfg = json!({"EPSG:4326": {"geographic": true, "horizontal_coord": "x"}});
        assert!(CrsTable::parse(&cfg, false).is_err());
        let cfg = json!({"EPSG:4326": {"geographic": true, "vertical_coord": "y"}});
        assert!(CrsTable::parse(&cfg, false).is_err());
    }

    #[test]
    fn test_wcs_requires_geographic() {
        let cfg = json!({"EPSG:3857": {"geographic": false}});
        assert!(CrsTable::parse(&cfg, false).is_ok());
        let err = CrsTable::parse(&cfg, true).unwrap_err();
        assert!(err.to_string().contains("geographic CRS"));
    }

    #[test]
    fn test_geographic_flag_required() {
        let cfg = json!({"EPSG:3857": {"horizontal_coord": "x"}});
        assert!(CrsTable::parse(&cfg, false).is_err());
    }

    #[test]
    fn test_parse_live_crs() {
        let crs = Crs::parse("EPSG:3577", AxisOrder::XY).unwrap();
        assert_eq!(crs.authority, "EPSG");
        assert_eq!(crs.code, 3577);
        assert_eq!(crs.to_string(), "EPSG:3577");

        let crs = Crs::parse("urn:ogc:def:crs:EPSG::4326", AxisOrder::LatLon).unwrap();
        assert_eq!(crs.code, 4326);
        assert_eq!(Crs::parse("CRS:84", AxisOrder::XY).unwrap().authority, "CRS");
        assert!(Crs::parse("EPSG:abc", AxisOrder::XY).is_err());
        assert!(Crs::parse("nonsense", AxisOrder::XY).is_err());
    }

    #[test]
    fn test_live_table() {
        let table = CrsTable::parse(&sample(), false).unwrap();
        let live = table.live_table().unwrap();
        assert_eq!(live["EPSG:900913"].code, 3857);
        assert_eq!(live["EPSG:4326"].axis_order, AxisOrder::LatLon);
    }
}
