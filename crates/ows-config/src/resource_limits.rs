//! Per-layer resource limits and dataset-count cache rules.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::fragment::{as_object, is_integer, optional_f64, optional_u64};

pub const DEFAULT_ZOOMED_OUT_FILL_COLOUR: [u8; 4] = [150, 180, 200, 160];
pub const DEFAULT_MIN_ZOOM_FACTOR: f64 = 300.0;

/// One cache rule: responses built from at least `min_datasets` datasets may
/// be cached for `max_age` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRule {
    pub min_datasets: u64,
    pub max_age: u64,
}

/// An ordered cache rule table. `None` rules mean caching is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheControlRules {
    rules: Option<Vec<CacheRule>>,
    /// Dataset cap; 0 means no cap.
    max_datasets: u64,
}

impl CacheControlRules {
    /// Parse `dataset_cache_rules`.
    ///
    /// Thresholds and ages must be positive integers and strictly increasing;
    /// no threshold may exceed a non-zero `max_datasets`.
    pub fn parse(cfg: Option<&Value>, context: &str, max_datasets: u64) -> ConfigResult<Self> {
        let items = match cfg {
            None | Some(Value::Null) => {
                return Ok(Self {
                    rules: None,
                    max_datasets,
                })
            }
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ConfigError::config(format!(
                    "Dataset cache rules must be a list in {}",
                    context
                )))
            }
        };

        let mut rules: Vec<CacheRule> = Vec::with_capacity(items.len());
        for item in items {
            let min_datasets = positive_int(item, "min_datasets", context)?;
            let max_age = positive_int(item, "max_age", context)?;
            if max_datasets > 0 && min_datasets > max_datasets {
                return Err(ConfigError::config(format!(
                    "Dataset cache rule min_datasets value {} exceeds the max_datasets limit {} in {}",
                    min_datasets, max_datasets, context
                )));
            }
            if let Some(prev) = rules.last() {
                if min_datasets <= prev.min_datasets {
                    return Err(ConfigError::config(format!(
                        "Dataset cache rules must be sorted by ascending min_datasets values in {}",
                        context
                    )));
                }
                if max_age <= prev.max_age {
                    return Err(ConfigError::config(format!(
                        "Max-age values in dataset cache rules must increase monotonically in {}",
                        context
                    )));
                }
            }
            rules.push(CacheRule {
                min_datasets,
                max_age,
            });
        }
        Ok(Self {
            rules: Some(rules),
            max_datasets,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.rules.is_some()
    }

    pub fn rules(&self) -> &[CacheRule] {
        self.rules.as_deref().unwrap_or(&[])
    }

    /// Cache-control headers for a response built from `n_datasets` datasets.
    pub fn cache_headers(&self, n_datasets: u64) -> BTreeMap<String, String> {
        let Some(rules) = &self.rules else {
            return BTreeMap::new();
        };
        let directive = if n_datasets == 0 || (self.max_datasets > 0 && n_datasets > self.max_datasets) {
            "no-cache".to_string()
        } else {
            rules
                .iter()
                .rev()
                .find(|r| r.min_datasets <= n_datasets)
                .map(|r| format!("max-age={}", r.max_age))
                .unwrap_or_else(|| "no-cache".to_string())
        };
        BTreeMap::from([("cache-control".to_string(), directive)])
    }
}

fn positive_int(rule: &Value, key: &str, context: &str) -> ConfigResult<u64> {
    match rule.get(key) {
        Some(v) if is_integer(v) => match v.as_u64() {
            Some(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::config(format!(
                "Dataset cache rule {} must be positive in {}",
                key, context
            ))),
        },
        Some(_) => Err(ConfigError::config(format!(
            "Dataset cache rule {} must be an integer in {}",
            key, context
        ))),
        None => Err(ConfigError::config(format!(
            "Dataset cache rule is missing {} in {}",
            key, context
        ))),
    }
}

/// WMS limits.
#[derive(Debug, Clone, PartialEq)]
pub struct WmsLimits {
    /// RGBA fill for requests zoomed out beyond `min_zoom_factor`.
    pub zoomed_out_fill_colour: [u8; 4],
    pub min_zoom_factor: f64,
    pub max_datasets: u64,
    pub cache_rules: CacheControlRules,
}

/// WCS limits.
#[derive(Debug, Clone, PartialEq)]
pub struct WcsLimits {
    pub max_datasets: u64,
    /// Maximum pixel count of a coverage response; 0 means unlimited.
    pub max_image_size: u64,
    pub cache_rules: CacheControlRules,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    pub wms: WmsLimits,
    pub wcs: WcsLimits,
}

impl ResourceLimits {
    /// Parse a layer's `resource_limits` section (absent means defaults).
    pub fn parse(cfg: Option<&Value>, layer: &str) -> ConfigResult<Self> {
        let empty = Value::Object(Default::default());
        let cfg = match cfg {
            None | Some(Value::Null) => &empty,
            Some(v) => v,
        };
        as_object(cfg, &format!("resource_limits of layer {}", layer))?;
        let wms_cfg = cfg.get("wms").unwrap_or(&empty);
        let wcs_cfg = cfg.get("wcs").unwrap_or(&empty);

        let wms_context = format!("WMS resource limits of layer {}", layer);
        let wms_max = optional_u64(wms_cfg, "max_datasets", 0, &wms_context)?;
        let wms = WmsLimits {
            zoomed_out_fill_colour: parse_fill_colour(wms_cfg.get("zoomed_out_fill_colour"), &wms_context)?,
            min_zoom_factor: optional_f64(wms_cfg, "min_zoom_factor", DEFAULT_MIN_ZOOM_FACTOR, &wms_context)?,
            max_datasets: wms_max,
            cache_rules: CacheControlRules::parse(
                wms_cfg.get("dataset_cache_rules"),
                &wms_context,
                wms_max,
            )?,
        };

        let wcs_context = format!("WCS resource limits of layer {}", layer);
        let wcs_max = optional_u64(wcs_cfg, "max_datasets", 0, &wcs_context)?;
        let wcs = WcsLimits {
            max_datasets: wcs_max,
            max_image_size: optional_u64(wcs_cfg, "max_image_size", 0, &wcs_context)?,
            cache_rules: CacheControlRules::parse(
                wcs_cfg.get("dataset_cache_rules"),
                &wcs_context,
                wcs_max,
            )?,
        };
        Ok(Self { wms, wcs })
    }
}

fn parse_fill_colour(cfg: Option<&Value>, context: &str) -> ConfigResult<[u8; 4]> {
    let items = match cfg {
        None | Some(Value::Null) => return Ok(DEFAULT_ZOOMED_OUT_FILL_COLOUR),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ConfigError::config(format!(
                "zoomed_out_fill_colour must be a list in {}",
                context
            )))
        }
    };
    let channels = items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| {
            ConfigError::config(format!(
                "zoomed_out_fill_colour values must be integers between 0 and 255 in {}",
                context
            ))
        })?;
    match channels.as_slice() {
        [r, g, b] => Ok([*r, *g, *b, 255]),
        [r, g, b, a] => Ok([*r, *g, *b, *a]),
        _ => Err(ConfigError::config(format!(
            "zoomed_out_fill_colour must have 3 or 4 elements in {}",
            context
        ))),
    }
}
