//! Backing product names of a layer or flag band.

use serde_json::Value;

use crate::datacube::{DatacubeIndex, ProductHandle};
use crate::error::{ConfigError, ConfigResult};
use crate::fragment::string_list;

/// Product names paired with optional low-resolution counterparts.
///
/// `low_res` is either empty (no low-resolution variant) or the same length
/// as `names`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductNames {
    pub names: Vec<String>,
    pub low_res: Vec<String>,
}

impl ProductNames {
    /// Build and validate from explicit lists.
    pub fn new(names: Vec<String>, low_res: Vec<String>, context: &str) -> ConfigResult<Self> {
        if names.is_empty() {
            return Err(ConfigError::config(format!(
                "No products declared in {}",
                context
            )));
        }
        if !low_res.is_empty() && low_res.len() != names.len() {
            return Err(ConfigError::config(format!(
                "Lengths of product_names and low_res_product_names do not match in {}",
                context
            )));
        }
        if let Some(bad) = names.iter().chain(low_res.iter()).find(|n| n.contains("__")) {
            return Err(ConfigError::config(format!(
                "Product names cannot contain a double underscore '__': {} in {}",
                bad, context
            )));
        }
        Ok(Self { names, low_res })
    }

    /// Parse a named layer's products: `product_name`/`low_res_product_name`
    /// for single-product layers, `product_names`/`low_res_product_names`
    /// for multi-product layers.
    pub fn parse_layer(cfg: &Value, multi_product: bool, context: &str) -> ConfigResult<Self> {
        let (names, low_res) = if multi_product {
            if cfg.get("product_names").is_none() {
                return Err(ConfigError::config(format!(
                    "Required entry 'product_names' not present in {}",
                    context
                )));
            }
            (
                string_list(cfg, "product_names", context)?,
                string_list(cfg, "low_res_product_names", context)?,
            )
        } else {
            let name = single(cfg, "product_name", context)?.ok_or_else(|| {
                ConfigError::config(format!(
                    "Required entry 'product_name' not present in {}",
                    context
                ))
            })?;
            let low_res = single(cfg, "low_res_product_name", context)?;
            (vec![name], low_res.into_iter().collect())
        };
        Self::new(names, low_res, context)
    }

    /// Parse the products of a flag band, defaulting to the owning layer's.
    ///
    /// Single-product layers use `product`/`low_res_product`; multi-product
    /// layers use `products`/`low_res_products`.
    pub fn parse_flag(
        cfg: &Value,
        layer_products: &ProductNames,
        multi_product: bool,
        context: &str,
    ) -> ConfigResult<Self> {
        let (names, low_res) = if multi_product {
            if cfg.get("products").is_none() {
                return Ok(layer_products.clone());
            }
            (
                string_list(cfg, "products", context)?,
                string_list(cfg, "low_res_products", context)?,
            )
        } else {
            match single(cfg, "product", context)? {
                None => return Ok(layer_products.clone()),
                Some(name) => (
                    vec![name],
                    single(cfg, "low_res_product", context)?.into_iter().collect(),
                ),
            }
        };
        Self::new(names, low_res, context)
    }

    /// Low-resolution product name for position `i`, falling back to the
    /// full-resolution name.
    pub fn low_res_for(&self, i: usize) -> Option<&str> {
        self.low_res
            .get(i)
            .or_else(|| self.names.get(i))
            .map(String::as_str)
    }

    /// Look up every product (and low-resolution product) in the index.
    ///
    /// Returns `(products, low_res_products)`; the second list mirrors the
    /// first when no low-resolution names are configured.
    pub fn resolve(
        &self,
        index: &dyn DatacubeIndex,
        context: &str,
    ) -> ConfigResult<(Vec<ProductHandle>, Vec<ProductHandle>)> {
        let lookup = |name: &str| -> ConfigResult<ProductHandle> {
            index.get_product_by_name(name)?.ok_or_else(|| {
                ConfigError::config(format!(
                    "Could not find product {} in datacube for {}",
                    name, context
                ))
            })
        };
        let products = self
            .names
            .iter()
            .map(|n| lookup(n))
            .collect::<ConfigResult<Vec<_>>>()?;
        let low_res = if self.has_low_res() {
            self.low_res
                .iter()
                .map(|n| lookup(n))
                .collect::<ConfigResult<Vec<_>>>()?
        } else {
            products.clone()
        };
        Ok((products, low_res))
    }

    pub fn has_low_res(&self) -> bool {
        !self.low_res.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn single(cfg: &Value, key: &str, context: &str) -> ConfigResult<Option<String>> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ConfigError::config(format!(
            "Entry '{}' must be a string in {}",
            key, context
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datacube::{MemoryIndex, Product};
    use serde_json::json;

    #[test]
    fn test_single_product_layer() {
        let p = ProductNames::parse_layer(
            &json!({"product_name": "ls8_ard", "low_res_product_name": "ls8_summary"}),
            false,
            "layer ls8",
        )
        .unwrap();
        assert_eq!(p.names, vec!["ls8_ard"]);
        assert_eq!(p.low_res_for(0), Some("ls8_summary"));
        assert!(ProductNames::parse_layer(&json!({}), false, "layer ls8").is_err());
    }

    #[test]
    fn test_multi_product_layer() {
        let p = ProductNames::parse_layer(
            &json!({"product_names": ["a", "b"], "low_res_product_names": []}),
            true,
            "layer ab",
        )
        .unwrap();
        assert_eq!(p.len(), 2);
        assert!(!p.has_low_res());
        assert_eq!(p.low_res_for(1), Some("b"));

        let err = ProductNames::parse_layer(
            &json!({"product_names": ["a", "b"], "low_res_product_names": ["c"]}),
            true,
            "layer ab",
        )
        .unwrap_err();
        assert!(err.to_string().contains("do not match"));
        assert!(ProductNames::parse_layer(&json!({"product_names": []}), true, "layer ab").is_err());
    }

    #[test]
    fn test_resolve_against_index() {
        let mut index = MemoryIndex::new();
        index.add_product(Product::new("a"));
        index.add_product(Product::new("a_summary"));

        let p = ProductNames::new(vec!["a".into()], vec!["a_summary".into()], "layer a").unwrap();
        let (products, low_res) = p.resolve(&index, "layer a").unwrap();
        assert_eq!(products[0].name, "a");
        assert_eq!(low_res[0].name, "a_summary");

        let p = ProductNames::new(vec!["a".into()], vec![], "layer a").unwrap();
        let (_, low_res) = p.resolve(&index, "layer a").unwrap();
        assert_eq!(low_res[0].name, "a");

        let p = ProductNames::new(vec!["ghost".into()], vec![], "layer g").unwrap();
        let err = p.resolve(&index, "layer g").unwrap_err();
        assert!(err.to_string().contains("Could not find product ghost"));
        assert!(err.to_string().contains("layer g"));
    }

    #[test]
    fn test_double_underscore_rejected() {
        let err = ProductNames::parse_layer(&json!({"product_name": "ls8__ard"}), false, "layer ls8")
            .unwrap_err();
        assert!(err.to_string().contains("double underscore"));
    }

    #[test]
    fn test_flag_products_default_to_layer() {
        let layer = ProductNames::new(vec!["ls8".into()], vec![], "layer").unwrap();
        let same = ProductNames::parse_flag(&json!({"band": "pq"}), &layer, false, "flags").unwrap();
        assert_eq!(same, layer);
        let other =
            ProductNames::parse_flag(&json!({"product": "ls8_pq"}), &layer, false, "flags").unwrap();
        assert_eq!(other.names, vec!["ls8_pq"]);

        let multi_layer = ProductNames::new(vec!["a".into(), "b".into()], vec![], "layer").unwrap();
        let multi = ProductNames::parse_flag(
            &json!({"products": ["a_pq", "b_pq"]}),
            &multi_layer,
            true,
            "flags",
        )
        .unwrap();
        assert_eq!(multi.len(), 2);
    }
}
