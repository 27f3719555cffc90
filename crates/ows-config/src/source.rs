//! Locating the root configuration.
//!
//! The configuration source is taken from an explicit argument, else the
//! `DATACUBE_OWS_CFG` environment variable, else the default module reference.
//! Whatever is found is passed through the inclusion expander before being
//! returned.

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::expand::{cfg_expand, FileFormat, ModuleRegistry};

/// Environment variable naming the configuration source.
pub const CONFIG_ENV_VAR: &str = "DATACUBE_OWS_CFG";

/// Module that bare configuration names are looked up in.
pub const DEFAULT_CONFIG_MODULE: &str = "ows_cfg";

/// Attribute used when no source is configured at all.
pub const DEFAULT_CONFIG_ATTRIBUTE: &str = "ows_cfg";

/// Where the root configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A JSON or YAML file path.
    File(PathBuf, FileFormat),
    /// A dotted `module.attribute` reference.
    Module(String),
    /// Inline JSON text.
    Inline(String),
}

impl ConfigSource {
    /// Classify a source string.
    ///
    /// Inline JSON is recognised first, so JSON text containing `/` or `.` is
    /// never mistaken for a path or module reference.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') {
            return ConfigSource::Inline(raw.to_string());
        }
        if raw.contains('/')
            || raw.ends_with(".json")
            || raw.ends_with(".yaml")
            || raw.ends_with(".yml")
        {
            let path = PathBuf::from(raw);
            let format = FileFormat::from_path(&path);
            return ConfigSource::File(path, format);
        }
        if raw.contains('.') {
            return ConfigSource::Module(raw.to_string());
        }
        ConfigSource::Module(format!("{}.{}", DEFAULT_CONFIG_MODULE, raw))
    }

    /// Resolve from an explicit argument, the environment, or the default.
    pub fn resolve(explicit: Option<&str>) -> Self {
        let from_env = env::var(CONFIG_ENV_VAR).ok().filter(|s| !s.is_empty());
        match explicit.map(str::to_string).or(from_env) {
            Some(raw) => ConfigSource::parse(&raw),
            None => ConfigSource::Module(format!(
                "{}.{}",
                DEFAULT_CONFIG_MODULE, DEFAULT_CONFIG_ATTRIBUTE
            )),
        }
    }

    /// Turn the source into an unexpanded root fragment.
    fn into_fragment(self) -> ConfigResult<Value> {
        match self {
            ConfigSource::File(path, format) => {
                let kind = match format {
                    FileFormat::Json => "json",
                    FileFormat::Yaml => "yaml",
                };
                Ok(serde_json::json!({
                    "include": path.to_string_lossy(),
                    "type": kind,
                }))
            }
            ConfigSource::Module(reference) => Ok(serde_json::json!({
                "include": reference,
                "type": "python",
            })),
            ConfigSource::Inline(text) => {
                serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                    path: PathBuf::from("<inline>"),
                    source,
                })
            }
        }
    }
}

/// Read and fully expand the root configuration.
pub fn read_config(path: Option<&str>, modules: &ModuleRegistry) -> ConfigResult<Value> {
    read_config_from(ConfigSource::resolve(path), modules)
}

/// Read and fully expand configuration from an already classified source.
pub fn read_config_from(source: ConfigSource, modules: &ModuleRegistry) -> ConfigResult<Value> {
    debug!(source = ?source, "Reading OWS configuration");
    let root = source.into_fragment()?;
    cfg_expand(&root, None, &BTreeSet::new(), modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_sources() {
        assert_eq!(
            ConfigSource::parse("/etc/ows/cfg.json"),
            ConfigSource::File(PathBuf::from("/etc/ows/cfg.json"), FileFormat::Json)
        );
        assert_eq!(
            ConfigSource::parse("cfg.json"),
            ConfigSource::File(PathBuf::from("cfg.json"), FileFormat::Json)
        );
        assert_eq!(
            ConfigSource::parse("cfg/ows.yaml"),
            ConfigSource::File(PathBuf::from("cfg/ows.yaml"), FileFormat::Yaml)
        );
        assert_eq!(
            ConfigSource::parse("mycfg.prod"),
            ConfigSource::Module("mycfg.prod".to_string())
        );
        assert_eq!(
            ConfigSource::parse("test_cfg"),
            ConfigSource::Module("ows_cfg.test_cfg".to_string())
        );
        assert_eq!(
            ConfigSource::parse(r#"{"global": {"title": "a.b/c"}}"#),
            ConfigSource::Inline(r#"{"global": {"title": "a.b/c"}}"#.to_string())
        );
    }

    #[test]
    fn test_inline_literal_round_trip() {
        let cfg = json!({
            "global": {"title": "Test", "services": {"wms": true}},
            "layers": [{"title": "Folder", "layers": []}]
        });
        let text = cfg.to_string();
        let read = read_config(Some(text.as_str()), &ModuleRegistry::new()).unwrap();
        assert_eq!(read, cfg);
    }

    #[test]
    fn test_default_module_attribute() {
        let modules = ModuleRegistry::new().with_fragment("ows_cfg.small", json!({"x": [1, 2]}));
        let read = read_config(Some("small"), &modules).unwrap();
        assert_eq!(read, json!({"x": [1, 2]}));
    }

    #[test]
    fn test_invalid_inline_json() {
        let err = read_config(Some("{not json"), &ModuleRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }
}
