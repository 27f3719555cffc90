//! Inclusion expansion.
//!
//! Any mapping of the form `{"include": <target>, "type": <kind>}` is replaced
//! by the (recursively expanded) fragment it points at:
//!
//! - `json` (the default) and `yaml` targets are files, looked up relative to
//!   the process working directory first and then relative to the directory
//!   of the including file.
//! - `python` (or `module`) targets are dotted `module.attribute` references
//!   resolved through a [`ModuleRegistry`] of fragments registered in-process.
//!
//! Every target already visited on the current root-to-leaf path is tracked,
//! so a cyclic chain of inclusions fails instead of recursing forever.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Produces a configuration fragment for a registered module reference.
pub type FragmentFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// In-process table of `module.attribute` references that `python` includes
/// and bare configuration names resolve against.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, FragmentFactory>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.modules.keys().collect();
        keys.sort();
        f.debug_struct("ModuleRegistry").field("modules", &keys).finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a literal fragment under a dotted reference.
    pub fn register(&mut self, path: impl Into<String>, fragment: Value) {
        self.modules
            .insert(path.into(), Arc::new(move || fragment.clone()));
    }

    /// Register a function that builds the fragment each time it is included.
    pub fn register_fn<F>(&mut self, path: impl Into<String>, factory: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.modules.insert(path.into(), Arc::new(factory));
    }

    /// Builder form of [`ModuleRegistry::register`].
    pub fn with_fragment(mut self, path: impl Into<String>, fragment: Value) -> Self {
        self.register(path, fragment);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    /// Resolve a dotted reference to its (unexpanded) fragment.
    pub fn resolve(&self, path: &str) -> ConfigResult<Value> {
        if !path.contains('.') {
            return Err(ConfigError::config(format!(
                "Invalid python include reference {}: expected module.attribute",
                path
            )));
        }
        let factory = self.modules.get(path).ok_or_else(|| {
            ConfigError::config(format!("Could not import python object {}", path))
        })?;
        let fragment = factory();
        if !(fragment.is_object() || fragment.is_array()) {
            return Err(ConfigError::config(format!(
                "Included python object {} is not a mapping or sequence",
                path
            )));
        }
        Ok(fragment)
    }
}

/// On-disk fragment formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
}

impl FileFormat {
    /// Pick a format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            _ => FileFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IncludeType {
    File(FileFormat),
    Module,
}

impl IncludeType {
    fn parse(value: Option<&Value>) -> ConfigResult<Self> {
        match value {
            None => Ok(IncludeType::File(FileFormat::Json)),
            Some(Value::String(s)) => match s.as_str() {
                "json" => Ok(IncludeType::File(FileFormat::Json)),
                "yaml" => Ok(IncludeType::File(FileFormat::Yaml)),
                "python" | "module" => Ok(IncludeType::Module),
                other => Err(ConfigError::config(format!(
                    "Unsupported inclusion type: {}",
                    other
                ))),
            },
            Some(other) => Err(ConfigError::config(format!(
                "Unsupported inclusion type: {}",
                other
            ))),
        }
    }
}

/// Read and parse a fragment file.
pub fn load_fragment_file(path: &Path, format: FileFormat) -> ConfigResult<Value> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match format {
        FileFormat::Json => serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        }),
        FileFormat::Yaml => serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Expand every inclusion directive in `cfg`.
///
/// `cwd` is the directory of the file `cfg` was read from (if any), and
/// `visited` holds the inclusion targets already open on this path.
pub fn cfg_expand(
    cfg: &Value,
    cwd: Option<&Path>,
    visited: &BTreeSet<String>,
    modules: &ModuleRegistry,
) -> ConfigResult<Value> {
    match cfg {
        Value::Object(map) if map.contains_key("include") => {
            expand_include(map, cwd, visited, modules)
        }
        Value::Object(map) => {
            let mut expanded = Map::with_capacity(map.len());
            for (key, value) in map {
                expanded.insert(key.clone(), cfg_expand(value, cwd, visited, modules)?);
            }
            Ok(Value::Object(expanded))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| cfg_expand(item, cwd, visited, modules))
            .collect::<ConfigResult<Vec<_>>>()
            .map(Value::Array),
        scalar => Ok(scalar.clone()),
    }
}

fn expand_include(
    directive: &Map<String, Value>,
    cwd: Option<&Path>,
    visited: &BTreeSet<String>,
    modules: &ModuleRegistry,
) -> ConfigResult<Value> {
    let include = directive
        .get("include")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::config("Inclusion target must be a string"))?;
    let include_type = IncludeType::parse(directive.get("type"))?;

    match include_type {
        IncludeType::File(format) => {
            let path = locate_include_file(include, cwd)?;
            let target = format!("file:{}", path.display());
            let nested = visit(visited, target)?;
            debug!(include = %include, path = %path.display(), "Expanding file inclusion");

            let loaded = load_fragment_file(&path, format)?;
            cfg_expand(&loaded, path.parent(), &nested, modules)
        }
        IncludeType::Module => {
            let nested = visit(visited, format!("module:{}", include))?;
            debug!(include = %include, "Expanding module inclusion");

            let loaded = modules.resolve(include)?;
            cfg_expand(&loaded, cwd, &nested, modules)
        }
    }
}

/// Extend a copy of the visited set, failing if `target` is already open.
fn visit(visited: &BTreeSet<String>, target: String) -> ConfigResult<BTreeSet<String>> {
    if visited.contains(&target) {
        return Err(ConfigError::config(format!(
            "Cyclic inclusion: {}",
            target
        )));
    }
    let mut nested = visited.clone();
    nested.insert(target);
    Ok(nested)
}

/// Resolve an include path against the process working directory, then
/// against the including file's directory.
fn locate_include_file(raw: &str, cwd: Option<&Path>) -> ConfigResult<PathBuf> {
    let direct = Path::new(raw);
    let candidate = if direct.is_file() {
        Some(direct.to_path_buf())
    } else {
        cwd.map(|dir| dir.join(raw)).filter(|p| p.is_file())
    };

    candidate
        .map(|p| fs::canonicalize(&p).unwrap_or(p))
        .ok_or_else(|| ConfigError::config(format!("Could not find json file {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expand(cfg: &Value, modules: &ModuleRegistry) -> ConfigResult<Value> {
        cfg_expand(cfg, None, &BTreeSet::new(), modules)
    }

    #[test]
    fn test_literal_passthrough() {
        let cfg = json!({"a": [1, "two", {"b": null}], "c": true});
        assert_eq!(expand(&cfg, &ModuleRegistry::new()).unwrap(), cfg);
    }

    #[test]
    fn test_module_include_nested() {
        let modules = ModuleRegistry::new()
            .with_fragment("cfgs.styles", json!([{"name": "rgb"}]))
            .with_fragment(
                "cfgs.layer",
                json!({"name": "ls8", "styles": {"include": "cfgs.styles", "type": "python"}}),
            );

        let cfg = json!({"layers": [{"include": "cfgs.layer", "type": "python"}]});
        let expanded = expand(&cfg, &modules).unwrap();
        assert_eq!(
            expanded,
            json!({"layers": [{"name": "ls8", "styles": [{"name": "rgb"}]}]})
        );
    }

    #[test]
    fn test_module_cycle_detected() {
        let modules = ModuleRegistry::new()
            .with_fragment("cfgs.a", json!({"next": {"include": "cfgs.b", "type": "python"}}))
            .with_fragment("cfgs.b", json!({"next": {"include": "cfgs.a", "type": "python"}}));

        let cfg = json!({"include": "cfgs.a", "type": "python"});
        let err = expand(&cfg, &modules).unwrap_err();
        assert!(err.to_string().contains("Cyclic inclusion"));
    }

    #[test]
    fn test_siblings_may_include_same_target() {
        let modules = ModuleRegistry::new().with_fragment("cfgs.shared", json!({"x": 1}));
        let cfg = json!({
            "a": {"include": "cfgs.shared", "type": "python"},
            "b": {"include": "cfgs.shared", "type": "python"}
        });
        let expanded = expand(&cfg, &modules).unwrap();
        assert_eq!(expanded, json!({"a": {"x": 1}, "b": {"x": 1}}));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let cfg = json!({"include": "whatever", "type": "toml"});
        let err = expand(&cfg, &ModuleRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("Unsupported inclusion type"));
    }

    #[test]
    fn test_unregistered_module_rejected() {
        let cfg = json!({"include": "nowhere.cfg", "type": "python"});
        assert!(expand(&cfg, &ModuleRegistry::new()).is_err());

        let cfg = json!({"include": "nodots", "type": "python"});
        let err = expand(&cfg, &ModuleRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("module.attribute"));
    }

    #[test]
    fn test_scalar_module_rejected() {
        let modules = ModuleRegistry::new().with_fragment("cfgs.scalar", json!(3));
        let cfg = json!({"include": "cfgs.scalar", "type": "python"});
        assert!(expand(&cfg, &modules).is_err());
    }

    #[test]
    fn test_missing_json_file() {
        let cfg = json!({"include": "/definitely/not/here.json"});
        let err = expand(&cfg, &ModuleRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("Could not find json file"));
    }

    #[test]
    fn test_file_format_from_path() {
        assert_eq!(FileFormat::from_path(Path::new("a/b.yaml")), FileFormat::Yaml);
        assert_eq!(FileFormat::from_path(Path::new("a/b.yml")), FileFormat::Yaml);
        assert_eq!(FileFormat::from_path(Path::new("a/b.json")), FileFormat::Json);
    }
}
