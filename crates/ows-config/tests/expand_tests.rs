//! Inclusion expansion over real files and the root source lookup.

use std::collections::BTreeSet;

use ows_config::expand::FileFormat;
use ows_config::source::read_config_from;
use ows_config::{cfg_expand, read_config, ConfigSource, ModuleRegistry, OwsConfig};
use serde_json::json;
use test_utils::fixtures::{config, global_section, layer};
use test_utils::{assert_config_err, ConfigDir};

// ============================================================================
// File inclusion
// ============================================================================

#[test]
fn test_nested_relative_includes() {
    let dir = ConfigDir::new();
    dir.write_json("layers/leaf.json", &json!({"leaf": true}));
    dir.write_json(
        "layers/branch.json",
        &json!({"branch": {"include": "leaf.json", "type": "json"}}),
    );
    let root = dir.write_json(
        "root.json",
        &json!({"tree": {"include": "layers/branch.json"}}),
    );

    let cfg = read_config(root.to_str(), &ModuleRegistry::new()).unwrap();
    assert_eq!(cfg, json!({"tree": {"branch": {"leaf": true}}}));
}

#[test]
fn test_yaml_include() {
    let dir = ConfigDir::new();
    dir.write_text("styles.yaml", "name: rgb\ntitle: RGB\nneeded_bands:\n  - red\n");
    let root = dir.write_json(
        "root.json",
        &json!({"styles": [{"include": "styles.yaml", "type": "yaml"}]}),
    );

    let cfg = read_config(root.to_str(), &ModuleRegistry::new()).unwrap();
    assert_eq!(
        cfg,
        json!({"styles": [{"name": "rgb", "title": "RGB", "needed_bands": ["red"]}]})
    );
}

#[test]
fn test_self_include_is_cyclic() {
    let dir = ConfigDir::new();
    let root = dir.write_json("loop.json", &json!({"again": {"include": "loop.json"}}));

    assert_config_err!(
        read_config(root.to_str(), &ModuleRegistry::new()),
        "Cyclic inclusion"
    );
}

#[test]
fn test_three_file_cycle() {
    let dir = ConfigDir::new();
    dir.write_json("a.json", &json!({"next": {"include": "b.json"}}));
    dir.write_json("b.json", &json!({"next": {"include": "c.json"}}));
    dir.write_json("c.json", &json!({"next": {"include": "a.json"}}));

    let source = ConfigSource::File(dir.path().join("a.json"), FileFormat::Json);
    assert_config_err!(
        read_config_from(source, &ModuleRegistry::new()),
        "Cyclic inclusion"
    );
}

#[test]
fn test_same_file_in_sibling_branches() {
    let dir = ConfigDir::new();
    dir.write_json("shared.json", &json!({"shared": 1}));
    let root = dir.write_json(
        "root.json",
        &json!({"x": {"include": "shared.json"}, "y": {"include": "shared.json"}}),
    );

    let cfg = read_config(root.to_str(), &ModuleRegistry::new()).unwrap();
    assert_eq!(cfg["x"], cfg["y"]);
}

#[test]
fn test_invalid_json_file() {
    let dir = ConfigDir::new();
    let root = dir.write_text("broken.json", "{\"global\": ");
    let err = read_config(root.to_str(), &ModuleRegistry::new()).unwrap_err();
    assert!(err.to_string().contains("Invalid JSON"));
    assert_eq!(err.http_status_code(), 400);
}

// ============================================================================
// Module inclusion
// ============================================================================

#[test]
fn test_module_include_from_file() {
    let dir = ConfigDir::new();
    let root = dir.write_json(
        "root.json",
        &json!({"layers": [{"include": "site.layers.ls8", "type": "python"}]}),
    );
    let modules = ModuleRegistry::new().with_fragment("site.layers.ls8", layer("ls8", "ls8_ard"));

    let cfg = read_config(root.to_str(), &modules).unwrap();
    assert_eq!(cfg["layers"][0]["name"], json!("ls8"));
}

#[test]
fn test_module_and_file_mutual_cycle() {
    let dir = ConfigDir::new();
    let file = dir.write_json("part.json", &json!({"m": {"include": "site.part", "type": "python"}}));
    let mut modules = ModuleRegistry::new();
    let path = file.to_string_lossy().to_string();
    modules.register_fn("site.part", move || json!({"f": {"include": path.clone()}}));

    let root = json!({"include": "site.part", "type": "python"});
    assert_config_err!(
        cfg_expand(&root, None, &BTreeSet::new(), &modules),
        "Cyclic inclusion"
    );
}

// ============================================================================
// Root source resolution
// ============================================================================

#[test]
fn test_load_full_config_from_bare_name() {
    let modules = ModuleRegistry::new()
        .with_fragment(
            "ows_cfg.prod",
            json!({
                "global": {"include": "ows_cfg.global", "type": "python"},
                "layers": [layer("a", "pa")]
            }),
        )
        .with_fragment("ows_cfg.global", global_section());

    let cfg = OwsConfig::load(Some("prod"), &modules).unwrap();
    assert_eq!(cfg.metadata.title, "Test OWS");
    assert_eq!(cfg.all_named_layers().len(), 1);
}

#[test]
fn test_inline_json_source() {
    let text = serde_json::to_string(&config(vec![layer("a", "pa")])).unwrap();
    let cfg = OwsConfig::load(Some(text.as_str()), &ModuleRegistry::new()).unwrap();
    assert_eq!(cfg.all_named_layers()[0].name, "a");
}

#[test]
fn test_missing_file_source() {
    let dir = ConfigDir::new();
    let missing = dir.path().join("nope.json");
    assert_config_err!(
        read_config(missing.to_str(), &ModuleRegistry::new()),
        "Could not find json file"
    );
}
