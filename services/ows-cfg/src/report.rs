//! Text reports over a readied configuration.

use std::fmt::Write;

use ows_config::{ConfigEntry, Folder, LayerNode, NamedLayer, OwsConfig};

/// One line per skipped or pending layer.
pub fn problems(cfg: &OwsConfig) -> Vec<String> {
    let mut out = Vec::new();
    collect_problems(cfg.layers(), &mut out);
    out
}

fn collect_problems(folder: &Folder, out: &mut Vec<String>) {
    for skipped in folder.skipped() {
        out.push(format!("{}: skipped: {}", folder.label, skipped));
    }
    for pending in folder.unready_layers() {
        out.push(format!("{}: not ready: {}", folder.label, pending.label()));
    }
    for child in folder.child_layers() {
        if let LayerNode::Folder(f) = child {
            collect_problems(f, out);
        }
    }
}

pub fn summary(cfg: &OwsConfig) -> String {
    let all = cfg.all_named_layers();
    let live = cfg.layer_index();
    let hidden = live.values().filter(|l| l.is_hidden()).count();
    format!(
        "{} named layers: {} live ({} hidden), {} not ready; {} active products",
        all.len(),
        live.len(),
        hidden,
        all.len() - live.len(),
        cfg.active_products().len()
    )
}

/// Indented outline of the layer tree.
pub fn render_tree(cfg: &OwsConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", cfg.metadata.title);
    render_folder(cfg.layers(), 1, &mut out);
    out
}

fn render_folder(folder: &Folder, depth: usize, out: &mut String) {
    for node in folder.all_layers() {
        match node {
            LayerNode::Folder(f) => {
                let _ = writeln!(out, "{}+ {} [{}]", indent(depth), f.metadata.title, f.label);
                render_folder(f, depth + 1, out);
            }
            LayerNode::Named(l) => {
                let _ = writeln!(out, "{}- {} ({})", indent(depth), l.name, layer_state(l));
            }
        }
    }
}

fn layer_state(layer: &NamedLayer) -> &'static str {
    if !layer.is_ready() {
        "not ready"
    } else if !layer.has_ranges() {
        "no ranges"
    } else if layer.hide {
        "hidden"
    } else {
        "ready"
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}
