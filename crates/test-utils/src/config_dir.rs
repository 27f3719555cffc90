//! Temporary directories holding configuration files.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

/// A scratch directory that is removed when dropped.
pub struct ConfigDir {
    dir: TempDir,
}

impl ConfigDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `value` as pretty JSON to `name` (relative, may contain
    /// sub-directories) and return the full path.
    pub fn write_json(&self, name: &str, value: &Value) -> PathBuf {
        let text = serde_json::to_string_pretty(value).expect("serialise fragment");
        self.write_text(name, &text)
    }

    pub fn write_text(&self, name: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, text).expect("write fixture file");
        path
    }
}

impl Default for ConfigDir {
    fn default() -> Self {
        Self::new()
    }
}
