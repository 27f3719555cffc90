//! Process-wide handle to the loaded configuration.

use std::sync::{Arc, RwLock, RwLockWriteGuard};

use crate::error::{ConfigError, ConfigResult};
use crate::global::OwsConfig;

/// Holds at most one loaded [`OwsConfig`], shared by reference count.
///
/// Services create one cell at startup and hand it to every consumer.
#[derive(Debug, Default)]
pub struct ConfigCell {
    slot: RwLock<Option<Arc<OwsConfig>>>,
}

impl ConfigCell {
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// The loaded configuration, if any.
    pub fn get(&self) -> ConfigResult<Option<Arc<OwsConfig>>> {
        Ok(self
            .slot
            .read()
            .map_err(|_| ConfigError::config("Configuration lock poisoned"))?
            .clone())
    }

    /// Return the loaded configuration, running `loader` first when nothing
    /// is loaded or when `refresh` is set.
    pub fn get_or_load<F>(&self, refresh: bool, loader: F) -> ConfigResult<Arc<OwsConfig>>
    where
        F: FnOnce() -> ConfigResult<OwsConfig>,
    {
        let mut slot = self.write()?;
        if !refresh {
            if let Some(cfg) = slot.as_ref() {
                return Ok(cfg.clone());
            }
        }
        let cfg = Arc::new(loader()?);
        *slot = Some(cfg.clone());
        Ok(cfg)
    }

    /// Drop the loaded configuration.
    pub fn reset(&self) -> ConfigResult<()> {
        *self.write()? = None;
        Ok(())
    }

    /// Run `f` with `cfg` installed, then restore whatever was there before,
    /// even if `f` panics.
    pub fn with_override<R>(
        &self,
        cfg: OwsConfig,
        f: impl FnOnce(&Arc<OwsConfig>) -> R,
    ) -> ConfigResult<R> {
        let installed = Arc::new(cfg);
        let previous = self.write()?.replace(installed.clone());
        let _restore = Restore {
            cell: self,
            previous,
        };
        Ok(f(&installed))
    }

    fn write(&self) -> ConfigResult<RwLockWriteGuard<'_, Option<Arc<OwsConfig>>>> {
        self.slot
            .write()
            .map_err(|_| ConfigError::config("Configuration lock poisoned"))
    }
}

/// Puts the overridden configuration back when dropped.
struct Restore<'a> {
    cell: &'a ConfigCell,
    previous: Option<Arc<OwsConfig>>,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        // A poisoned lock still holds the slot; take it over.
        let mut slot = match self.cell.slot.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = self.previous.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(title: &str) -> ConfigResult<OwsConfig> {
        OwsConfig::parse(&json!({
            "global": {
                "title": title,
                "allowed_urls": ["http://localhost/"],
                "published_CRSs": {"EPSG:4326": {"geographic": true}}
            },
            "layers": [{
                "name": "ls8",
                "title": "Landsat 8",
                "product_name": "ls8",
                "image_processing": {"extent_mask_func": "masks.valid_data"},
                "styling": {"styles": [{"name": "rgb", "title": "RGB"}]}
            }]
        }))
    }

    #[test]
    fn test_get_or_load_reuses_instance() {
        let cell = ConfigCell::new();
        assert!(cell.get().unwrap().is_none());

        let first = cell.get_or_load(false, || config("first")).unwrap();
        let again = cell.get_or_load(false, || config("second")).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.metadata.title, "first");

        let refreshed = cell.get_or_load(true, || config("second")).unwrap();
        assert_eq!(refreshed.metadata.title, "second");
    }

    #[test]
    fn test_loader_error_leaves_cell_untouched() {
        let cell = ConfigCell::new();
        cell.get_or_load(false, || config("kept")).unwrap();
        assert!(cell
            .get_or_load(true, || Err(ConfigError::config("boom")))
            .is_err());
        assert_eq!(cell.get().unwrap().unwrap().metadata.title, "kept");
    }

    #[test]
    fn test_reset_and_override() {
        let cell = ConfigCell::new();
        cell.get_or_load(false, || config("base")).unwrap();

        let seen = cell
            .with_override(config("override").unwrap(), |cfg| cfg.metadata.title.clone())
            .unwrap();
        assert_eq!(seen, "override");
        assert_eq!(cell.get().unwrap().unwrap().metadata.title, "base");

        cell.reset().unwrap();
        assert!(cell.get().unwrap().is_none());
    }

    #[test]
    fn test_override_restored_after_panic() {
        let cell = ConfigCell::new();
        cell.get_or_load(false, || config("base")).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cell.with_override(config("override").unwrap(), |_| panic!("handler failed"))
        }));
        assert!(outcome.is_err());
        assert_eq!(cell.get().unwrap().unwrap().metadata.title, "base");
    }
}
