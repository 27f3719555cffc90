//! Two-phase lifecycle shared by every configuration entry.
//!
//! An entry is first built from literal configuration ("parse-only") and is
//! only usable once `make_ready` has validated it against the live index.
//! Values that can only be known after that second phase live in
//! [`Deferred`] slots; the owning entry's [`Readiness`] tracks which slots
//! are still outstanding so that `make_ready` can refuse to complete while any
//! of them is unassigned.

use std::collections::BTreeSet;

use crate::error::{ConfigError, ConfigResult};

/// Readiness bookkeeping for one entry.
#[derive(Debug, Clone)]
pub struct Readiness {
    context: String,
    ready: bool,
    unready: BTreeSet<String>,
}

impl Readiness {
    /// Create bookkeeping for an entry identified by `context` in diagnostics
    /// (e.g. `layer.ls8_nbart`).
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ready: false,
            unready: BTreeSet::new(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Declare a value that must be assigned before the entry can become ready.
    pub fn declare_unready(&mut self, name: &str) -> ConfigResult<()> {
        if self.ready {
            return Err(ConfigError::config(format!(
                "Cannot declare {} as unready on a ready object: {}",
                name, self.context
            )));
        }
        self.unready.insert(name.to_string());
        Ok(())
    }

    /// Clear the obligation for `name`.
    pub fn resolve(&mut self, name: &str) {
        self.unready.remove(name);
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.unready.contains(name)
    }

    /// Names still waiting for a value, sorted.
    pub fn pending(&self) -> Vec<String> {
        self.unready.iter().cloned().collect()
    }

    /// Fail if `name` is declared unready and the entry is not yet ready.
    pub fn guard(&self, name: &str) -> ConfigResult<()> {
        if !self.ready && self.unready.contains(name) {
            return Err(self.not_ready());
        }
        Ok(())
    }

    pub fn not_ready(&self) -> ConfigError {
        ConfigError::NotReady {
            context: self.context.clone(),
            names: self.pending(),
        }
    }

    /// Flip the entry to ready. Fails while any declared name is unassigned.
    ///
    /// Entries call this last in their own `make_ready`, so an error raised
    /// part-way through resolution leaves them unready.
    pub fn complete(&mut self) -> ConfigResult<()> {
        if !self.unready.is_empty() {
            return Err(self.not_ready());
        }
        self.ready = true;
        Ok(())
    }
}

/// A value that is unresolved until its owning entry is made ready.
#[derive(Debug, Clone)]
pub struct Deferred<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T> Deferred<T> {
    /// Declare the slot on `state`. Fails if the entry is already ready.
    pub fn declare(name: &'static str, state: &mut Readiness) -> ConfigResult<Self> {
        state.declare_unready(name)?;
        Ok(Self { name, value: None })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Assign the resolved value, clearing the obligation on `state`.
    pub fn set(&mut self, state: &mut Readiness, value: T) {
        state.resolve(self.name);
        self.value = Some(value);
    }

    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }

    /// Read the resolved value, or fail with the entry's not-ready diagnostic.
    pub fn get(&self, state: &Readiness) -> ConfigResult<&T> {
        self.value.as_ref().ok_or_else(|| state.not_ready())
    }

    pub fn get_mut(&mut self, state: &Readiness) -> ConfigResult<&mut T> {
        self.value.as_mut().ok_or_else(|| state.not_ready())
    }
}

/// Capabilities every configuration entry exposes.
pub trait ConfigEntry {
    fn readiness(&self) -> &Readiness;

    fn is_ready(&self) -> bool {
        self.readiness().is_ready()
    }

    /// Diagnostic label, e.g. `layer.ls8_nbart` or `folder.landsat`.
    fn context(&self) -> &str {
        self.readiness().context()
    }
}
