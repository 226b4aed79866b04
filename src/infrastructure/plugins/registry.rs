//! Mod catalog - statically linked mod code, keyed by mod id

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::application::errors::ModError;
use crate::domain::entities::ModModule;

/// Registry of mods compiled into the binary. The loader consults it before
/// looking for a native library in the mod's directory.
pub struct ModCatalog {
    modules: RwLock<HashMap<String, Arc<ModModule>>>,
}

impl ModCatalog {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// Register mod code. A later registration for the same id replaces the
    /// earlier one; already loaded mods keep the code they were built from.
    pub fn register(&self, module: ModModule) -> Result<(), ModError> {
        let id = module.id.clone();
        let mut modules = self.modules.write()?;
        if modules.insert(id.clone(), Arc::new(module)).is_some() {
            tracing::debug!("Replaced catalog entry for mod: {}", id);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModModule>> {
        self.modules.read().ok()?.get(id).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .read()
            .map(|modules| modules.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules
            .read()
            .map(|modules| modules.contains_key(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.modules.read().map(|modules| modules.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ModCatalog {
    fn default() -> Self {
        Self::new()
    }
}
