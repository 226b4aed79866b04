//! Mod loader - resolves mod ids to loadable code
//!
//! Mods live in one of two directories: a fixed core directory, scanned once
//! at first use, and a user directory that is rescanned on every call. Code
//! comes from the statically linked catalog or, failing that, from a native
//! shared library in the mod's directory. Resolved code is cached per install
//! directory until purged, so a reload after `unload` starts fresh.

use async_trait::async_trait;
use libloading::{Library, Symbol};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use super::manifest::PackageMetadata;
use super::registry::ModCatalog;
use crate::application::errors::ModError;
use crate::domain::entities::ModModule;

/// Symbol a native mod library must export
pub const INIT_SYMBOL: &[u8] = b"lilypad_mod_init";

/// Function signature for native mod initialization. The returned pointer
/// must come from `Box::into_raw`.
pub type ModInitFn = unsafe extern "C" fn() -> *mut ModModule;

/// Code resolved for a mod, plus its package metadata
#[derive(Debug, Clone)]
pub struct LoadedMod {
    pub mod_id: String,
    /// Resolved install directory
    pub path: PathBuf,
    pub module: Arc<ModModule>,
    pub metadata: Option<PackageMetadata>,
}

/// Capability to resolve and purge mod code
#[async_trait]
pub trait CodeProvider: Send + Sync {
    /// Mod ids in the core directory, snapshotted on first call
    fn list_core_mod_ids(&self) -> Vec<String>;

    /// Mod ids in the user directory, scanned on every call
    fn list_user_mod_ids(&self) -> Vec<String>;

    /// Resolve a mod's code and metadata
    async fn load(&self, mod_id: &str) -> Result<LoadedMod, ModError>;

    /// Purge cached code for a mod so the next `load` resolves it again
    fn unload(&self, mod_id: &str) -> Result<(), ModError>;
}

/// Filesystem-backed mod loader
pub struct ModLoader {
    core_dir: PathBuf,
    user_dir: PathBuf,
    catalog: Arc<ModCatalog>,
    core_ids: OnceCell<Vec<String>>,
    cache: RwLock<HashMap<PathBuf, LoadedMod>>,
}

impl ModLoader {
    pub fn new(
        core_dir: impl Into<PathBuf>,
        user_dir: impl Into<PathBuf>,
        catalog: Arc<ModCatalog>,
    ) -> Self {
        Self {
            core_dir: core_dir.into(),
            user_dir: user_dir.into(),
            catalog,
            core_ids: OnceCell::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<ModCatalog> {
        &self.catalog
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// True if code for this mod is currently cached
    pub fn is_cached(&self, mod_id: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|loaded| loaded.mod_id == mod_id)
    }

    fn install_dir(&self, mod_id: &str) -> PathBuf {
        if self.list_core_mod_ids().iter().any(|id| id == mod_id) {
            self.core_dir.join(mod_id)
        } else {
            self.user_dir.join(mod_id)
        }
    }

    fn load_native(
        &self,
        mod_id: &str,
        dir: &Path,
        metadata: Option<&PackageMetadata>,
    ) -> Result<ModModule, ModError> {
        let file = metadata
            .and_then(|m| m.main.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(libloading::library_filename(mod_id)));
        let library_path = dir.join(file);

        if !library_path.is_file() {
            return Err(load_error(
                mod_id,
                format!(
                    "no built-in code and no library at {}",
                    library_path.display()
                ),
            ));
        }

        // SAFETY: loading a library runs its initializers; mods in the mod
        // directories are trusted code.
        let library = unsafe { Library::new(&library_path) }
            .map_err(|e| load_error(mod_id, format!("Failed to load library: {}", e)))?;

        // SAFETY: the symbol must have the `ModInitFn` signature and return
        // a pointer obtained from `Box::into_raw`.
        let module = unsafe {
            let init: Symbol<ModInitFn> = library
                .get(INIT_SYMBOL)
                .map_err(|e| load_error(mod_id, format!("Failed to find init function: {}", e)))?;
            let ptr = init();
            if ptr.is_null() {
                return Err(load_error(mod_id, "Mod init returned null".to_string()));
            }
            *Box::from_raw(ptr)
        };

        tracing::info!("Loaded native mod library: {}", library_path.display());
        Ok(module.with_library(Arc::new(library)))
    }
}

#[async_trait]
impl CodeProvider for ModLoader {
    fn list_core_mod_ids(&self) -> Vec<String> {
        self.core_ids
            .get_or_init(|| scan_mod_dir(&self.core_dir))
            .clone()
    }

    fn list_user_mod_ids(&self) -> Vec<String> {
        scan_mod_dir(&self.user_dir)
    }

    async fn load(&self, mod_id: &str) -> Result<LoadedMod, ModError> {
        validate_mod_id(mod_id)?;

        let dir = self.install_dir(mod_id);
        let path = tokio::fs::canonicalize(&dir)
            .await
            .map_err(|e| load_error(mod_id, format!("not found at {}: {}", dir.display(), e)))?;
        if !path.is_dir() {
            return Err(load_error(mod_id, format!("{} is not a directory", path.display())));
        }

        let cached = self.cache.read()?.get(&path).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let metadata = PackageMetadata::from_dir(&path).await;
        let module = match self.catalog.get(mod_id) {
            Some(module) => module,
            None => Arc::new(self.load_native(mod_id, &path, metadata.as_ref())?),
        };

        let loaded = LoadedMod {
            mod_id: mod_id.to_string(),
            path: path.clone(),
            module,
            metadata,
        };
        self.cache.write()?.insert(path, loaded.clone());

        tracing::debug!("Resolved code for mod: {}", mod_id);
        Ok(loaded)
    }

    fn unload(&self, mod_id: &str) -> Result<(), ModError> {
        let dir = self.install_dir(mod_id);
        // The directory may already be gone (uninstalled); fall back to the
        // unresolved path and the recorded id.
        let resolved = std::fs::canonicalize(&dir).unwrap_or(dir);

        let mut cache = self.cache.write()?;
        let before = cache.len();
        cache.retain(|path, loaded| !(path.starts_with(&resolved) || loaded.mod_id == mod_id));
        let purged = before - cache.len();

        if purged == 0 {
            return Err(ModError::NotFound(mod_id.to_string()));
        }
        tracing::debug!("Purged {} cached entries for mod: {}", purged, mod_id);
        Ok(())
    }
}

fn load_error(mod_id: &str, reason: String) -> ModError {
    ModError::Load {
        id: mod_id.to_string(),
        reason,
    }
}

fn validate_mod_id(mod_id: &str) -> Result<(), ModError> {
    if mod_id.is_empty()
        || mod_id.starts_with('.')
        || mod_id.contains(['/', '\\'])
        || mod_id.chars().any(char::is_whitespace)
    {
        return Err(load_error(mod_id, "invalid mod id".to_string()));
    }
    Ok(())
}

/// Names of the visible subdirectories of `dir`, sorted. Symlinked mod
/// directories count.
fn scan_mod_dir(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to read mod directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut ids: Vec<String> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Failed to read directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.'))
        .collect();
    ids.sort();
    ids
}
