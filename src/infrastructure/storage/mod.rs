//! File-based config storage
//!
//! Each mod gets a `ModConfig` assembled from its declared defaults, the
//! static section of the bot config, and a JSON snapshot on disk at
//! `<config_dir>/<environment>/<mod_id>.json`. The snapshot only ever holds
//! the keys a mod explicitly set.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::application::errors::StorageError;

/// Recursively merge `overlay` into `base`. Objects merge key by key, any
/// other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Assembles and persists per-mod configuration
pub struct ConfigStore {
    base_path: PathBuf,
    static_sections: HashMap<String, Value>,
}

impl ConfigStore {
    pub fn new(config_dir: impl Into<PathBuf>, environment: &str) -> Self {
        Self {
            base_path: config_dir.into().join(environment),
            static_sections: HashMap::new(),
        }
    }

    /// Static per-mod sections from the bot config file
    pub fn with_static_sections(mut self, sections: HashMap<String, Value>) -> Self {
        self.static_sections = sections;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn snapshot_path(&self, mod_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", mod_id))
    }

    /// Read a mod's saved snapshot. A missing file is an empty object.
    pub async fn read_snapshot(&self, mod_id: &str) -> Result<Map<String, Value>, StorageError> {
        let path = self.snapshot_path(mod_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::Serialization(format!(
                "{} does not contain a JSON object",
                path.display()
            ))),
            Err(e) => Err(StorageError::Serialization(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Build the live config object for a mod: defaults, then the static
    /// section, then the snapshot. Later layers win.
    pub async fn assemble(&self, mod_id: &str, defaults: &Value) -> Result<Arc<ModConfig>, StorageError> {
        let mut values = match defaults {
            Value::Object(_) => defaults.clone(),
            _ => Value::Object(Map::new()),
        };
        if let Some(section) = self.static_sections.get(mod_id) {
            deep_merge(&mut values, section);
        }
        let snapshot = self.read_snapshot(mod_id).await?;
        let saved_keys = snapshot.keys().cloned().collect();
        deep_merge(&mut values, &Value::Object(snapshot));

        let values = match values {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(Arc::new(ModConfig {
            mod_id: mod_id.to_string(),
            path: self.snapshot_path(mod_id),
            values: RwLock::new(values),
            saved_keys: RwLock::new(saved_keys),
            save_lock: tokio::sync::Mutex::new(()),
        }))
    }
}

/// Live configuration object shared between a mod and the store
#[derive(Debug)]
pub struct ModConfig {
    mod_id: String,
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
    saved_keys: RwLock<BTreeSet<String>>,
    /// Held across a write so snapshots hit the disk in order
    save_lock: tokio::sync::Mutex<()>,
}

impl ModConfig {
    pub fn mod_id(&self) -> &str {
        &self.mod_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Typed lookup; `None` if missing or of the wrong shape
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Set a key. The key becomes part of the snapshot on the next `save`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), value);
        self.saved_keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }

    /// All current values, including defaults and static config
    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Set a key and persist it. If the save fails the key is restored to
    /// what it was before.
    pub async fn set_and_save(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let (previous, was_saved) = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            let mut saved_keys = self.saved_keys.write().unwrap_or_else(PoisonError::into_inner);
            (
                values.insert(key.to_string(), value),
                !saved_keys.insert(key.to_string()),
            )
        };

        let result = self.save().await;
        if result.is_err() {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
            if !was_saved {
                self.saved_keys
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(key);
            }
        }
        result
    }

    /// Persist the keys that were set (or loaded from a previous snapshot)
    pub async fn save(&self) -> Result<(), StorageError> {
        let _writing = self.save_lock.lock().await;
        let content = {
            let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
            let saved_keys = self.saved_keys.read().unwrap_or_else(PoisonError::into_inner);
            let subset: Map<String, Value> = saved_keys
                .iter()
                .filter_map(|k| values.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            serde_json::to_string_pretty(&Value::Object(subset))
                .map_err(|e| StorageError::Serialization(e.to_string()))?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        tracing::debug!("Saved config for {} to {}", self.mod_id, self.path.display());
        Ok(())
    }
}
