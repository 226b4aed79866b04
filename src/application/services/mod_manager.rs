//! Mod manager - owns the registry of loaded mods and their commands

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, error, info, warn};

use crate::application::errors::ModError;
use crate::application::events::{EventBus, ModEvent};
use crate::domain::entities::{Command, ModContext, ModDefinition, ModRecord};
use crate::domain::traits::Transport;
use crate::infrastructure::plugins::{CodeProvider, LoadedMod};
use crate::infrastructure::storage::ConfigStore;

/// Version mods are checked against
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Loads, unloads and reloads mods, and keeps the global command registry.
///
/// Registry locks are never held across an `.await`; the collision check and
/// the insertion happen in one critical section, so concurrent loads of
/// different mods cannot both claim the same command id.
pub struct ModManager {
    loader: Arc<dyn CodeProvider>,
    store: Arc<ConfigStore>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    mods: RwLock<HashMap<String, Arc<ModRecord>>>,
    commands: RwLock<HashMap<String, Arc<Command>>>,
    framework_version: String,
    self_ref: Weak<ModManager>,
}

impl ModManager {
    pub fn new(
        loader: Arc<dyn CodeProvider>,
        store: Arc<ConfigStore>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Self::with_framework_version(loader, store, transport, FRAMEWORK_VERSION)
    }

    pub fn with_framework_version(
        loader: Arc<dyn CodeProvider>,
        store: Arc<ConfigStore>,
        transport: Arc<dyn Transport>,
        framework_version: &str,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            loader,
            store,
            transport,
            events: Arc::new(EventBus::new()),
            mods: RwLock::new(HashMap::new()),
            commands: RwLock::new(HashMap::new()),
            framework_version: framework_version.to_string(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn loader(&self) -> &Arc<dyn CodeProvider> {
        &self.loader
    }

    pub fn framework_version(&self) -> &str {
        &self.framework_version
    }

    pub fn is_loaded(&self, mod_id: &str) -> bool {
        self.mods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(mod_id)
    }

    pub fn get_mod(&self, mod_id: &str) -> Option<Arc<ModRecord>> {
        self.mods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(mod_id)
            .cloned()
    }

    /// Case-insensitive command lookup
    pub fn get_command(&self, command_id: &str) -> Option<Arc<Command>> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command_id.to_lowercase())
            .cloned()
    }

    /// Loaded mods, sorted by id
    pub fn list_mods(&self) -> Vec<Arc<ModRecord>> {
        let mut mods: Vec<_> = self
            .mods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        mods.sort_by(|a, b| a.id.cmp(&b.id));
        mods
    }

    /// Registered commands, sorted by id
    pub fn list_commands(&self) -> Vec<Arc<Command>> {
        let mut commands: Vec<_> = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        commands.sort_by(|a, b| a.id.cmp(&b.id));
        commands
    }

    /// Core and user mod ids that are installed, loaded or not
    pub fn available_mod_ids(&self) -> Vec<String> {
        let mut ids = self.loader.list_core_mod_ids();
        ids.extend(self.loader.list_user_mod_ids());
        ids.sort();
        ids.dedup();
        ids
    }

    /// Load a mod and register its commands. Nothing is registered unless
    /// every step succeeds.
    pub async fn load_mod(&self, mod_id: &str) -> Result<Arc<ModRecord>, ModError> {
        info!("Loading mod: {}", mod_id);

        if self.is_loaded(mod_id) {
            return Err(ModError::AlreadyLoaded(mod_id.to_string()));
        }

        match self.try_load(mod_id).await {
            Ok(record) => {
                info!("Loaded mod: {} v{}", record.id, record.version);
                Ok(record)
            }
            Err(e) => {
                // A concurrent load won the race; its code stays cached.
                if !matches!(e, ModError::AlreadyLoaded(_)) {
                    if let Err(purge) = self.loader.unload(mod_id) {
                        debug!("Nothing to purge for {}: {}", mod_id, purge);
                    }
                }
                error!("Failed to load mod '{}': {}", mod_id, e);
                Err(e)
            }
        }
    }

    async fn try_load(&self, mod_id: &str) -> Result<Arc<ModRecord>, ModError> {
        let loaded = self.loader.load(mod_id).await.map_err(|e| match e {
            ModError::Load { .. } | ModError::Internal(_) => e,
            other => ModError::Load {
                id: mod_id.to_string(),
                reason: other.to_string(),
            },
        })?;

        if let Some(required) = &loaded.module.min_framework_version {
            self.check_framework_version(mod_id, required)?;
        }

        let config = self
            .store
            .assemble(mod_id, &loaded.module.defaults)
            .await
            .map_err(|e| ModError::Load {
                id: mod_id.to_string(),
                reason: format!("config: {}", e),
            })?;

        let ctx = ModContext {
            mod_id: mod_id.to_string(),
            config: config.clone(),
            transport: self.transport.clone(),
            manager: self.self_ref.clone(),
        };
        let definition = loaded
            .module
            .instantiate(ctx)
            .map_err(|reason| ModError::MalformedMod {
                id: mod_id.to_string(),
                reason,
            })?;

        let record = build_record(&loaded, config, definition)?;
        let record = self.register(record)?;

        for command_id in sorted_keys(&record.commands) {
            self.events.emit(&ModEvent::CommandLoaded {
                command_id,
                mod_id: record.id.clone(),
            });
        }
        self.events.emit(&ModEvent::ModLoaded {
            mod_id: record.id.clone(),
        });

        Ok(record)
    }

    fn check_framework_version(&self, mod_id: &str, required: &str) -> Result<(), ModError> {
        let needed = parse_semver_triplet(required).ok_or_else(|| ModError::MalformedMod {
            id: mod_id.to_string(),
            reason: format!("unparseable framework version requirement '{}'", required),
        })?;
        let running = parse_semver_triplet(&self.framework_version).unwrap_or((0, 0, 0));

        if running < needed {
            return Err(ModError::IncompatibleVersion {
                id: mod_id.to_string(),
                required: required.to_string(),
                running: self.framework_version.clone(),
            });
        }
        Ok(())
    }

    /// Collision check and insertion, atomically. On failure the mod's
    /// teardown runs, since its factory may already have subscribed to things.
    fn register(&self, record: ModRecord) -> Result<Arc<ModRecord>, ModError> {
        let record = Arc::new(record);
        match self.insert(&record) {
            Ok(()) => Ok(record),
            Err(e) => {
                record.teardown();
                Err(e)
            }
        }
    }

    fn insert(&self, record: &Arc<ModRecord>) -> Result<(), ModError> {
        let mut mods = self.mods.write()?;
        let mut commands = self.commands.write()?;

        if mods.contains_key(&record.id) {
            return Err(ModError::AlreadyLoaded(record.id.clone()));
        }
        let mut collisions: Vec<String> = record
            .commands
            .keys()
            .filter(|id| commands.contains_key(*id))
            .cloned()
            .collect();
        if !collisions.is_empty() {
            collisions.sort();
            return Err(ModError::CommandCollision {
                id: record.id.clone(),
                commands: collisions,
            });
        }

        for (id, command) in &record.commands {
            commands.insert(id.clone(), command.clone());
        }
        mods.insert(record.id.clone(), record.clone());
        Ok(())
    }

    /// Unload a mod. Handlers already running keep running.
    pub fn unload_mod(&self, mod_id: &str, force: bool) -> Result<(), ModError> {
        info!("Unloading mod: {}", mod_id);

        let record = self
            .get_mod(mod_id)
            .ok_or_else(|| ModError::NotLoaded(mod_id.to_string()))?;
        if record.block_unload && !force {
            return Err(ModError::Blocked {
                id: mod_id.to_string(),
                action: "unloaded",
            });
        }

        self.commands
            .write()?
            .retain(|_, command| command.mod_id != mod_id);

        record.teardown();

        self.mods.write()?.remove(mod_id);

        if let Err(e) = self.loader.unload(mod_id) {
            warn!("Failed to purge code for {}: {}", mod_id, e);
        }

        self.events.emit(&ModEvent::ModUnloaded {
            mod_id: mod_id.to_string(),
        });
        info!("Unloaded mod: {}", mod_id);
        Ok(())
    }

    /// Unload then load a mod. If the code no longer loads, the mod stays
    /// unloaded and the load error is returned.
    pub async fn reload_mod(&self, mod_id: &str) -> Result<Arc<ModRecord>, ModError> {
        info!("Reloading mod: {}", mod_id);

        let record = self
            .get_mod(mod_id)
            .ok_or_else(|| ModError::NotLoaded(mod_id.to_string()))?;
        if record.block_reload {
            return Err(ModError::Blocked {
                id: mod_id.to_string(),
                action: "reloaded",
            });
        }
        drop(record);

        self.unload_mod(mod_id, true)?;
        let record = self.load_mod(mod_id).await?;

        self.events.emit(&ModEvent::ModReloaded {
            mod_id: mod_id.to_string(),
        });
        Ok(record)
    }

    /// Load several mods in order. Every id is attempted; if any failed the
    /// failures are returned together.
    pub async fn load_mods<I, S>(&self, mod_ids: I) -> Result<Vec<Arc<ModRecord>>, ModError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut loaded = Vec::new();
        let mut failures = Vec::new();

        for mod_id in mod_ids {
            let mod_id = mod_id.as_ref();
            match self.load_mod(mod_id).await {
                Ok(record) => loaded.push(record),
                Err(e) => failures.push((mod_id.to_string(), e)),
            }
        }

        if failures.is_empty() {
            Ok(loaded)
        } else {
            Err(ModError::Batch(failures))
        }
    }
}

/// Merge metadata layers and attach commands to a new record. The mod's own
/// fields win, then package metadata, then defaults.
fn build_record(
    loaded: &LoadedMod,
    config: Arc<crate::infrastructure::storage::ModConfig>,
    definition: ModDefinition,
) -> Result<ModRecord, ModError> {
    let metadata = loaded.metadata.clone().unwrap_or_default();
    let mut record = ModRecord::new(loaded.mod_id.clone(), loaded.module.clone(), config);

    record.name = definition
        .name
        .or(metadata.name.clone())
        .unwrap_or_else(|| loaded.mod_id.clone());
    record.version = definition
        .version
        .or(metadata.version.clone())
        .unwrap_or_else(|| "0.0.0".to_string());
    record.author = definition
        .author
        .or_else(|| metadata.author_name().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    record.description = definition
        .description
        .or(metadata.description.clone())
        .unwrap_or_default();
    record.config_items = definition.config_items;
    record.block_unload = definition.block_unload;
    record.block_reload = definition.block_reload;
    record.set_teardown(definition.teardown);

    for mut command in definition.commands {
        command.id = command.id.to_lowercase();
        command.mod_id = loaded.mod_id.clone();
        if record.commands.contains_key(&command.id) {
            record.teardown();
            return Err(ModError::MalformedMod {
                id: loaded.mod_id.clone(),
                reason: format!("command '{}' declared twice", command.id),
            });
        }
        record.commands.insert(command.id.clone(), Arc::new(command));
    }

    Ok(record)
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

/// Parse `major.minor.patch`, tolerating a leading `v` or comparison
/// operator and ignoring pre-release or build suffixes.
pub fn parse_semver_triplet(version: &str) -> Option<(u64, u64, u64)> {
    let normalized = version
        .trim()
        .trim_start_matches(['>', '=', '^', '~'])
        .trim_start_matches(['v', 'V']);
    let core = normalized
        .split_once(['-', '+'])
        .map(|(v, _)| v)
        .unwrap_or(normalized);
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
