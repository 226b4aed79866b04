//! Mod entities: the resolved code of a mod, what it declares when
//! instantiated, and the record the mod manager keeps once it is loaded.

use libloading::Library;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::Command;
use crate::application::services::ModManager;
use crate::domain::traits::Transport;
use crate::infrastructure::storage::ModConfig;

/// Factory that instantiates a mod
pub type ModFactory = Arc<dyn Fn(ModContext) -> Result<ModDefinition, String> + Send + Sync>;

/// Teardown routine run when a mod is unloaded
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Validation hook for a config item: `Ok(true)` passes, `Ok(false)` fails
/// with a generic message, `Err` fails with a specific one
pub type ConfigValidator = Arc<dyn Fn(&Value) -> Result<bool, String> + Send + Sync>;

/// Loadable code for a mod, as resolved by the mod loader
pub struct ModModule {
    pub id: String,
    /// Oldest framework version this mod runs on
    pub min_framework_version: Option<String>,
    /// Config defaults, merged under static config and the saved snapshot
    pub defaults: Value,
    factory: ModFactory,
    /// Keeps a native library mapped while anything still uses its code
    library: Option<Arc<Library>>,
}

impl ModModule {
    pub fn new<F>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ModContext) -> Result<ModDefinition, String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            min_framework_version: None,
            defaults: Value::Object(Default::default()),
            factory: Arc::new(factory),
            library: None,
        }
    }

    pub fn with_min_framework_version(mut self, version: impl Into<String>) -> Self {
        self.min_framework_version = Some(version.into());
        self
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    pub(crate) fn with_library(mut self, library: Arc<Library>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn is_native(&self) -> bool {
        self.library.is_some()
    }

    pub fn instantiate(&self, ctx: ModContext) -> Result<ModDefinition, String> {
        (self.factory)(ctx)
    }
}

impl fmt::Debug for ModModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModModule")
            .field("id", &self.id)
            .field("min_framework_version", &self.min_framework_version)
            .field("native", &self.is_native())
            .finish()
    }
}

/// What a mod's factory receives
#[derive(Clone)]
pub struct ModContext {
    pub mod_id: String,
    pub config: Arc<ModConfig>,
    pub transport: Arc<dyn Transport>,
    pub manager: Weak<ModManager>,
}

impl ModContext {
    pub fn manager(&self) -> Option<Arc<ModManager>> {
        self.manager.upgrade()
    }
}

/// Fields a mod declares about itself when instantiated
#[derive(Default)]
pub struct ModDefinition {
    pub name: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub commands: Vec<Command>,
    pub config_items: Vec<ConfigItem>,
    pub block_unload: bool,
    pub block_reload: bool,
    pub teardown: Option<Teardown>,
}

impl ModDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_config_item(mut self, item: ConfigItem) -> Self {
        self.config_items.push(item);
        self
    }

    pub fn block_unload(mut self) -> Self {
        self.block_unload = true;
        self
    }

    pub fn block_reload(mut self) -> Self {
        self.block_reload = true;
        self
    }

    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.teardown = Some(Box::new(teardown));
        self
    }
}

/// Type a config item's value is coerced to when set from chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigKind {
    Boolean,
    Number,
    #[default]
    String,
}

impl ConfigKind {
    pub fn coerce(self, raw: &str) -> Result<Value, String> {
        let raw = raw.trim();
        match self {
            ConfigKind::Boolean => match raw.to_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "off" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", raw)),
            },
            ConfigKind::Number => {
                if let Ok(n) = raw.parse::<i64>() {
                    return Ok(Value::from(n));
                }
                raw.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{}' is not a number", raw))
            }
            ConfigKind::String => Ok(Value::String(raw.to_string())),
        }
    }
}

/// A config key a mod allows editing from chat
#[derive(Clone)]
pub struct ConfigItem {
    pub key: String,
    pub kind: ConfigKind,
    pub description: Option<String>,
    pub validator: Option<ConfigValidator>,
}

impl ConfigItem {
    pub fn new(key: impl Into<String>, kind: ConfigKind) -> Self {
        Self {
            key: key.into(),
            kind,
            description: None,
            validator: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Coerce and validate a raw value from chat
    pub fn parse(&self, raw: &str) -> Result<Value, String> {
        let value = self.kind.coerce(raw)?;
        if let Some(validator) = &self.validator {
            match validator(&value) {
                Ok(true) => {}
                Ok(false) => return Err(format!("Invalid value for {}", self.key)),
                Err(reason) => return Err(reason),
            }
        }
        Ok(value)
    }
}

impl fmt::Debug for ConfigItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigItem")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

/// A loaded mod, owned by the mod manager
pub struct ModRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub commands: HashMap<String, Arc<Command>>,
    pub config_items: Vec<ConfigItem>,
    pub config: Arc<ModConfig>,
    pub block_unload: bool,
    pub block_reload: bool,
    teardown: Mutex<Option<Teardown>>,
    module: Arc<ModModule>,
}

impl ModRecord {
    pub(crate) fn new(
        id: impl Into<String>,
        module: Arc<ModModule>,
        config: Arc<ModConfig>,
    ) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: String::new(),
            author: String::new(),
            description: String::new(),
            commands: HashMap::new(),
            config_items: Vec::new(),
            config,
            block_unload: false,
            block_reload: false,
            teardown: Mutex::new(None),
            module,
        }
    }

    pub(crate) fn set_teardown(&mut self, teardown: Option<Teardown>) {
        *self.teardown.get_mut().unwrap_or_else(PoisonError::into_inner) = teardown;
    }

    /// Runs the teardown routine, at most once
    pub(crate) fn teardown(&self) {
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn config_item(&self, key: &str) -> Option<&ConfigItem> {
        self.config_items.iter().find(|i| i.key == key)
    }

    pub fn module(&self) -> &Arc<ModModule> {
        &self.module
    }
}

impl fmt::Debug for ModRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.commands.keys().collect();
        commands.sort();
        f.debug_struct("ModRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("commands", &commands)
            .field("block_unload", &self.block_unload)
            .field("block_reload", &self.block_reload)
            .finish()
    }
}
