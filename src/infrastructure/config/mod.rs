//! Configuration management

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::application::errors::ConfigError;
use crate::domain::entities::UserAccount;

/// Bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub mods: ModsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    /// Static per-mod config sections, keyed by mod id
    #[serde(default)]
    pub mod_config: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub ribbit: RibbitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub nick: String,
    /// Character that starts a command
    pub trigger: char,
    /// Selects the snapshot directory under `mods.config-dir`
    pub environment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Console,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransportConfig {
    #[serde(default)]
    pub adapter: TransportKind,
    pub server: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    /// Nick the console user appears as
    #[serde(default = "default_console_nick")]
    pub console_nick: String,
}

fn default_console_nick() -> String {
    crate::infrastructure::adapters::console::CONSOLE_NICK.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModsConfig {
    pub core_dir: PathBuf,
    pub user_dir: PathBuf,
    pub config_dir: PathBuf,
    /// User mods loaded at startup, after the core mods
    #[serde(default)]
    pub autoload: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    #[default]
    Nickserv,
    Trust,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Nickserv => "nickserv",
            AuthMethod::Trust => "trust",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Default method for accounts that do not name one
    pub method: AuthMethod,
    /// Nick of the services bot
    pub service: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PermissionsConfig {
    /// Initial global accounts, keyed by nick
    #[serde(default)]
    pub accounts: BTreeMap<String, UserAccount>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RibbitConfig {
    pub packages_dir: PathBuf,
    /// Package manager executable
    pub command: String,
    pub package_prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nick: "lilypad".to_string(),
            trigger: '!',
            environment: "development".to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            adapter: TransportKind::Console,
            server: None,
            channels: vec!["#lilypad".to_string()],
            console_nick: default_console_nick(),
        }
    }
}

impl Default for ModsConfig {
    fn default() -> Self {
        Self {
            core_dir: PathBuf::from("./mods/core"),
            user_dir: PathBuf::from("./mods/user"),
            config_dir: PathBuf::from("./config"),
            autoload: Vec::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: AuthMethod::Nickserv,
            service: "NickServ".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for RibbitConfig {
    fn default() -> Self {
        Self {
            packages_dir: PathBuf::from("./packages"),
            command: "npm".to_string(),
            package_prefix: crate::infrastructure::ribbit::DEFAULT_PACKAGE_PREFIX.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig::default(),
            transport: TransportConfig::default(),
            mods: ModsConfig::default(),
            auth: AuthConfig::default(),
            permissions: PermissionsConfig::default(),
            mod_config: BTreeMap::new(),
            ribbit: RibbitConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Overrides from `BOT_NICK` and `BOT_TRIGGER`
    pub fn apply_env(&mut self) {
        if let Ok(nick) = std::env::var("BOT_NICK") {
            if !nick.trim().is_empty() {
                self.bot.nick = nick.trim().to_string();
            }
        }

        if let Ok(trigger) = std::env::var("BOT_TRIGGER") {
            match single_char(&trigger) {
                Some(c) => self.bot.trigger = c,
                None => tracing::warn!("Ignoring BOT_TRIGGER={:?}: expected one character", trigger),
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.nick.trim().is_empty() {
            return Err(ConfigError::InvalidValue("bot.nick must not be empty".to_string()));
        }
        if self.bot.trigger.is_whitespace() {
            return Err(ConfigError::InvalidValue(
                "bot.trigger must not be whitespace".to_string(),
            ));
        }
        if self.bot.environment.is_empty() || self.bot.environment.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue(format!(
                "bot.environment '{}' is not a valid directory name",
                self.bot.environment
            )));
        }
        Ok(())
    }

    /// Static mod config sections as JSON, for the config store
    pub fn static_sections(&self) -> Result<HashMap<String, Value>, ConfigError> {
        self.mod_config
            .iter()
            .map(|(id, section)| {
                serde_json::to_value(section)
                    .map(|value| (id.clone(), value))
                    .map_err(|e| ConfigError::Parse(format!("mod-config.{}: {}", id, e)))
            })
            .collect()
    }

    /// Initial accounts in the shape the account store expects
    pub fn account_defaults(&self) -> Value {
        let users: serde_json::Map<String, Value> = self
            .permissions
            .accounts
            .iter()
            .filter_map(|(nick, account)| {
                serde_json::to_value(account)
                    .ok()
                    .map(|v| (nick.to_lowercase(), v))
            })
            .collect();
        serde_json::json!({ "users": users })
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }

    /// Write the default configuration to `path`, refusing to overwrite
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::InvalidValue(format!(
                "{} already exists",
                path.display()
            )));
        }
        let yaml = Config::default().to_yaml()?;
        std::fs::write(path, yaml)
            .map_err(|e| ConfigError::Parse(format!("Failed to write config: {}", e)))
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}
