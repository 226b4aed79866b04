//! lilypad-bot - a chat bot built out of hot-swappable mods
//!
//! Mods are loaded, unloaded and reloaded at runtime; their commands are
//! dispatched through a rank-based permission check.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod mods;

use std::sync::Arc;
use std::time::Duration;

use application::errors::BotError;
use application::services::{BotRuntime, ModManager, PermissionService};
use domain::traits::{AuthProvider, Transport};
use infrastructure::auth::{NickServAuth, TrustAuth};
use infrastructure::config::{AuthMethod, Config};
use infrastructure::plugins::{ModCatalog, ModLoader};
use infrastructure::ribbit::{NpmPackageManager, Ribbit};
use infrastructure::storage::ConfigStore;

/// Config id under which global accounts are stored
pub const ACCOUNTS_CONFIG_ID: &str = "accounts";

/// Installer described by the config
pub fn ribbit_from_config(config: &Config) -> Ribbit {
    Ribbit::new(
        &config.ribbit.packages_dir,
        &config.mods.user_dir,
        Arc::new(NpmPackageManager::new(&config.ribbit.command)),
    )
    .with_package_prefix(&config.ribbit.package_prefix)
}

/// Wire every component for `transport` and register the core mods. No mods
/// are loaded yet; see `BotRuntime::start`.
pub async fn assemble(config: &Config, transport: Arc<dyn Transport>) -> Result<BotRuntime, BotError> {
    let store = Arc::new(
        ConfigStore::new(&config.mods.config_dir, &config.bot.environment)
            .with_static_sections(config.static_sections()?),
    );

    let nickserv: Arc<dyn AuthProvider> = Arc::new(NickServAuth::new(
        transport.clone(),
        &config.auth.service,
        Duration::from_secs(config.auth.timeout_secs),
    ));
    let trust: Arc<dyn AuthProvider> = Arc::new(TrustAuth);
    let (default_provider, other) = match config.auth.method {
        AuthMethod::Nickserv => (nickserv, trust),
        AuthMethod::Trust => (trust, nickserv),
    };

    let accounts = store
        .assemble(ACCOUNTS_CONFIG_ID, &config.account_defaults())
        .await?;
    let permissions = Arc::new(
        PermissionService::new(transport.clone(), accounts, default_provider).with_provider(other),
    );

    let catalog = Arc::new(ModCatalog::new());
    mods::register_core_mods(
        &catalog,
        permissions.clone(),
        Arc::new(ribbit_from_config(config)),
    )?;
    let loader = Arc::new(ModLoader::new(
        &config.mods.core_dir,
        &config.mods.user_dir,
        catalog,
    ));

    let manager = ModManager::new(loader, store, transport.clone());
    tracing::info!(
        "Assembled {} (framework {}, default auth {})",
        config.bot.nick,
        manager.framework_version(),
        config.auth.method.as_str()
    );
    Ok(BotRuntime::new(transport, manager, permissions, config.bot.trigger))
}
