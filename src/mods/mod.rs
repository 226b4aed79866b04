//! Core mods - bundled with the bot and registered in the catalog at startup
//!
//! Each has a matching directory under the core mod directory, which is what
//! makes the loader list it.

pub mod config;
pub mod help;
pub mod modctl;
pub mod permissions;
pub mod ribbit;

use std::sync::Arc;

use crate::application::errors::ModError;
use crate::application::services::PermissionService;
use crate::infrastructure::plugins::ModCatalog;
use crate::infrastructure::ribbit::Ribbit;

pub const CORE_MOD_IDS: [&str; 5] = [
    help::MOD_ID,
    modctl::MOD_ID,
    config::MOD_ID,
    permissions::MOD_ID,
    ribbit::MOD_ID,
];

/// Put the code of every core mod into the catalog
pub fn register_core_mods(
    catalog: &ModCatalog,
    engine: Arc<PermissionService>,
    installer: Arc<Ribbit>,
) -> Result<(), ModError> {
    catalog.register(help::module())?;
    catalog.register(modctl::module())?;
    catalog.register(config::module())?;
    catalog.register(permissions::module(engine))?;
    catalog.register(ribbit::module(installer))?;
    tracing::debug!("Registered {} core mods", CORE_MOD_IDS.len());
    Ok(())
}
