//! `modctl` - load, unload and reload mods from chat

use regex_lite::Regex;
use std::sync::{Arc, Weak};
use tracing::error;

use crate::application::errors::{BotError, ModError};
use crate::application::services::ModManager;
use crate::domain::entities::{Command, Invocation, ModContext, ModDefinition, ModModule};

pub const MOD_ID: &str = "modctl";

const OWNER: &str = "O";

pub fn module() -> ModModule {
    ModModule::new(MOD_ID, instantiate)
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Load,
    Unload,
    Reload,
}

fn instantiate(ctx: ModContext) -> Result<ModDefinition, String> {
    let id_pattern = Regex::new(r"^(\S+)$").map_err(|e| e.to_string())?;
    let manager = ctx.manager.clone();

    let lifecycle = |name: &str, action: Action, desc: &str| {
        let manager = manager.clone();
        Command::new(name, move |inv| control(inv, manager.clone(), action))
            .with_description(desc)
            .with_usage(format!("{} <mod>", name))
            .with_pattern(id_pattern.clone())
            .with_permission(OWNER)
    };

    let listing = {
        let manager = manager.clone();
        Command::new("mods", move |inv| list(inv, manager.clone()))
            .with_description("List loaded and available mods")
            .with_usage("mods")
            .with_permission(OWNER)
    };

    Ok(ModDefinition::new()
        .with_name("Mod control")
        .with_description("Load, unload and reload mods")
        .with_command(lifecycle("loadmod", Action::Load, "Load a mod"))
        .with_command(lifecycle("unloadmod", Action::Unload, "Unload a mod"))
        .with_command(lifecycle("reloadmod", Action::Reload, "Reload a mod from disk"))
        .with_command(listing)
        .block_unload()
        .block_reload())
}

fn upgrade(manager: &Weak<ModManager>) -> Result<Arc<ModManager>, BotError> {
    manager
        .upgrade()
        .ok_or_else(|| BotError::Internal("mod manager is gone".to_string()))
}

async fn control(inv: Invocation, manager: Weak<ModManager>, action: Action) -> Result<(), BotError> {
    let manager = upgrade(&manager)?;
    let mod_id = inv.arg(0).to_string();

    let result = match action {
        Action::Load => manager.load_mod(&mod_id).await.map(|record| {
            format!("Loaded {} {} ({} commands)", record.name, record.version, record.commands.len())
        }),
        Action::Unload => manager
            .unload_mod(&mod_id, false)
            .map(|()| format!("Unloaded {}", mod_id)),
        Action::Reload => manager
            .reload_mod(&mod_id)
            .await
            .map(|record| format!("Reloaded {} {}", record.name, record.version)),
    };

    match result {
        Ok(text) => inv.reply(&text).await,
        Err(e) => inv.reply(&describe(&mod_id, &e)).await,
    }
}

/// User-facing text for a lifecycle failure. Internal detail stays in the log.
fn describe(mod_id: &str, e: &ModError) -> String {
    if e.is_user_facing() {
        return e.to_string();
    }
    error!("Mod operation on {} failed: {}", mod_id, e);
    match e {
        ModError::Load { .. } => format!("Could not load {}; check the name with mods", mod_id),
        ModError::MalformedMod { .. } => format!("{} is broken and was not loaded", mod_id),
        _ => format!("Something went wrong with {}", mod_id),
    }
}

async fn list(inv: Invocation, manager: Weak<ModManager>) -> Result<(), BotError> {
    let manager = upgrade(&manager)?;

    let loaded: Vec<String> = manager
        .list_mods()
        .iter()
        .map(|record| format!("{} {}", record.id, record.version))
        .collect();
    let available: Vec<String> = manager
        .available_mod_ids()
        .into_iter()
        .filter(|id| !manager.is_loaded(id))
        .collect();

    inv.reply(&format!("Loaded: {}", loaded.join(", "))).await?;
    if !available.is_empty() {
        inv.reply(&format!("Available: {}", available.join(", "))).await?;
    }
    Ok(())
}
