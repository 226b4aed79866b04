//! `config` - view and change mod config items from chat

use regex_lite::Regex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{error, info};

use crate::application::errors::BotError;
use crate::application::services::ModManager;
use crate::domain::entities::{Command, Invocation, ModContext, ModDefinition, ModModule, ModRecord};

pub const MOD_ID: &str = "config";

const SUPERUSER: &str = "S";

pub fn module() -> ModModule {
    ModModule::new(MOD_ID, instantiate)
}

fn instantiate(ctx: ModContext) -> Result<ModDefinition, String> {
    let set = {
        let manager = ctx.manager.clone();
        Command::new("setconfig", move |inv| set_config(inv, manager.clone()))
            .with_description("Change a mod config item")
            .with_usage("setconfig <mod>.<key> <value>")
            .with_pattern(Regex::new(r"^(\S+)\.(\S+)\s+(.+)$").map_err(|e| e.to_string())?)
            .with_permission(SUPERUSER)
    };
    let view = {
        let manager = ctx.manager.clone();
        Command::new("viewconfig", move |inv| view_config(inv, manager.clone()))
            .with_description("Show a mod config item")
            .with_usage("viewconfig <mod>.<key>")
            .with_pattern(Regex::new(r"^(\S+)\.(\S+)$").map_err(|e| e.to_string())?)
            .with_permission(SUPERUSER)
    };

    Ok(ModDefinition::new()
        .with_name("Config")
        .with_description("Edit the config items mods expose")
        .with_command(set)
        .with_command(view))
}

/// Loaded mod that declares `key`, or the reason to give the user
fn find_item(manager: &Weak<ModManager>, mod_id: &str, key: &str) -> Result<Arc<ModRecord>, String> {
    let manager = manager
        .upgrade()
        .ok_or_else(|| "The bot is shutting down".to_string())?;
    let record = manager
        .get_mod(mod_id)
        .ok_or_else(|| format!("Mod '{}' is not loaded", mod_id))?;
    if record.config_item(key).is_none() {
        return Err(format!("{} has no config item {}", mod_id, key));
    }
    Ok(record)
}

async fn set_config(inv: Invocation, manager: Weak<ModManager>) -> Result<(), BotError> {
    let (mod_id, key, raw) = (inv.arg(0), inv.arg(1), inv.arg(2));
    let record = match find_item(&manager, mod_id, key) {
        Ok(record) => record,
        Err(reason) => return inv.reply(&reason).await,
    };

    let parsed = match record.config_item(key) {
        Some(item) => item.parse(raw),
        None => return Ok(()),
    };
    let value = match parsed {
        Ok(value) => value,
        Err(reason) => return inv.reply(&reason).await,
    };

    record.config.set(key, value.clone());
    if let Err(e) = record.config.save().await {
        error!("Failed to save config for {}: {}", mod_id, e);
        return inv.reply(&format!("{}.{} changed but could not be saved", mod_id, key)).await;
    }

    info!("{} set {}.{} = {}", inv.nick, mod_id, key, value);
    inv.reply(&format!("{}.{} = {}", mod_id, key, display(&value))).await
}

async fn view_config(inv: Invocation, manager: Weak<ModManager>) -> Result<(), BotError> {
    let (mod_id, key) = (inv.arg(0), inv.arg(1));
    let record = match find_item(&manager, mod_id, key) {
        Ok(record) => record,
        Err(reason) => return inv.reply(&reason).await,
    };

    let text = match record.config.get(key) {
        Some(value) => format!("{}.{} = {}", mod_id, key, display(&value)),
        None => format!("{}.{} is not set", mod_id, key),
    };
    inv.reply(&text).await
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
