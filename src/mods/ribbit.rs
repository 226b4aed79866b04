//! `ribbit` - search, install and uninstall user mods from chat

use regex_lite::Regex;
use std::sync::{Arc, Weak};
use tracing::error;

use crate::application::errors::{BotError, InstallError};
use crate::application::services::ModManager;
use crate::domain::entities::{Command, Invocation, ModContext, ModDefinition, ModModule};
use crate::infrastructure::ribbit::Ribbit;

pub const MOD_ID: &str = "ribbit";

/// Search results shown in chat
const MAX_RESULTS: usize = 10;

pub fn module(ribbit: Arc<Ribbit>) -> ModModule {
    ModModule::new(MOD_ID, move |ctx| instantiate(ctx, ribbit.clone()))
}

fn instantiate(ctx: ModContext, ribbit: Arc<Ribbit>) -> Result<ModDefinition, String> {
    let manager = ctx.manager.clone();
    let command = Command::new("ribbit", move |inv| run(inv, ribbit.clone(), manager.clone()))
        .with_description("Find and install mods")
        .with_usage("ribbit search [term] | ribbit install <mod> | ribbit uninstall <mod>")
        .with_pattern(
            Regex::new(r"^(?:(search)(?:\s+(\S+))?|(install|uninstall)\s+(\S+))\s*$")
                .map_err(|e| e.to_string())?,
        )
        .with_permission("O");

    Ok(ModDefinition::new()
        .with_name("Ribbit")
        .with_description("Mod installer")
        .with_command(command))
}

async fn run(inv: Invocation, ribbit: Arc<Ribbit>, manager: Weak<ModManager>) -> Result<(), BotError> {
    if inv.arg(0) == "search" {
        let term = Some(inv.arg(1)).filter(|t| !t.is_empty());
        return match ribbit.search(term).await {
            Ok(results) if results.is_empty() => inv.reply("No mods found").await,
            Ok(results) => {
                let names: Vec<String> = results
                    .iter()
                    .take(MAX_RESULTS)
                    .filter_map(|p| {
                        let id = ribbit.mod_id_of(&p.name)?;
                        Some(match &p.version {
                            Some(version) => format!("{} ({})", id, version),
                            None => id.to_string(),
                        })
                    })
                    .collect();
                inv.reply(&format!("Found: {}", names.join(", "))).await
            }
            Err(e) => relay(&inv, e).await,
        };
    }

    let mod_id = inv.arg(3).to_string();
    match inv.arg(2) {
        "install" => match ribbit.install(&mod_id).await {
            Ok(_) => {
                inv.reply(&format!("Installed {}. Load it with loadmod {}", mod_id, mod_id))
                    .await
            }
            Err(e) => relay(&inv, e).await,
        },
        _ => {
            // Refusals must leave the mod running
            if let Err(e) = ribbit.check_managed(&mod_id).await {
                return relay(&inv, e).await;
            }
            if let Some(manager) = manager.upgrade() {
                if manager.is_loaded(&mod_id) {
                    if let Err(e) = manager.unload_mod(&mod_id, false) {
                        return inv.reply(&e.to_string()).await;
                    }
                }
            }
            match ribbit.uninstall(&mod_id).await {
                Ok(()) => inv.reply(&format!("Uninstalled {}", mod_id)).await,
                Err(e) => relay(&inv, e).await,
            }
        }
    }
}

async fn relay(inv: &Invocation, e: InstallError) -> Result<(), BotError> {
    if e.is_user_facing() {
        inv.reply(&e.to_string()).await
    } else {
        error!("ribbit failed for {}: {}", inv.nick, e);
        inv.reply("The package manager failed; see the log").await
    }
}
