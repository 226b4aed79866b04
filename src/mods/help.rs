//! `help` - lists commands and shows usage

use regex_lite::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::application::events::{EventFilter, EventKind, ModEvent};
use crate::application::services::ModManager;
use crate::domain::entities::{Command, Invocation, ModContext, ModDefinition, ModModule};

pub const MOD_ID: &str = "help";

/// Visible command ids, mapped to their owning mod
type Visible = Arc<RwLock<BTreeMap<String, String>>>;

pub fn module() -> ModModule {
    ModModule::new(MOD_ID, instantiate)
}

fn instantiate(ctx: ModContext) -> Result<ModDefinition, String> {
    let manager = ctx
        .manager()
        .ok_or_else(|| "mod manager is gone".to_string())?;
    let weak = Arc::downgrade(&manager);

    let visible: Visible = Arc::new(RwLock::new(
        manager
            .list_commands()
            .into_iter()
            .filter(|c| !c.hidden)
            .map(|c| (c.id.clone(), c.mod_id.clone()))
            .collect(),
    ));

    let events = manager.events().clone();
    let on_loaded = {
        let visible = visible.clone();
        let weak = weak.clone();
        events.subscribe(EventFilter::all(EventKind::CommandLoaded), move |event| {
            if let ModEvent::CommandLoaded { command_id, mod_id } = event {
                let hidden = weak
                    .upgrade()
                    .and_then(|m| m.get_command(command_id))
                    .map_or(false, |c| c.hidden);
                if !hidden {
                    visible
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(command_id.clone(), mod_id.clone());
                }
            }
        })
    };
    let on_unloaded = {
        let visible = visible.clone();
        events.subscribe(EventFilter::all(EventKind::ModUnloaded), move |event| {
            if let ModEvent::ModUnloaded { mod_id } = event {
                visible
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|_, owner| owner != mod_id);
            }
        })
    };

    let help = {
        let visible = visible.clone();
        Command::new("help", move |inv| help(inv, visible.clone(), weak.clone()))
            .with_description("List commands, or show how to use one")
            .with_usage("help [command]")
            .with_pattern(Regex::new(r"^(\S+)?\s*$").map_err(|e| e.to_string())?)
    };

    Ok(ModDefinition::new()
        .with_name("Help")
        .with_description("Command listing and usage")
        .with_command(help)
        .with_teardown(move || {
            events.unsubscribe(on_loaded);
            events.unsubscribe(on_unloaded);
        }))
}

async fn help(
    inv: Invocation,
    visible: Visible,
    manager: Weak<ModManager>,
) -> Result<(), crate::application::errors::BotError> {
    let wanted = inv.arg(0).to_lowercase();

    if wanted.is_empty() {
        let ids: Vec<String> = visible
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        return inv.reply(&format!("Commands: {}", ids.join(", "))).await;
    }

    let listed = visible
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&wanted);
    let command = manager
        .upgrade()
        .and_then(|m| m.get_command(&wanted))
        .filter(|_| listed);

    let text = match command {
        Some(command) => {
            let mut text = format!("{}: {}", command.id, command.usage.as_deref().unwrap_or(&command.id));
            if let Some(desc) = &command.description {
                text.push_str(" - ");
                text.push_str(desc);
            }
            if let Some(rank) = command.permission.as_deref().filter(|r| !r.is_empty()) {
                text.push_str(&format!(" (rank {})", rank));
            }
            text
        }
        None => format!("No such command: {}", wanted),
    };
    inv.reply(&text).await
}
