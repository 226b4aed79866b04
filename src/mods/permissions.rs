//! `permissions` - manage global accounts from chat
//!
//! The engine re-checks the caller on every change, so these commands carry
//! no rank gate of their own.

use regex_lite::Regex;
use std::sync::Arc;
use tracing::error;

use crate::application::errors::{BotError, PermissionError};
use crate::application::services::PermissionService;
use crate::domain::entities::{Command, Invocation, ModContext, ModDefinition, ModModule};

pub const MOD_ID: &str = "permissions";

pub fn module(permissions: Arc<PermissionService>) -> ModModule {
    ModModule::new(MOD_ID, move |ctx| instantiate(ctx, permissions.clone()))
}

fn instantiate(_ctx: ModContext, permissions: Arc<PermissionService>) -> Result<ModDefinition, String> {
    let set = {
        let permissions = permissions.clone();
        Command::new("setrank", move |inv| set_rank(inv, permissions.clone()))
            .with_description("Give a nick a global rank")
            .with_usage("setrank <nick> <rank> [auth]")
            .with_pattern(Regex::new(r"^(\S+)\s+(\S+)(?:\s+(\S+))?$").map_err(|e| e.to_string())?)
    };
    let delete = {
        let permissions = permissions.clone();
        Command::new("delrank", move |inv| del_rank(inv, permissions.clone()))
            .with_description("Remove a nick's global rank")
            .with_usage("delrank <nick>")
            .with_pattern(Regex::new(r"^(\S+)$").map_err(|e| e.to_string())?)
    };
    let show = Command::new("rank", move |inv| show_rank(inv, permissions.clone()))
        .with_description("Show the effective rank of a nick")
        .with_usage("rank [nick]")
        .with_pattern(Regex::new(r"^(\S+)?\s*$").map_err(|e| e.to_string())?);

    Ok(ModDefinition::new()
        .with_name("Permissions")
        .with_description("Global rank management")
        .with_command(set)
        .with_command(delete)
        .with_command(show))
}

async fn relay(inv: &Invocation, e: PermissionError) -> Result<(), BotError> {
    if e.is_user_facing() {
        inv.reply(&e.to_string()).await
    } else {
        error!("{} failed for {}: {}", inv.command.id, inv.nick, e);
        inv.reply("Could not update accounts right now").await
    }
}

async fn set_rank(inv: Invocation, permissions: Arc<PermissionService>) -> Result<(), BotError> {
    let auth = Some(inv.arg(2)).filter(|a| !a.is_empty());
    match permissions
        .set_account(&inv.nick, inv.arg(0), inv.arg(1), auth)
        .await
    {
        Ok(account) => {
            inv.reply(&format!("{} now has rank {}", inv.arg(0), account.rank))
                .await
        }
        Err(e) => relay(&inv, e).await,
    }
}

async fn del_rank(inv: Invocation, permissions: Arc<PermissionService>) -> Result<(), BotError> {
    match permissions.delete_account(&inv.nick, inv.arg(0)).await {
        Ok(()) => inv.reply(&format!("{} no longer has a global rank", inv.arg(0))).await,
        Err(e) => relay(&inv, e).await,
    }
}

async fn show_rank(inv: Invocation, permissions: Arc<PermissionService>) -> Result<(), BotError> {
    let nick = match inv.arg(0) {
        "" => inv.nick.clone(),
        nick => nick.to_string(),
    };
    let channel = inv.in_channel.then_some(inv.origin.as_str());

    match permissions.get_effective_rank(&nick, channel).await {
        Ok(Some(rank)) if rank.symbol().is_empty() => {
            inv.reply(&format!("{} has no rank", nick)).await
        }
        Ok(Some(rank)) => inv.reply(&format!("{} has rank {}", nick, rank)).await,
        Ok(None) => inv.reply(&format!("{} has no rank", nick)).await,
        Err(e) => relay(&inv, e).await,
    }
}
