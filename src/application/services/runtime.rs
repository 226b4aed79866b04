//! Bot runtime - fans transport events out to the runner, the auth
//! providers and the permission cache

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use super::{ModManager, PermissionService};
use crate::application::errors::{BotError, ModError};
use crate::application::messaging::CommandRunner;
use crate::domain::traits::{Transport, TransportEvent};

pub struct BotRuntime {
    transport: Arc<dyn Transport>,
    manager: Arc<ModManager>,
    permissions: Arc<PermissionService>,
    runner: Arc<CommandRunner>,
}

impl BotRuntime {
    pub fn new(
        transport: Arc<dyn Transport>,
        manager: Arc<ModManager>,
        permissions: Arc<PermissionService>,
        trigger: char,
    ) -> Self {
        let runner = Arc::new(CommandRunner::new(
            trigger,
            manager.clone(),
            permissions.clone(),
            transport.clone(),
        ));
        Self {
            transport,
            manager,
            permissions,
            runner,
        }
    }

    pub fn manager(&self) -> &Arc<ModManager> {
        &self.manager
    }

    pub fn runner(&self) -> &Arc<CommandRunner> {
        &self.runner
    }

    /// Connect, join channels and load mods: every core mod, then the
    /// requested user mods. Failed loads are logged and skipped.
    pub async fn start(&self, channels: &[String], autoload: &[String]) -> Result<(), BotError> {
        self.transport.connect().await?;
        for channel in channels {
            self.transport.join(channel).await?;
        }

        let core = self.manager.loader().list_core_mod_ids();
        for (stage, ids) in [("core", core), ("user", autoload.to_vec())] {
            match self.manager.load_mods(ids).await {
                Ok(loaded) => info!("Loaded {} {} mods", loaded.len(), stage),
                Err(ModError::Batch(failures)) => {
                    for (id, e) in failures {
                        error!("Failed to load {} mod {}: {}", stage, id, e);
                    }
                }
                Err(e) => error!("Failed to load {} mods: {}", stage, e),
            }
        }
        Ok(())
    }

    /// Route one transport event
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => {
                // Permission checks may wait on a services reply that
                // arrives through this same loop.
                let runner = self.runner.clone();
                tokio::spawn(async move {
                    if let Err(e) = runner.handle(&message).await {
                        warn!("Failed to handle message from {}: {}", message.nick, e);
                    }
                });
            }
            TransportEvent::Notice { from, text, .. } => {
                for provider in self.permissions.providers() {
                    match provider.handle_notice(&from, &text).await {
                        Ok(true) => debug!("Notice from {} consumed by {}", from, provider.name()),
                        Ok(false) => {}
                        Err(e) => warn!("Auth provider {} failed on notice: {}", provider.name(), e),
                    }
                }
            }
            TransportEvent::NickChange { old, new } => self.permissions.on_nick_change(&old, &new),
            TransportEvent::Part { channel, nick } => self.permissions.on_part(&channel, &nick),
            TransportEvent::Quit { nick } => self.permissions.on_quit(&nick),
        }
    }

    /// Pump transport events until the transport closes or ctrl-c
    pub async fn run(&self) -> Result<(), BotError> {
        let mut events = self.transport.subscribe();
        info!("Starting event loop as {}", self.transport.nick());

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event loop lagging, dropped {} events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("Transport closed");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Unload every mod, running teardowns
    pub fn shutdown(&self) {
        for record in self.manager.list_mods() {
            if let Err(e) = self.manager.unload_mod(&record.id, true) {
                warn!("Failed to unload {} on shutdown: {}", record.id, e);
            }
        }
    }
}
