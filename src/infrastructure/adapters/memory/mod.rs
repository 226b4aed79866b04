//! In-memory transport
//!
//! Records everything the bot sends and lets callers inject events and
//! channel membership by hand. Used by the test suite and for dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::application::errors::BotError;
use crate::domain::entities::ChatMessage;
use crate::domain::traits::{Transport, TransportEvent};

/// Something the bot sent through the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Say { target: String, text: String },
    Act { target: String, text: String },
    Notice { target: String, text: String },
    Join { channel: String },
    Part { channel: String },
}

pub struct MemoryTransport {
    nick: RwLock<String>,
    /// channel -> nick -> prefixes, all keys lowercased
    members: RwLock<HashMap<String, HashMap<String, String>>>,
    sent: Mutex<Vec<Outbound>>,
    events: broadcast::Sender<TransportEvent>,
}

impl MemoryTransport {
    pub fn new(nick: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            nick: RwLock::new(nick.into()),
            members: RwLock::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Put `nick` in `channel` with the given membership prefixes
    pub fn set_member(&self, channel: &str, nick: &str, prefix: &str) {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_lowercase())
            .or_default()
            .insert(nick.to_lowercase(), prefix.to_string());
    }

    pub fn remove_member(&self, channel: &str, nick: &str) {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel_members) = members.get_mut(&channel.to_lowercase()) {
            channel_members.remove(&nick.to_lowercase());
        }
    }

    /// Deliver an event to subscribers, updating membership the way a
    /// network would
    pub fn emit(&self, event: TransportEvent) {
        match &event {
            TransportEvent::NickChange { old, new } => {
                let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
                for channel_members in members.values_mut() {
                    if let Some(prefix) = channel_members.remove(&old.to_lowercase()) {
                        channel_members.insert(new.to_lowercase(), prefix);
                    }
                }
            }
            TransportEvent::Part { channel, nick } => self.remove_member(channel, nick),
            TransportEvent::Quit { nick } => {
                let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
                for channel_members in members.values_mut() {
                    channel_members.remove(&nick.to_lowercase());
                }
            }
            _ => {}
        }
        // No subscribers is not an error here
        let _ = self.events.send(event);
    }

    /// Shorthand for emitting a chat message
    pub fn inject(&self, nick: &str, target: &str, text: &str) {
        self.emit(TransportEvent::Message(ChatMessage::new(nick, target, text)));
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain the sent log
    pub fn take_sent(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(&self, outbound: Outbound) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outbound);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), BotError> {
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<(), BotError> {
        let nick = self.nick();
        self.set_member(channel, &nick, "");
        self.record(Outbound::Join {
            channel: channel.to_string(),
        });
        Ok(())
    }

    async fn part(&self, channel: &str) -> Result<(), BotError> {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel.to_lowercase());
        self.record(Outbound::Part {
            channel: channel.to_string(),
        });
        Ok(())
    }

    async fn say(&self, target: &str, text: &str) -> Result<(), BotError> {
        self.record(Outbound::Say {
            target: target.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn act(&self, target: &str, text: &str) -> Result<(), BotError> {
        self.record(Outbound::Act {
            target: target.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn notice(&self, target: &str, text: &str) -> Result<(), BotError> {
        self.record(Outbound::Notice {
            target: target.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn nick(&self) -> String {
        self.nick.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn user_prefix(&self, channel: &str, nick: &str) -> Option<String> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel.to_lowercase())?
            .get(&nick.to_lowercase())
            .cloned()
    }

    fn shares_channel(&self, nick: &str) -> bool {
        let nick = nick.to_lowercase();
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|channel_members| channel_members.contains_key(&nick))
    }
}
