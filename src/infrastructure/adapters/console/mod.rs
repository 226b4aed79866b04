//! Console adapter for development/testing
//!
//! Each stdin line becomes a message from the console user. A line that
//! starts with a channel name (`#swamp !roll`) is delivered to that channel,
//! where the console user holds founder status; anything else is a direct
//! message to the bot.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::application::errors::BotError;
use crate::domain::entities::{is_channel_name, ChatMessage};
use crate::domain::traits::{Transport, TransportEvent};

/// Default nick the console user appears as
pub const CONSOLE_NICK: &str = "console";

/// Console bot adapter for local development
pub struct ConsoleAdapter {
    nick: String,
    console_nick: String,
    /// Channels the console user has spoken in, lowercased
    channels: RwLock<HashSet<String>>,
    events: broadcast::Sender<TransportEvent>,
}

impl ConsoleAdapter {
    pub fn new(nick: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            nick: nick.into(),
            console_nick: CONSOLE_NICK.to_string(),
            channels: RwLock::new(HashSet::new()),
            events,
        }
    }

    pub fn with_console_nick(mut self, nick: impl Into<String>) -> Self {
        self.console_nick = nick.into();
        self
    }

    /// Turn a console line into a message event
    pub fn parse_line(&self, line: &str) -> Option<ChatMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (target, text) = match line.split_once(char::is_whitespace) {
            Some((channel, rest)) if is_channel_name(channel) => (channel.to_string(), rest.trim()),
            _ => (self.nick.clone(), line),
        };
        if is_channel_name(&target) {
            self.channels
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(target.to_lowercase());
        }
        Some(ChatMessage::new(self.console_nick.clone(), target, text))
    }

    async fn read_stdin(self: std::sync::Arc<Self>) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(message) = self.parse_line(&line) {
                        let _ = self.events.send(TransportEvent::Message(message));
                    }
                }
                Ok(None) => {
                    tracing::info!("Console input closed");
                    let _ = self.events.send(TransportEvent::Quit {
                        nick: self.console_nick.clone(),
                    });
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
    }

    /// Start reading stdin in the background
    pub fn spawn_reader(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.clone().read_stdin())
    }
}

#[async_trait]
impl Transport for ConsoleAdapter {
    async fn connect(&self) -> Result<(), BotError> {
        tracing::info!("Starting console transport (dev mode) as {}", self.nick);
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<(), BotError> {
        println!("* {} joined {}", self.nick, channel);
        Ok(())
    }

    async fn part(&self, channel: &str) -> Result<(), BotError> {
        println!("* {} left {}", self.nick, channel);
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel.to_lowercase());
        Ok(())
    }

    async fn say(&self, target: &str, text: &str) -> Result<(), BotError> {
        println!("[{}] <{}> {}", target, self.nick, text);
        Ok(())
    }

    async fn act(&self, target: &str, text: &str) -> Result<(), BotError> {
        println!("[{}] * {} {}", target, self.nick, text);
        Ok(())
    }

    async fn notice(&self, target: &str, text: &str) -> Result<(), BotError> {
        println!("-{}:{}- {}", self.nick, target, text);
        Ok(())
    }

    fn nick(&self) -> String {
        self.nick.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn user_prefix(&self, channel: &str, nick: &str) -> Option<String> {
        let joined = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&channel.to_lowercase());
        match (joined, nick.eq_ignore_ascii_case(&self.console_nick)) {
            (true, true) => Some("~".to_string()),
            (true, false) if nick.eq_ignore_ascii_case(&self.nick) => Some(String::new()),
            _ => None,
        }
    }

    fn shares_channel(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.console_nick)
            && !self
                .channels
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }
}
