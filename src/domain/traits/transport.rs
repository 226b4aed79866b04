use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::errors::BotError;
use crate::domain::entities::ChatMessage;

/// Events reported by the chat transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(ChatMessage),
    Notice {
        from: String,
        target: String,
        text: String,
    },
    NickChange {
        old: String,
        new: String,
    },
    Part {
        channel: String,
        nick: String,
    },
    Quit {
        nick: String,
    },
}

/// Transport trait - abstraction for the chat network connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and begin reporting events
    async fn connect(&self) -> Result<(), BotError>;

    async fn join(&self, channel: &str) -> Result<(), BotError>;

    async fn part(&self, channel: &str) -> Result<(), BotError>;

    /// Send a message to a channel or nick
    async fn say(&self, target: &str, text: &str) -> Result<(), BotError>;

    /// Send an action (`/me`) to a channel or nick
    async fn act(&self, target: &str, text: &str) -> Result<(), BotError>;

    async fn notice(&self, target: &str, text: &str) -> Result<(), BotError>;

    /// The bot's current nick
    fn nick(&self) -> String;

    /// Subscribe to incoming events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Membership prefixes of `nick` in `channel` (e.g. `"@+"`), or `None`
    /// if the nick is not in that channel
    fn user_prefix(&self, channel: &str, nick: &str) -> Option<String>;

    /// True if `nick` is in at least one channel the bot is in
    fn shares_channel(&self, nick: &str) -> bool;
}
