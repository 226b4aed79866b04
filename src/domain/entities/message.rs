use chrono::{DateTime, Utc};

/// Channel name prefixes recognised by the dispatcher.
pub const CHANNEL_PREFIXES: [char; 4] = ['#', '&', '!', '+'];

/// Returns true if `name` looks like a channel rather than a nick.
pub fn is_channel_name(name: &str) -> bool {
    name.starts_with(CHANNEL_PREFIXES)
}

/// An incoming chat message as reported by the transport
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    /// Nick of the sender
    pub nick: String,
    /// Channel the message was sent to, or the bot's own nick for direct messages
    pub target: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(nick: impl Into<String>, target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            nick: nick.into(),
            target: target.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// True if the message arrived in a multi-user channel
    pub fn in_channel(&self) -> bool {
        is_channel_name(&self.target)
    }

    /// Where replies to this message should go
    pub fn reply_to(&self) -> &str {
        if self.in_channel() {
            &self.target
        } else {
            &self.nick
        }
    }
}
