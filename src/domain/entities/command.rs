use regex_lite::Regex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::application::errors::BotError;
use crate::domain::traits::Transport;

/// Future returned by a command handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), BotError>> + Send>>;

/// Command handler function type
pub type CommandHandler = Arc<dyn Fn(Invocation) -> HandlerFuture + Send + Sync>;

/// How the dispatcher extracts a target from the arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandTarget {
    #[default]
    None,
    /// First argument is a channel; defaults to the origin channel
    Channel,
    /// First argument is taken verbatim as a nick
    Nick,
}

/// Represents a bot command exposed by a mod
#[derive(Clone)]
pub struct Command {
    /// Lowercased, globally unique id
    pub id: String,
    /// Owning mod, filled in by the mod manager at registration
    pub mod_id: String,
    pub description: Option<String>,
    pub usage: Option<String>,
    pub pattern: Option<Regex>,
    /// Minimum rank symbol; validated when the command is invoked
    pub permission: Option<String>,
    pub target: CommandTarget,
    pub hidden: bool,
    pub handler: CommandHandler,
}

impl Command {
    pub fn new<F, Fut>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BotError>> + Send + 'static,
    {
        Self {
            id: id.into().to_lowercase(),
            mod_id: String::new(),
            description: None,
            usage: None,
            pattern: None,
            permission: None,
            target: CommandTarget::None,
            hidden: false,
            handler: Arc::new(move |inv| Box::pin(handler(inv))),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_permission(mut self, rank: impl Into<String>) -> Self {
        self.permission = Some(rank.into());
        self
    }

    pub fn with_target(mut self, target: CommandTarget) -> Self {
        self.target = target;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn matches(&self, input: &str) -> bool {
        self.id == input.to_lowercase()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("mod_id", &self.mod_id)
            .field("pattern", &self.pattern.as_ref().map(|p| p.as_str()))
            .field("permission", &self.permission)
            .field("target", &self.target)
            .field("hidden", &self.hidden)
            .finish()
    }
}

/// A parsed, authorized command call handed to the handler
#[derive(Clone)]
pub struct Invocation {
    /// Nick of the invoking user
    pub nick: String,
    /// Channel or nick the message arrived on
    pub origin: String,
    pub in_channel: bool,
    pub target: Option<String>,
    pub args: Vec<String>,
    pub command: Arc<Command>,
    pub transport: Arc<dyn Transport>,
}

impl Invocation {
    /// Argument by position, empty if the pattern group did not participate
    pub fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    /// Reply in the channel the command came from, or privately to the invoker
    pub async fn reply(&self, text: &str) -> Result<(), BotError> {
        if self.in_channel {
            self.transport.say(&self.origin, text).await
        } else {
            self.transport.say(&self.nick, text).await
        }
    }

    /// Private notice to the invoker
    pub async fn notice(&self, text: &str) -> Result<(), BotError> {
        self.transport.notice(&self.nick, text).await
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("nick", &self.nick)
            .field("origin", &self.origin)
            .field("target", &self.target)
            .field("args", &self.args)
            .field("command", &self.command.id)
            .finish()
    }
}
