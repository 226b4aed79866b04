//! Command runner - routes chat messages to mod command handlers
//!
//! A message goes through parse, gate, lookup, target extraction, pattern
//! matching and authorization before its handler is spawned. Target
//! extraction always runs before the pattern sees the arguments.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::parser::{split_first, MessageParser};
use crate::application::errors::{BotError, CommandError};
use crate::application::events::{Execution, ModEvent};
use crate::application::services::{ModManager, PermissionService};
use crate::domain::entities::{is_channel_name, ChatMessage, Command, CommandTarget, Invocation};
use crate::domain::traits::Transport;

/// Dispatches commands from incoming messages
pub struct CommandRunner {
    parser: MessageParser,
    manager: Arc<ModManager>,
    permissions: Arc<PermissionService>,
    transport: Arc<dyn Transport>,
}

impl CommandRunner {
    pub fn new(
        trigger: char,
        manager: Arc<ModManager>,
        permissions: Arc<PermissionService>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            parser: MessageParser::new(trigger),
            manager,
            permissions,
            transport,
        }
    }

    pub fn trigger(&self) -> char {
        self.parser.trigger()
    }

    /// Resolve a message into an authorized invocation. `Ok(None)` means the
    /// message is not a command for this bot.
    pub async fn dispatch(&self, message: &ChatMessage) -> Result<Option<Invocation>, CommandError> {
        let Some(parsed) = self.parser.parse(message) else {
            return Ok(None);
        };
        let Some(command) = self.manager.get_command(&parsed.name) else {
            debug!("Ignoring unknown command: {}", parsed.name);
            return Ok(None);
        };

        let in_channel = message.in_channel();
        let (target, rest) = extract_target(&command, message, &parsed.rest)?;
        let args = match_args(&command, rest, self.trigger())?;

        if let Some(required) = command.permission.as_deref() {
            let channel = match command.target {
                CommandTarget::Channel => target.as_deref(),
                _ => None,
            };
            if !self
                .permissions
                .has_permission(required, &message.nick, channel)
                .await?
            {
                return Err(CommandError::InsufficientPermission {
                    command: command.id.clone(),
                    rank: required.to_string(),
                });
            }
        }

        Ok(Some(Invocation {
            nick: message.nick.clone(),
            origin: message.reply_to().to_string(),
            in_channel,
            target,
            args,
            command,
            transport: self.transport.clone(),
        }))
    }

    /// Announce an invocation and run its handler in the background
    pub fn execute(&self, invocation: Invocation) -> tokio::task::JoinHandle<()> {
        let command = invocation.command.clone();
        debug!(
            "Dispatching {} (mod {}) for {}",
            command.id, command.mod_id, invocation.nick
        );

        self.manager
            .events()
            .emit(&ModEvent::CommandExecuted(Execution {
                nick: invocation.nick.clone(),
                origin: invocation.origin.clone(),
                target: invocation.target.clone(),
                args: invocation.args.clone(),
                command_id: command.id.clone(),
                mod_id: command.mod_id.clone(),
                at: Utc::now(),
            }));

        let handler = command.handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handler(invocation).await {
                error!("Command {} failed: {}", command.id, e);
            }
        })
    }

    /// Dispatch and execute a message, relaying user-facing errors to the
    /// invoker
    pub async fn handle(&self, message: &ChatMessage) -> Result<(), BotError> {
        match self.dispatch(message).await {
            Ok(Some(invocation)) => {
                self.execute(invocation);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) if e.is_user_facing() => {
                debug!("Rejected command from {}: {}", message.nick, e);
                let text = e.to_string();
                if message.in_channel() {
                    self.transport.say(&message.target, &text).await
                } else {
                    self.transport.notice(&message.nick, &text).await
                }
            }
            Err(e) => {
                warn!("Command from {} failed before dispatch: {}", message.nick, e);
                Ok(())
            }
        }
    }
}

/// Take the command target off the front of the arguments
fn extract_target<'a>(
    command: &Command,
    message: &ChatMessage,
    rest: &'a str,
) -> Result<(Option<String>, &'a str), CommandError> {
    let missing = || CommandError::MissingTarget {
        command: command.id.clone(),
    };

    match command.target {
        CommandTarget::None => Ok((None, rest)),
        CommandTarget::Channel => match split_first(rest) {
            Some((first, remainder)) if is_channel_name(first) => {
                Ok((Some(first.to_string()), remainder))
            }
            _ if message.in_channel() => Ok((Some(message.target.clone()), rest)),
            _ => Err(missing()),
        },
        CommandTarget::Nick => match split_first(rest) {
            Some((first, remainder)) => Ok((Some(first.to_string()), remainder)),
            None => Err(missing()),
        },
    }
}

/// Arguments for the handler: pattern captures, or the whole remainder
fn match_args(command: &Command, rest: &str, trigger: char) -> Result<Vec<String>, CommandError> {
    let Some(pattern) = &command.pattern else {
        return Ok(if rest.is_empty() {
            Vec::new()
        } else {
            vec![rest.to_string()]
        });
    };

    let captures = pattern
        .captures(rest)
        .ok_or_else(|| CommandError::PatternMismatch {
            command: command.id.clone(),
            trigger,
        })?;

    if captures.len() == 1 {
        return Ok(vec![captures[0].to_string()]);
    }
    Ok(captures
        .iter()
        .skip(1)
        .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex_lite::Regex;

    fn command(target: CommandTarget) -> Command {
        Command::new("say", |_| async { Ok(()) }).with_target(target)
    }

    #[test]
    fn test_channel_target_from_args_or_origin() {
        let cmd = command(CommandTarget::Channel);
        let public = ChatMessage::new("kermit", "#swamp", "!say hi");

        let (target, rest) = extract_target(&cmd, &public, "#general hello").unwrap();
        assert_eq!(target.as_deref(), Some("#general"));
        assert_eq!(rest, "hello");

        let (target, rest) = extract_target(&cmd, &public, "hello there").unwrap();
        assert_eq!(target.as_deref(), Some("#swamp"));
        assert_eq!(rest, "hello there");

        let private = ChatMessage::new("kermit", "lilypad", "say hi");
        assert!(matches!(
            extract_target(&cmd, &private, "hello"),
            Err(CommandError::MissingTarget { .. })
        ));
    }

    #[test]
    fn test_nick_target_is_first_argument() {
        let cmd = command(CommandTarget::Nick);
        let msg = ChatMessage::new("kermit", "#swamp", "!slap gonzo");
        let (target, rest) = extract_target(&cmd, &msg, "#gonzo with a fish").unwrap();
        assert_eq!(target.as_deref(), Some("#gonzo"));
        assert_eq!(rest, "with a fish");
        assert!(extract_target(&cmd, &msg, "  ").is_err());
    }

    #[test]
    fn test_pattern_captures_become_args() {
        let cmd = command(CommandTarget::None)
            .with_pattern(Regex::new(r"^(\d+)d(\d+)(?:\+(\d+))?$").unwrap());
        assert_eq!(match_args(&cmd, "2d6", '!').unwrap(), vec!["2", "6", ""]);

        let err = match_args(&cmd, "lots", '!').unwrap_err();
        assert_eq!(err.to_string(), "Invalid arguments for say. Try !help say");

        let plain = command(CommandTarget::None);
        assert_eq!(match_args(&plain, "a b  c", '!').unwrap(), vec!["a b  c"]);
        assert!(match_args(&plain, "", '!').unwrap().is_empty());
    }
}
