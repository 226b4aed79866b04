//! Message parser - splits chat text into a command id and its remainder

use crate::domain::entities::ChatMessage;

/// A command-shaped message, before lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Command id as typed, trigger removed
    pub name: String,
    /// Everything after the first token, trimmed
    pub rest: String,
}

/// Recognises command invocations by their trigger character
#[derive(Debug, Clone)]
pub struct MessageParser {
    trigger: char,
}

impl MessageParser {
    pub fn new(trigger: char) -> Self {
        Self { trigger }
    }

    pub fn trigger(&self) -> char {
        self.trigger
    }

    /// Parse a message. In a channel the first token must start with the
    /// trigger; in a direct message the trigger is optional.
    pub fn parse(&self, message: &ChatMessage) -> Option<ParsedCommand> {
        let text = message.text.trim();
        let (first, rest) = match text.split_once(char::is_whitespace) {
            Some((first, rest)) => (first, rest.trim()),
            None => (text, ""),
        };

        let name = match first.strip_prefix(self.trigger) {
            Some(name) => name,
            None if !message.in_channel() => first,
            None => return None,
        };
        if name.is_empty() {
            return None;
        }

        Some(ParsedCommand {
            name: name.to_string(),
            rest: rest.to_string(),
        })
    }
}

/// Split the first whitespace-delimited token off `text`
pub fn split_first(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    Some(match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim_start()),
        None => (text, ""),
    })
}
