//! Message handling - parsing and dispatching chat commands

pub mod dispatcher;
pub mod parser;

pub use dispatcher::CommandRunner;
pub use parser::{MessageParser, ParsedCommand};
