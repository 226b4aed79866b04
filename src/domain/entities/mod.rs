//! Domain entities - Core business objects

pub mod account;
pub mod command;
pub mod message;
pub mod module;
pub mod rank;

pub use account::UserAccount;
pub use command::{Command, CommandHandler, CommandTarget, HandlerFuture, Invocation};
pub use message::{is_channel_name, ChatMessage, CHANNEL_PREFIXES};
pub use module::{
    ConfigItem, ConfigKind, ConfigValidator, ModContext, ModDefinition, ModFactory, ModModule,
    ModRecord, Teardown,
};
pub use rank::Rank;
