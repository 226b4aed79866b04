//! Application layer errors
//!
//! Errors split into two classes. User-facing errors are safe to relay to the
//! chat origin verbatim; everything else is logged and never shown in chat.

use std::sync::PoisonError;
use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Command(#[from] CommandError),

    #[error("{0}")]
    Mod(#[from] ModError),

    #[error("{0}")]
    Permission(#[from] PermissionError),

    #[error("{0}")]
    Install(#[from] InstallError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    pub fn is_user_facing(&self) -> bool {
        match self {
            BotError::Command(e) => e.is_user_facing(),
            BotError::Mod(e) => e.is_user_facing(),
            BotError::Permission(e) => e.is_user_facing(),
            BotError::Install(e) => e.is_user_facing(),
            _ => false,
        }
    }
}

/// Mod loader and mod manager errors
#[derive(Error, Debug)]
pub enum ModError {
    #[error("No cached code for mod '{0}'")]
    NotFound(String),

    #[error("Failed to load mod '{id}': {reason}")]
    Load { id: String, reason: String },

    #[error("Mod '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Mod '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Mod '{id}' cannot be {action}")]
    Blocked { id: String, action: &'static str },

    #[error("Mod '{id}' requires framework version {required}, running {running}")]
    IncompatibleVersion {
        id: String,
        required: String,
        running: String,
    },

    #[error("Mod '{id}' is malformed: {reason}")]
    MalformedMod { id: String, reason: String },

    #[error("Mod '{id}' declares commands that are already registered: {}", .commands.join(", "))]
    CommandCollision { id: String, commands: Vec<String> },

    #[error("{} mod(s) failed to load: {}", .0.len(), .0.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>().join(", "))]
    Batch(Vec<(String, ModError)>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ModError {
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ModError::NotFound(_)
                | ModError::AlreadyLoaded(_)
                | ModError::NotLoaded(_)
                | ModError::Blocked { .. }
                | ModError::IncompatibleVersion { .. }
                | ModError::CommandCollision { .. }
        )
    }
}

impl<T> From<PoisonError<T>> for ModError {
    fn from(_: PoisonError<T>) -> Self {
        ModError::Internal("Lock poisoned".to_string())
    }
}

/// Command dispatch errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{command} needs a target, none was given")]
    MissingTarget { command: String },

    #[error("Invalid arguments for {command}. Try {trigger}help {command}")]
    PatternMismatch { command: String, trigger: char },

    #[error("You need rank '{rank}' to use {command}")]
    InsufficientPermission { command: String, rank: String },

    #[error("Permission check failed: {0}")]
    Permission(#[from] PermissionError),
}

impl CommandError {
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, CommandError::Permission(_))
    }
}

/// Permission engine errors
#[derive(Error, Debug)]
pub enum PermissionError {
    /// A command or caller referenced a rank symbol that does not exist.
    #[error("Unknown rank '{0}'")]
    UnknownRank(String),

    #[error("'{0}' is not a valid rank")]
    InvalidRank(String),

    #[error("'{0}' is not a known auth method")]
    InvalidAuthMethod(String),

    #[error("You are not authorized to {0}")]
    NotAuthorized(String),

    #[error("The account for {0} can only be changed by its owner")]
    ProtectedAccount(String),

    #[error("{0} has no account")]
    NoSuchAccount(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Auth provider error: {0}")]
    Provider(String),
}

impl PermissionError {
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            PermissionError::UnknownRank(_)
                | PermissionError::Storage(_)
                | PermissionError::Provider(_)
        )
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Mod installer errors
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("'{0}' is not a valid mod id")]
    InvalidId(String),

    #[error("Mod '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("Mod '{0}' is not installed")]
    NotInstalled(String),

    #[error("Mod '{0}' was not installed by ribbit, refusing to remove it")]
    NotManaged(String),

    #[error("Package manager failed: {0}")]
    PackageManager(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            InstallError::InvalidId(_)
                | InstallError::AlreadyInstalled(_)
                | InstallError::NotInstalled(_)
                | InstallError::NotManaged(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_lists_every_command() {
        let err = ModError::CommandCollision {
            id: "dice".to_string(),
            commands: vec!["roll".to_string(), "flip".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Mod 'dice' declares commands that are already registered: roll, flip"
        );
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_internal_errors_are_not_relayed() {
        let load = ModError::Load {
            id: "x".to_string(),
            reason: "boom".to_string(),
        };
        assert!(!load.is_user_facing());
        assert!(!BotError::Mod(load).is_user_facing());
        assert!(!CommandError::Permission(PermissionError::UnknownRank("Z".into())).is_user_facing());
        assert!(BotError::Permission(PermissionError::NoSuchAccount("bob".into())).is_user_facing());
    }
}
