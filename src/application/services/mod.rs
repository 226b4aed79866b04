//! Application services - mod lifecycle, permissions and the event loop

pub mod mod_manager;
pub mod permission_service;
pub mod runtime;

pub use mod_manager::{ModManager, FRAMEWORK_VERSION};
pub use permission_service::PermissionService;
pub use runtime::BotRuntime;
