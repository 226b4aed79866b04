//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: YAML configuration loading
//! - Storage: per-mod JSON config snapshots
//! - Plugins: mod code resolution
//! - Auth: NickServ and trust auth providers
//! - Ribbit: package-manager-backed mod installer
//! - Adapters: transports (console, in-memory)

pub mod adapters;
pub mod auth;
pub mod config;
pub mod plugins;
pub mod ribbit;
pub mod storage;
