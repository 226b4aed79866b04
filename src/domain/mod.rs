//! Domain layer - Core business objects and the seams to infrastructure
//!
//! This layer contains:
//! - Entities: mods, commands, ranks, accounts and chat messages
//! - Traits: abstractions for the chat transport and auth providers

pub mod entities;
pub mod traits;
