//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Errors: error types for every layer
//! - Events: the mod lifecycle event bus
//! - Services: mod manager, permission engine, runtime
//! - Messaging: command parsing and dispatch

pub mod errors;
pub mod events;
pub mod messaging;
pub mod services;
