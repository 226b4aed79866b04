//! Domain traits - Abstractions for infrastructure implementations

pub mod auth;
pub mod transport;

pub use auth::AuthProvider;
pub use transport::{Transport, TransportEvent};
