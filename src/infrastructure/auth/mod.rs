//! Auth providers

pub mod nickserv;
pub mod trust;

pub use nickserv::NickServAuth;
pub use trust::TrustAuth;
