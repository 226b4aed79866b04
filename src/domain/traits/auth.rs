use async_trait::async_trait;

use crate::application::errors::BotError;

/// Strategy that checks whether a nick is currently authenticated
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Name used in config and in per-account overrides
    fn name(&self) -> &str;

    /// Resolves to `Ok(false)` when the nick is not authenticated or the
    /// check timed out. Errors are reserved for transport failures.
    async fn authenticate(&self, nick: &str) -> Result<bool, BotError>;

    /// Offer an incoming notice to the provider. Returns true if the
    /// provider consumed it as a reply.
    async fn handle_notice(&self, _from: &str, _text: &str) -> Result<bool, BotError> {
        Ok(false)
    }
}
