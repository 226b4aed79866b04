use async_trait::async_trait;

use crate::application::errors::BotError;
use crate::domain::traits::AuthProvider;

/// Accepts every nick. For networks without services, and for the console.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustAuth;

#[async_trait]
impl AuthProvider for TrustAuth {
    fn name(&self) -> &str {
        "trust"
    }

    async fn authenticate(&self, _nick: &str) -> Result<bool, BotError> {
        Ok(true)
    }
}
