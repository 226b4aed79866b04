use serde::{Deserialize, Serialize};

use super::Rank;

/// A globally ranked user, keyed by lowercase nick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub rank: Rank,
    /// Overrides the default auth method for this user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

impl UserAccount {
    pub fn new(rank: Rank) -> Self {
        Self { rank, auth: None }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }
}
