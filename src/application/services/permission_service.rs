//! Permission engine - effective ranks, authorization and account management

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::application::errors::PermissionError;
use crate::domain::entities::{Rank, UserAccount};
use crate::domain::traits::{AuthProvider, Transport};
use crate::infrastructure::storage::ModConfig;

/// Config key holding the account map
const USERS_KEY: &str = "users";

/// Computes ranks and guards changes to global accounts.
///
/// Accounts live in a `ModConfig` under `users`, keyed by lowercase nick. A
/// deleted account is stored as `null` so that it also masks any account of
/// the same name in the static config.
pub struct PermissionService {
    transport: Arc<dyn Transport>,
    accounts: Arc<ModConfig>,
    providers: HashMap<String, Arc<dyn AuthProvider>>,
    default_provider: String,
    /// nick -> authenticated; only successful checks are cached
    auth_cache: RwLock<HashMap<String, bool>>,
}

impl PermissionService {
    pub fn new(
        transport: Arc<dyn Transport>,
        accounts: Arc<ModConfig>,
        default_provider: Arc<dyn AuthProvider>,
    ) -> Self {
        let default_name = default_provider.name().to_string();
        let mut providers = HashMap::new();
        providers.insert(default_name.clone(), default_provider);
        Self {
            transport,
            accounts,
            providers,
            default_provider: default_name,
            auth_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Make another auth method available for per-account overrides
    pub fn with_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn AuthProvider>> {
        self.providers.values()
    }

    /// `level(a) >= level(b)`
    pub fn compare(a: Rank, b: Rank) -> bool {
        a.meets(b)
    }

    fn users(&self) -> Map<String, Value> {
        match self.accounts.get(USERS_KEY) {
            Some(Value::Object(users)) => users,
            _ => Map::new(),
        }
    }

    /// The account registered for a nick, if any
    pub fn account(&self, nick: &str) -> Option<UserAccount> {
        let value = self.users().remove(&nick.to_lowercase())?;
        if value.is_null() {
            return None;
        }
        match serde_json::from_value(value) {
            Ok(account) => Some(account),
            Err(e) => {
                warn!("Ignoring malformed account for {}: {}", nick, e);
                None
            }
        }
    }

    /// All registered accounts, sorted by nick
    pub fn accounts(&self) -> Vec<(String, UserAccount)> {
        let mut accounts: Vec<_> = self
            .users()
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .filter_map(|(nick, v)| serde_json::from_value(v).ok().map(|a| (nick, a)))
            .collect();
        accounts.sort_by(|a, b| a.0.cmp(&b.0));
        accounts
    }

    pub fn is_cached(&self, nick: &str) -> bool {
        self.auth_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&nick.to_lowercase())
            .copied()
            .unwrap_or(false)
    }

    fn forget(&self, nick: &str) {
        if self
            .auth_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&nick.to_lowercase())
            .is_some()
        {
            debug!("Cleared auth cache for {}", nick);
        }
    }

    /// Global rank of an authenticated account holder. A nick without an
    /// account, or one that fails to authenticate, has no global rank.
    pub async fn get_global_rank(&self, nick: &str) -> Result<Option<Rank>, PermissionError> {
        let Some(account) = self.account(nick) else {
            return Ok(None);
        };

        if self.is_cached(nick) {
            return Ok(Some(account.rank));
        }

        let method = account.auth.as_deref().unwrap_or(&self.default_provider);
        let Some(provider) = self.providers.get(method) else {
            warn!("Account {} uses unknown auth method '{}'", nick, method);
            return Ok(None);
        };

        let authenticated = provider
            .authenticate(nick)
            .await
            .map_err(|e| PermissionError::Provider(e.to_string()))?;

        if authenticated {
            self.auth_cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(nick.to_lowercase(), true);
            Ok(Some(account.rank))
        } else {
            debug!("{} failed {} authentication", nick, method);
            Ok(None)
        }
    }

    /// Rank from the transport's live channel membership
    pub fn get_channel_rank(&self, nick: &str, channel: &str) -> Option<Rank> {
        self.transport
            .user_prefix(channel, nick)
            .and_then(|prefixes| Rank::from_prefixes(&prefixes))
    }

    /// Global rank if present, else channel rank
    pub async fn get_effective_rank(
        &self,
        nick: &str,
        channel: Option<&str>,
    ) -> Result<Option<Rank>, PermissionError> {
        if let Some(rank) = self.get_global_rank(nick).await? {
            return Ok(Some(rank));
        }
        Ok(channel.and_then(|c| self.get_channel_rank(nick, c)))
    }

    /// Whether `nick` holds at least `required`. The channel rank is
    /// checked first; the global rank (which may need an auth round-trip)
    /// only when that is not enough.
    pub async fn has_permission(
        &self,
        required: &str,
        nick: &str,
        channel: Option<&str>,
    ) -> Result<bool, PermissionError> {
        let required =
            Rank::from_symbol(required).ok_or_else(|| PermissionError::UnknownRank(required.to_string()))?;
        if required == Rank::None {
            return Ok(true);
        }

        if let Some(channel) = channel {
            if let Some(rank) = self.get_channel_rank(nick, channel) {
                if Self::compare(rank, required) {
                    return Ok(true);
                }
            }
        }

        Ok(self
            .get_global_rank(nick)
            .await?
            .map_or(false, |rank| Self::compare(rank, required)))
    }

    /// Caller's authenticated global rank, or `NotAuthorized`
    async fn caller_rank(&self, caller: &str, action: &str) -> Result<Rank, PermissionError> {
        self.get_global_rank(caller)
            .await?
            .ok_or_else(|| PermissionError::NotAuthorized(action.to_string()))
    }

    /// The owner rank may touch anything; everyone else only ranks strictly
    /// below their own.
    fn dominates(caller: Rank, rank: Rank) -> bool {
        caller == Rank::Owner || caller > rank
    }

    fn check_existing(
        &self,
        caller: &str,
        caller_rank: Rank,
        nick: &str,
        existing: Option<&UserAccount>,
    ) -> Result<(), PermissionError> {
        let Some(existing) = existing else {
            return Ok(());
        };
        if existing.rank == Rank::Owner && !caller.eq_ignore_ascii_case(nick) {
            return Err(PermissionError::ProtectedAccount(nick.to_string()));
        }
        if !Self::dominates(caller_rank, existing.rank) {
            return Err(PermissionError::NotAuthorized(format!(
                "change {}, who holds rank {}",
                nick, existing.rank
            )));
        }
        Ok(())
    }

    /// Create or update a global account on behalf of `caller`
    pub async fn set_account(
        &self,
        caller: &str,
        nick: &str,
        rank: &str,
        auth: Option<&str>,
    ) -> Result<UserAccount, PermissionError> {
        let rank = Rank::from_symbol(rank)
            .filter(|r| *r != Rank::None)
            .ok_or_else(|| PermissionError::InvalidRank(rank.to_string()))?;
        if let Some(method) = auth {
            if !self.providers.contains_key(method) {
                return Err(PermissionError::InvalidAuthMethod(method.to_string()));
            }
        }

        let caller_rank = self.caller_rank(caller, "manage accounts").await?;
        let existing = self.account(nick);
        self.check_existing(caller, caller_rank, nick, existing.as_ref())?;
        if !Self::dominates(caller_rank, rank) {
            return Err(PermissionError::NotAuthorized(format!("assign rank {}", rank)));
        }

        let account = UserAccount {
            rank,
            auth: auth.map(str::to_string),
        };
        let value = serde_json::to_value(&account)
            .map_err(|e| PermissionError::Provider(e.to_string()))?;
        self.write_user(nick, value).await?;

        info!("{} set rank {} for {}", caller, rank, nick);
        Ok(account)
    }

    /// Remove a global account on behalf of `caller`
    pub async fn delete_account(&self, caller: &str, nick: &str) -> Result<(), PermissionError> {
        let caller_rank = self.caller_rank(caller, "manage accounts").await?;
        let existing = self
            .account(nick)
            .ok_or_else(|| PermissionError::NoSuchAccount(nick.to_string()))?;
        self.check_existing(caller, caller_rank, nick, Some(&existing))?;

        self.write_user(nick, Value::Null).await?;
        info!("{} deleted the account of {}", caller, nick);
        Ok(())
    }

    async fn write_user(&self, nick: &str, value: Value) -> Result<(), PermissionError> {
        let mut users = self.users();
        users.insert(nick.to_lowercase(), value);
        self.accounts
            .set_and_save(USERS_KEY, Value::Object(users))
            .await?;
        self.forget(nick);
        Ok(())
    }

    pub fn on_nick_change(&self, old: &str, new: &str) {
        self.forget(old);
        self.forget(new);
    }

    /// Forget a nick once it shares no channel with the bot. When the bot
    /// itself parts, everyone it no longer sees is forgotten.
    pub fn on_part(&self, channel: &str, nick: &str) {
        if nick.eq_ignore_ascii_case(&self.transport.nick()) {
            let mut cache = self.auth_cache.write().unwrap_or_else(PoisonError::into_inner);
            cache.retain(|cached, _| self.transport.shares_channel(cached));
            debug!("Left {}, {} cached auths remain", channel, cache.len());
            return;
        }
        if !self.transport.shares_channel(nick) {
            self.forget(nick);
        }
    }

    pub fn on_quit(&self, nick: &str) {
        self.forget(nick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::MemoryTransport;
    use crate::infrastructure::auth::TrustAuth;
    use crate::infrastructure::storage::ConfigStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Authenticates the listed nicks and counts round-trips
    struct CountingAuth {
        allowed: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthProvider for CountingAuth {
        fn name(&self) -> &str {
            "counting"
        }

        async fn authenticate(&self, nick: &str) -> Result<bool, crate::application::errors::BotError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.allowed.iter().any(|n| n.eq_ignore_ascii_case(nick)))
        }
    }

    async fn service(
        users: Value,
        allowed: &[&str],
    ) -> (tempfile::TempDir, Arc<MemoryTransport>, Arc<CountingAuth>, PermissionService) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path(), "test");
        let accounts = store.assemble("accounts", &json!({ "users": users })).await.unwrap();
        let transport = Arc::new(MemoryTransport::new("lilypad"));
        let auth = Arc::new(CountingAuth {
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        });
        let service = PermissionService::new(transport.clone(), accounts, auth.clone())
            .with_provider(Arc::new(TrustAuth));
        (dir, transport, auth, service)
    }

    #[tokio::test]
    async fn test_global_rank_requires_auth_and_caches() {
        let (_dir, _transport, auth, perms) =
            service(json!({"kermit": {"rank": "S"}, "gonzo": {"rank": "P"}}), &["kermit"]).await;

        assert_eq!(perms.get_global_rank("Kermit").await.unwrap(), Some(Rank::Super));
        assert_eq!(perms.get_global_rank("kermit").await.unwrap(), Some(Rank::Super));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);

        assert_eq!(perms.get_global_rank("gonzo").await.unwrap(), None);
        assert_eq!(perms.get_global_rank("nobody").await.unwrap(), None);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_accounts_unchanged() {
        let (dir, _transport, _auth, perms) =
            service(json!({"kermit": {"rank": "O"}}), &["kermit"]).await;
        perms.set_account("kermit", "gonzo", "P", None).await.unwrap();

        let env_dir = dir.path().join("test");
        std::fs::remove_dir_all(&env_dir).unwrap();
        std::fs::write(&env_dir, "in the way").unwrap();

        assert!(matches!(
            perms.set_account("kermit", "piggy", "S", None).await,
            Err(PermissionError::Storage(_))
        ));
        assert!(perms.account("piggy").is_none());
        assert!(perms.delete_account("kermit", "gonzo").await.is_err());
        assert_eq!(perms.account("gonzo"), Some(UserAccount::new(Rank::Power)));
    }

    #[tokio::test]
    async fn test_has_permission_channel_then_global() {
        let (_dir, transport, auth, perms) =
            service(json!({"kermit": {"rank": "S"}}), &["kermit"]).await;
        transport.set_member("#swamp", "piggy", "@");
        transport.set_member("#swamp", "fozzie", "+");

        assert!(perms.has_permission("@", "piggy", Some("#swamp")).await.unwrap());
        assert!(!perms.has_permission("@", "fozzie", Some("#swamp")).await.unwrap());
        assert!(!perms.has_permission("@", "piggy", None).await.unwrap());
        // Channel rank satisfied without an auth round-trip
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);

        assert!(perms.has_permission("@", "kermit", Some("#swamp")).await.unwrap());
        assert!(perms.has_permission("", "anyone", None).await.unwrap());
        assert!(matches!(
            perms.has_permission("Z", "kermit", None).await,
            Err(PermissionError::UnknownRank(_))
        ));
    }

    #[tokio::test]
    async fn test_effective_rank_prefers_global() {
        let (_dir, transport, _auth, perms) =
            service(json!({"kermit": {"rank": "P"}}), &["kermit"]).await;
        transport.set_member("#swamp", "kermit", "@");
        transport.set_member("#swamp", "piggy", "%");

        assert_eq!(
            perms.get_effective_rank("kermit", Some("#swamp")).await.unwrap(),
            Some(Rank::Power)
        );
        assert_eq!(
            perms.get_effective_rank("piggy", Some("#swamp")).await.unwrap(),
            Some(Rank::HalfOp)
        );
        assert_eq!(perms.get_effective_rank("piggy", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_account_mutations_check_caller() {
        let (dir, _transport, _auth, perms) = service(
            json!({"kermit": {"rank": "O"}, "piggy": {"rank": "S"}}),
            &["kermit", "piggy"],
        )
        .await;

        perms.set_account("piggy", "gonzo", "P", None).await.unwrap();
        assert_eq!(perms.account("GONZO").map(|a| a.rank), Some(Rank::Power));

        assert!(matches!(
            perms.set_account("piggy", "fozzie", "S", None).await,
            Err(PermissionError::NotAuthorized(_))
        ));
        assert!(matches!(
            perms.delete_account("piggy", "kermit").await,
            Err(PermissionError::ProtectedAccount(_))
        ));
        assert!(matches!(
            perms.set_account("nobody", "fozzie", "+", None).await,
            Err(PermissionError::NotAuthorized(_))
        ));
        assert!(matches!(
            perms.set_account("kermit", "fozzie", "X", None).await,
            Err(PermissionError::InvalidRank(_))
        ));
        assert!(matches!(
            perms.set_account("kermit", "fozzie", "P", Some("carrier-pigeon")).await,
            Err(PermissionError::InvalidAuthMethod(_))
        ));

        perms.set_account("kermit", "fozzie", "P", Some("trust")).await.unwrap();
        perms.delete_account("kermit", "gonzo").await.unwrap();
        assert!(perms.account("gonzo").is_none());

        let saved = std::fs::read_to_string(dir.path().join("test").join("accounts.json")).unwrap();
        let saved: Value = serde_json::from_str(&saved).unwrap();
        assert_eq!(saved["users"]["fozzie"], json!({"rank": "P", "auth": "trust"}));
        assert_eq!(saved["users"]["gonzo"], Value::Null);
    }

    #[tokio::test]
    async fn test_cache_invalidation() {
        let (_dir, transport, auth, perms) =
            service(json!({"kermit": {"rank": "S"}}), &["kermit"]).await;
        transport.set_member("#swamp", "kermit", "");
        transport.set_member("#bog", "kermit", "");

        perms.get_global_rank("kermit").await.unwrap();
        assert!(perms.is_cached("kermit"));

        transport.remove_member("#swamp", "kermit");
        perms.on_part("#swamp", "kermit");
        assert!(perms.is_cached("kermit"));

        transport.remove_member("#bog", "kermit");
        perms.on_part("#bog", "kermit");
        assert!(!perms.is_cached("kermit"));

        perms.get_global_rank("kermit").await.unwrap();
        perms.on_nick_change("kermit", "kermit_away");
        assert!(!perms.is_cached("kermit"));

        perms.get_global_rank("kermit").await.unwrap();
        perms.on_quit("Kermit");
        assert!(!perms.is_cached("kermit"));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 3);
    }
}
