//! NickServ auth provider
//!
//! Asks the network's NickServ whether a nick is identified. Atheme and
//! Anope answer `STATUS <nick>` with `STATUS <nick> <level>`; older services
//! only know `ACC <nick>`, answering `<nick> ACC <level>`. The provider starts
//! with STATUS and switches to ACC for good the first time the service
//! replies that STATUS is an unknown command, replaying whatever was pending.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::errors::BotError;
use crate::domain::traits::{AuthProvider, Transport};

/// Level NickServ reports for a nick identified to its account
const IDENTIFIED_LEVEL: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuerySyntax {
    /// STATUS sent, not yet confirmed by a reply
    Detecting,
    Status,
    Acc,
}

impl QuerySyntax {
    fn query(self, nick: &str) -> String {
        match self {
            QuerySyntax::Detecting | QuerySyntax::Status => format!("STATUS {}", nick),
            QuerySyntax::Acc => format!("ACC {}", nick),
        }
    }
}

#[derive(Default)]
struct Pending {
    /// Nick as first requested, for replays
    nick: String,
    waiters: Vec<oneshot::Sender<bool>>,
    timer: Option<JoinHandle<()>>,
}

impl Pending {
    fn resolve(mut self, authenticated: bool) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        for waiter in self.waiters {
            let _ = waiter.send(authenticated);
        }
    }
}

struct AuthState {
    syntax: QuerySyntax,
    pending: HashMap<String, Pending>,
}

/// Registered-nick checking via NickServ
pub struct NickServAuth {
    transport: Arc<dyn Transport>,
    service: String,
    timeout: Duration,
    state: Arc<Mutex<AuthState>>,
}

impl NickServAuth {
    pub fn new(transport: Arc<dyn Transport>, service: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            service: service.into(),
            timeout,
            state: Arc::new(Mutex::new(AuthState {
                syntax: QuerySyntax::Detecting,
                pending: HashMap::new(),
            })),
        }
    }

    /// Number of nicks with an outstanding query
    pub fn pending_requests(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    /// True once the service has been found to only speak ACC
    pub fn uses_fallback(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).syntax == QuerySyntax::Acc
    }

    /// Abandon the pending request for `key` once the timeout elapses
    fn arm_timer(&self, key: String) -> JoinHandle<()> {
        let state = self.state.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let pending = state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pending
                .remove(&key);
            if let Some(mut pending) = pending {
                debug!("NickServ check for {} timed out", key);
                // This task is the timer; nothing left to abort.
                pending.timer = None;
                pending.resolve(false);
            }
        })
    }

    fn resolve(&self, nick: &str, authenticated: bool) -> bool {
        let pending = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .remove(&nick.to_lowercase());
        match pending {
            Some(pending) => {
                pending.resolve(authenticated);
                true
            }
            None => false,
        }
    }

    fn confirm_status(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.syntax == QuerySyntax::Detecting {
            state.syntax = QuerySyntax::Status;
        }
    }

    /// Switch to ACC and replay every pending query with it
    async fn fall_back(&self) -> Result<(), BotError> {
        let replay: Vec<String> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.syntax == QuerySyntax::Acc {
                return Ok(());
            }
            state.syntax = QuerySyntax::Acc;
            state.pending.values().map(|p| p.nick.clone()).collect()
        };

        info!(
            "{} does not support STATUS, falling back to ACC ({} queued)",
            self.service,
            replay.len()
        );
        for nick in replay {
            self.transport
                .say(&self.service, &QuerySyntax::Acc.query(&nick))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for NickServAuth {
    fn name(&self) -> &str {
        "nickserv"
    }

    async fn authenticate(&self, nick: &str) -> Result<bool, BotError> {
        let key = nick.to_lowercase();
        let (tx, rx) = oneshot::channel();

        let query = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let syntax = state.syntax;
            let entry = state.pending.entry(key.clone()).or_insert_with(|| Pending {
                nick: nick.to_string(),
                ..Pending::default()
            });
            entry.waiters.push(tx);
            // Later requests share the outstanding query and its deadline.
            if entry.timer.is_some() {
                None
            } else {
                entry.timer = Some(self.arm_timer(key.clone()));
                Some(syntax.query(nick))
            }
        };

        if let Some(query) = query {
            if let Err(e) = self.transport.say(&self.service, &query).await {
                let pending = self
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pending
                    .remove(&key);
                if let Some(pending) = pending {
                    pending.resolve(false);
                }
                return Err(e);
            }
        }

        Ok(rx.await.unwrap_or(false))
    }

    async fn handle_notice(&self, from: &str, text: &str) -> Result<bool, BotError> {
        if !from.eq_ignore_ascii_case(&self.service) {
            return Ok(false);
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        match words.as_slice() {
            ["STATUS", nick, level, ..] => {
                self.confirm_status();
                Ok(self.resolve(nick, is_identified(level)))
            }
            [nick, "ACC", level, ..] => Ok(self.resolve(nick, is_identified(level))),
            _ if is_unknown_status(text) => {
                self.fall_back().await?;
                Ok(true)
            }
            _ => {
                if text.to_lowercase().contains("unknown command") {
                    warn!("Unexpected reply from {}: {}", self.service, text);
                }
                Ok(false)
            }
        }
    }
}

fn is_identified(level: &str) -> bool {
    level.parse::<u8>().map_or(false, |l| l >= IDENTIFIED_LEVEL)
}

fn is_unknown_status(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("unknown command") && text.contains("status")
}
