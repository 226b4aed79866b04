//! Lifecycle event bus
//!
//! The mod manager and the command runner publish `ModEvent`s here. Every
//! event is delivered to subscribers of its kind, and again to subscribers
//! scoped to the event's mod or command id.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Kinds of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ModLoaded,
    ModUnloaded,
    ModReloaded,
    CommandLoaded,
    CommandExecuted,
}

/// A command call about to be handed to its handler
#[derive(Debug, Clone)]
pub struct Execution {
    pub nick: String,
    pub origin: String,
    pub target: Option<String>,
    pub args: Vec<String>,
    pub command_id: String,
    pub mod_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ModEvent {
    ModLoaded { mod_id: String },
    ModUnloaded { mod_id: String },
    ModReloaded { mod_id: String },
    CommandLoaded { command_id: String, mod_id: String },
    CommandExecuted(Execution),
}

impl ModEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ModEvent::ModLoaded { .. } => EventKind::ModLoaded,
            ModEvent::ModUnloaded { .. } => EventKind::ModUnloaded,
            ModEvent::ModReloaded { .. } => EventKind::ModReloaded,
            ModEvent::CommandLoaded { .. } => EventKind::CommandLoaded,
            ModEvent::CommandExecuted(_) => EventKind::CommandExecuted,
        }
    }

    /// Id that scoped subscriptions match against: the mod id for mod
    /// events, the command id for command events
    pub fn scope_id(&self) -> &str {
        match self {
            ModEvent::ModLoaded { mod_id }
            | ModEvent::ModUnloaded { mod_id }
            | ModEvent::ModReloaded { mod_id } => mod_id,
            ModEvent::CommandLoaded { command_id, .. } => command_id,
            ModEvent::CommandExecuted(execution) => &execution.command_id,
        }
    }
}

/// Which events a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: EventKind,
    /// `None` receives every event of the kind
    pub id: Option<String>,
}

impl EventFilter {
    pub fn all(kind: EventKind) -> Self {
        Self { kind, id: None }
    }

    pub fn scoped(kind: EventKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }

    fn matches(&self, event: &ModEvent) -> bool {
        self.kind == event.kind()
            && self
                .id
                .as_deref()
                .map_or(true, |id| id.eq_ignore_ascii_case(event.scope_id()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type EventHandler = Arc<dyn Fn(&ModEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    handler: EventHandler,
}

/// Synchronous observer registry
pub struct EventBus {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&ModEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                filter,
                handler: Arc::new(handler),
            });
        id
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Deliver an event. Handlers run outside the lock, so they may
    /// subscribe or unsubscribe.
    pub fn emit(&self, event: &ModEvent) {
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.filter.matches(event))
            .map(|s| s.handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
