//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use lilypad_bot::application::events::{EventFilter, EventKind, ModEvent};
use lilypad_bot::application::services::ModManager;
use lilypad_bot::domain::entities::ModModule;
use lilypad_bot::infrastructure::adapters::{MemoryTransport, Outbound};
use lilypad_bot::infrastructure::plugins::{ModCatalog, ModLoader};
use lilypad_bot::infrastructure::storage::ConfigStore;

static INIT: Once = Once::new();

pub fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A bot's worth of mod plumbing over temporary directories
pub struct Fixture {
    pub root: tempfile::TempDir,
    pub catalog: Arc<ModCatalog>,
    pub loader: Arc<ModLoader>,
    pub store: Arc<ConfigStore>,
    pub transport: Arc<MemoryTransport>,
    pub manager: Arc<ModManager>,
}

impl Fixture {
    pub fn new() -> Self {
        ensure_init();
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(root.path().join("core")).expect("core dir");
        std::fs::create_dir_all(root.path().join("user")).expect("user dir");

        let catalog = Arc::new(ModCatalog::new());
        let loader = Arc::new(ModLoader::new(
            root.path().join("core"),
            root.path().join("user"),
            catalog.clone(),
        ));
        let store = Arc::new(ConfigStore::new(root.path().join("config"), "test"));
        let transport = Arc::new(MemoryTransport::new("lilypad"));
        let manager = ModManager::new(loader.clone(), store.clone(), transport.clone());

        Self {
            root,
            catalog,
            loader,
            store,
            transport,
            manager,
        }
    }

    pub fn user_dir(&self) -> PathBuf {
        self.root.path().join("user")
    }

    /// Install a user mod directory and register its code
    pub fn add_mod(&self, module: ModModule) {
        std::fs::create_dir_all(self.user_dir().join(&module.id)).expect("mod dir");
        self.catalog.register(module).expect("register mod");
    }

    /// Record every lifecycle event as `kind:id`
    pub fn record_events(&self) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for (kind, label) in [
            (EventKind::ModLoaded, "loaded"),
            (EventKind::ModUnloaded, "unloaded"),
            (EventKind::ModReloaded, "reloaded"),
            (EventKind::CommandLoaded, "command"),
            (EventKind::CommandExecuted, "executed"),
        ] {
            let log = log.clone();
            self.manager
                .events()
                .subscribe(EventFilter::all(kind), move |event: &ModEvent| {
                    log.lock()
                        .unwrap()
                        .push(format!("{}:{}", label, event.scope_id()));
                });
        }
        log
    }
}

/// Wait until the transport has sent at least `count` things
pub async fn wait_for_sent(transport: &MemoryTransport, count: usize) -> Vec<Outbound> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if transport.sent().len() >= count {
                return transport.sent();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| transport.sent())
}

pub fn say(target: &str, text: &str) -> Outbound {
    Outbound::Say {
        target: target.to_string(),
        text: text.to_string(),
    }
}

pub fn notice(target: &str, text: &str) -> Outbound {
    Outbound::Notice {
        target: target.to_string(),
        text: text.to_string(),
    }
}
