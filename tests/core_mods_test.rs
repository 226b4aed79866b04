//! Core mods driven through a fully assembled bot
//! Run with: cargo test --test core_mods_test

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{say, wait_for_sent};
use lilypad_bot::application::services::BotRuntime;
use lilypad_bot::domain::entities::{ChatMessage, Rank, UserAccount};
use lilypad_bot::domain::traits::TransportEvent;
use lilypad_bot::infrastructure::adapters::{MemoryTransport, Outbound};
use lilypad_bot::infrastructure::config::{AuthMethod, Config, TransportKind};
use lilypad_bot::mods::CORE_MOD_IDS;

struct Bot {
    _root: tempfile::TempDir,
    config: Config,
    transport: Arc<MemoryTransport>,
    runtime: BotRuntime,
}

impl Bot {
    async fn start() -> Self {
        common::ensure_init();
        let root = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.transport.adapter = TransportKind::Memory;
        config.transport.channels = vec!["#swamp".to_string()];
        config.mods.core_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("mods").join("core");
        config.mods.user_dir = root.path().join("user");
        config.mods.config_dir = root.path().join("config");
        config.ribbit.packages_dir = root.path().join("packages");
        config.auth.method = AuthMethod::Trust;
        config
            .permissions
            .accounts
            .insert("Kermit".to_string(), UserAccount::new(Rank::Owner));
        std::fs::create_dir_all(&config.mods.user_dir).unwrap();

        let transport = Arc::new(MemoryTransport::new(&config.bot.nick));
        let runtime = lilypad_bot::assemble(&config, transport.clone()).await.unwrap();
        runtime.start(&config.transport.channels, &[]).await.unwrap();

        Self {
            _root: root,
            config,
            transport,
            runtime,
        }
    }

    /// Send a channel message and collect the single reply
    async fn ask(&self, nick: &str, text: &str) -> Outbound {
        self.transport.take_sent();
        self.runtime
            .handle_event(TransportEvent::Message(ChatMessage::new(nick, "#swamp", text)))
            .await;
        let sent = wait_for_sent(&self.transport, 1).await;
        assert_eq!(sent.len(), 1, "unexpected output for {}: {:?}", text, sent);
        sent.into_iter().next().unwrap()
    }
}

#[tokio::test]
async fn test_start_joins_and_loads_every_core_mod() {
    let bot = Bot::start().await;

    assert!(bot.transport.sent().contains(&Outbound::Join {
        channel: "#swamp".to_string()
    }));
    for id in CORE_MOD_IDS {
        assert!(bot.runtime.manager().is_loaded(id), "{} not loaded", id);
    }
    let record = bot.runtime.manager().get_mod("modctl").unwrap();
    assert_eq!(record.version, "0.1.0");
}

#[tokio::test]
async fn test_modctl_guards() {
    let bot = Bot::start().await;

    assert_eq!(
        bot.ask("kermit", "!unloadmod modctl").await,
        say("#swamp", "Mod 'modctl' cannot be unloaded")
    );
    assert_eq!(
        bot.ask("gonzo", "!unloadmod help").await,
        say("#swamp", "You need rank 'O' to use unloadmod")
    );
    assert_eq!(
        bot.ask("kermit", "!reloadmod help").await,
        say("#swamp", "Reloaded Help 0.1.0")
    );
    assert_eq!(
        bot.ask("kermit", "!unloadmod help").await,
        say("#swamp", "Unloaded help")
    );
    assert!(!bot.runtime.manager().is_loaded("help"));
    assert!(bot.runtime.manager().get_command("help").is_none());
}

#[tokio::test]
async fn test_ranks_managed_from_chat() {
    let bot = Bot::start().await;

    assert_eq!(
        bot.ask("kermit", "!setrank Piggy S").await,
        say("#swamp", "Piggy now has rank S")
    );
    assert_eq!(bot.ask("gonzo", "!rank piggy").await, say("#swamp", "piggy has rank S"));
    assert_eq!(
        bot.ask("piggy", "!setrank gonzo O").await,
        say("#swamp", "You are not authorized to assign rank O")
    );
    assert_eq!(
        bot.ask("gonzo", "!delrank piggy").await,
        say("#swamp", "You are not authorized to manage accounts")
    );
    assert_eq!(
        bot.ask("kermit", "!delrank piggy").await,
        say("#swamp", "piggy no longer has a global rank")
    );
    assert_eq!(bot.ask("gonzo", "!rank piggy").await, say("#swamp", "piggy has no rank"));

    // Deleted accounts stay in the snapshot as null
    let snapshot = bot
        .config
        .mods
        .config_dir
        .join(&bot.config.bot.environment)
        .join(lilypad_bot::ACCOUNTS_CONFIG_ID)
        .with_extension("json");
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(snapshot).unwrap()).unwrap();
    assert!(saved["users"]["piggy"].is_null());
    assert!(saved["users"].get("piggy").is_some());
}

#[tokio::test]
async fn test_help_describes_commands() {
    let bot = Bot::start().await;

    assert_eq!(
        bot.ask("gonzo", "!help setrank").await,
        say(
            "#swamp",
            "setrank: setrank <nick> <rank> [auth] - Give a nick a global rank"
        )
    );
    assert_eq!(bot.ask("gonzo", "!help nope").await, say("#swamp", "No such command: nope"));

    let Outbound::Say { text, .. } = bot.ask("gonzo", "!help").await else {
        panic!("expected a channel reply");
    };
    assert!(text.starts_with("Commands: "));
    for command in ["loadmod", "setconfig", "setrank", "ribbit"] {
        assert!(text.contains(command), "{} missing from {}", command, text);
    }
}

#[tokio::test]
async fn test_config_commands_report_unknown_items() {
    let bot = Bot::start().await;

    assert_eq!(
        bot.ask("kermit", "!viewconfig ghost.volume").await,
        say("#swamp", "Mod 'ghost' is not loaded")
    );
    assert_eq!(
        bot.ask("kermit", "!setconfig help.volume 11").await,
        say("#swamp", "help has no config item volume")
    );
    assert_eq!(
        bot.ask("gonzo", "!viewconfig help.volume").await,
        say("#swamp", "You need rank 'S' to use viewconfig")
    );
}

#[tokio::test]
async fn test_refused_uninstall_keeps_mod_loaded() {
    let bot = Bot::start().await;

    assert_eq!(
        bot.ask("kermit", "!ribbit uninstall help").await,
        say("#swamp", "Mod 'help' is not installed")
    );
    assert!(bot.runtime.manager().is_loaded("help"));
    assert!(bot.runtime.manager().get_command("help").is_some());

    // A hand-made user mod is not ribbit's to remove
    std::fs::create_dir_all(bot.config.mods.user_dir.join("local")).unwrap();
    assert_eq!(
        bot.ask("kermit", "!ribbit uninstall local").await,
        say(
            "#swamp",
            "Mod 'local' was not installed by ribbit, refusing to remove it"
        )
    );
    assert!(bot.config.mods.user_dir.join("local").is_dir());
}
