//! Mod lifecycle integration tests
//! Run with: cargo test --test mod_lifecycle_test

mod common;

use regex_lite::Regex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Fixture;
use lilypad_bot::application::errors::ModError;
use lilypad_bot::domain::entities::{
    Command, ConfigItem, ConfigKind, Invocation, ModDefinition, ModModule,
};

fn dice() -> ModModule {
    ModModule::new("dice", |_| {
        Ok(ModDefinition::new()
            .with_name("Dice")
            .with_command(
                Command::new("Roll", |inv: Invocation| async move { inv.reply("rolled").await })
                    .with_pattern(Regex::new(r"^(\d+)d(\d+)$").unwrap()),
            )
            .with_command(Command::new("flip", |inv: Invocation| async move {
                inv.reply("heads").await
            })))
    })
}

fn greeter() -> ModModule {
    ModModule::new("greeter", |_| {
        Ok(ModDefinition::new().with_command(Command::new("hello", |inv: Invocation| async move {
            inv.reply("hi").await
        })))
    })
}

#[tokio::test]
async fn test_load_registers_record_and_commands() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.user_dir().join("dice")).unwrap();
    std::fs::write(
        fx.user_dir().join("dice").join("package.json"),
        r#"{"name": "dice-pkg", "version": "2.0.1", "author": {"name": "Gonzo"}}"#,
    )
    .unwrap();
    fx.catalog.register(dice()).unwrap();

    let record = fx.manager.load_mod("dice").await.unwrap();
    // The mod's own name wins over the package; the rest comes from the package
    assert_eq!(record.name, "Dice");
    assert_eq!(record.version, "2.0.1");
    assert_eq!(record.author, "Gonzo");

    let roll = fx.manager.get_command("ROLL").unwrap();
    assert_eq!(roll.id, "roll");
    assert_eq!(roll.mod_id, "dice");
    assert!(fx.manager.is_loaded("dice"));
}

#[tokio::test]
async fn test_already_loaded_keeps_registry_and_cache() {
    let fx = Fixture::new();
    fx.add_mod(dice());
    let events = fx.record_events();

    fx.manager.load_mod("dice").await.unwrap();
    let before = fx.manager.list_commands().len();
    events.lock().unwrap().clear();

    let err = fx.manager.load_mod("dice").await.unwrap_err();
    assert!(matches!(err, ModError::AlreadyLoaded(ref id) if id == "dice"));
    assert_eq!(fx.manager.list_commands().len(), before);
    assert!(fx.loader.is_cached("dice"));
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_collision_aborts_whole_load_and_purges_code() {
    let fx = Fixture::new();
    fx.add_mod(dice());

    let teardowns = Arc::new(AtomicUsize::new(0));
    let counter = teardowns.clone();
    fx.add_mod(ModModule::new("clash", move |_| {
        let counter = counter.clone();
        Ok(ModDefinition::new()
            .with_command(Command::new("roll", |_| async { Ok(()) }))
            .with_command(Command::new("flip", |_| async { Ok(()) }))
            .with_command(Command::new("clashonly", |_| async { Ok(()) }))
            .with_teardown(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
    }));

    fx.manager.load_mod("dice").await.unwrap();
    let err = fx.manager.load_mod("clash").await.unwrap_err();

    match err {
        ModError::CommandCollision { id, commands } => {
            assert_eq!(id, "clash");
            assert_eq!(commands, vec!["flip".to_string(), "roll".to_string()]);
        }
        other => panic!("expected a collision, got {:?}", other),
    }
    assert!(!fx.manager.is_loaded("clash"));
    assert!(fx.manager.get_command("clashonly").is_none());
    assert_eq!(fx.manager.get_command("roll").unwrap().mod_id, "dice");
    assert!(!fx.loader.is_cached("clash"));
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unload_then_load_restores_the_same_commands() {
    let fx = Fixture::new();
    fx.add_mod(dice());
    let events = fx.record_events();

    fx.manager.load_mod("dice").await.unwrap();
    let ids = |fx: &Fixture| {
        let mut ids: Vec<String> = fx.manager.list_commands().iter().map(|c| c.id.clone()).collect();
        ids.sort();
        ids
    };
    let first = ids(&fx);

    fx.manager.unload_mod("dice", false).unwrap();
    assert!(fx.manager.list_commands().is_empty());
    assert!(!fx.loader.is_cached("dice"));
    assert!(matches!(
        fx.manager.unload_mod("dice", false),
        Err(ModError::NotLoaded(_))
    ));

    fx.manager.load_mod("dice").await.unwrap();
    assert_eq!(ids(&fx), first);

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "command:flip",
            "command:roll",
            "loaded:dice",
            "unloaded:dice",
            "command:flip",
            "command:roll",
            "loaded:dice",
        ]
    );
}

#[tokio::test]
async fn test_reload_emits_reloaded_after_loaded() {
    let fx = Fixture::new();
    fx.add_mod(greeter());
    fx.manager.load_mod("greeter").await.unwrap();
    let events = fx.record_events();

    fx.manager.reload_mod("greeter").await.unwrap();
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "unloaded:greeter",
            "command:hello",
            "loaded:greeter",
            "reloaded:greeter"
        ]
    );
}

#[tokio::test]
async fn test_block_flags() {
    let fx = Fixture::new();
    fx.add_mod(ModModule::new("pinned", |_| {
        Ok(ModDefinition::new()
            .with_command(Command::new("pin", |_| async { Ok(()) }))
            .block_reload())
    }));
    fx.add_mod(ModModule::new("anchored", |_| {
        Ok(ModDefinition::new().block_unload())
    }));
    fx.manager
        .load_mods(["pinned", "anchored"])
        .await
        .unwrap();

    assert!(matches!(
        fx.manager.reload_mod("pinned").await,
        Err(ModError::Blocked { action: "reloaded", .. })
    ));
    assert!(fx.manager.get_command("pin").is_some());

    assert!(matches!(
        fx.manager.unload_mod("anchored", false),
        Err(ModError::Blocked { action: "unloaded", .. })
    ));
    fx.manager.unload_mod("anchored", true).unwrap();
    assert!(!fx.manager.is_loaded("anchored"));
}

#[tokio::test]
async fn test_rejected_mods_leave_no_trace() {
    let fx = Fixture::new();
    let instantiated = Arc::new(AtomicUsize::new(0));
    let counter = instantiated.clone();
    fx.add_mod(
        ModModule::new("future", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ModDefinition::new())
        })
        .with_min_framework_version("99.0.0"),
    );
    fx.add_mod(ModModule::new("broken", |_| Err("no commands today".to_string())));

    assert!(matches!(
        fx.manager.load_mod("future").await,
        Err(ModError::IncompatibleVersion { .. })
    ));
    assert_eq!(instantiated.load(Ordering::SeqCst), 0);

    assert!(matches!(
        fx.manager.load_mod("broken").await,
        Err(ModError::MalformedMod { .. })
    ));
    assert!(matches!(
        fx.manager.load_mod("nowhere").await,
        Err(ModError::Load { .. })
    ));

    assert!(fx.manager.list_mods().is_empty());
    assert!(!fx.loader.is_cached("future"));
    assert!(!fx.loader.is_cached("broken"));
}

#[tokio::test]
async fn test_load_mods_reports_every_failure() {
    let fx = Fixture::new();
    fx.add_mod(dice());
    fx.add_mod(greeter());

    let err = fx
        .manager
        .load_mods(["dice", "missing", "greeter", "dice"])
        .await
        .unwrap_err();
    match err {
        ModError::Batch(failures) => {
            let ids: Vec<&str> = failures.iter().map(|(id, _)| id.as_str()).collect();
            assert_eq!(ids, vec!["missing", "dice"]);
        }
        other => panic!("expected a batch error, got {:?}", other),
    }
    assert!(fx.manager.is_loaded("dice"));
    assert!(fx.manager.is_loaded("greeter"));
}

#[tokio::test]
async fn test_concurrent_loads() {
    let fx = Fixture::new();
    fx.add_mod(dice());
    fx.add_mod(greeter());

    let (a, b) = tokio::join!(fx.manager.load_mod("dice"), fx.manager.load_mod("greeter"));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(fx.manager.list_commands().len(), 3);

    fx.add_mod(ModModule::new("twin", |_| {
        Ok(ModDefinition::new().with_command(Command::new("twin", |_| async { Ok(()) })))
    }));
    let (a, b) = tokio::join!(fx.manager.load_mod("twin"), fx.manager.load_mod("twin"));
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert!(matches!(
        if a.is_err() { a } else { b },
        Err(ModError::AlreadyLoaded(_))
    ));
    assert_eq!(fx.manager.get_command("twin").unwrap().mod_id, "twin");
    assert!(fx.loader.is_cached("twin"));
}

#[tokio::test]
async fn test_config_survives_reload() {
    let fx = Fixture::new();
    fx.add_mod(
        ModModule::new("weather", |_| {
            Ok(ModDefinition::new()
                .with_config_item(ConfigItem::new("units", ConfigKind::String)))
        })
        .with_defaults(json!({"units": "metric", "city": "Swamp"})),
    );

    let record = fx.manager.load_mod("weather").await.unwrap();
    assert_eq!(record.config.get("units"), Some(json!("metric")));
    record.config.set("units", json!("imperial"));
    record.config.save().await.unwrap();

    let saved: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(fx.store.snapshot_path("weather")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved, json!({"units": "imperial"}));

    let record = fx.manager.reload_mod("weather").await.unwrap();
    assert_eq!(record.config.get("units"), Some(json!("imperial")));
    assert_eq!(record.config.get("city"), Some(json!("Swamp")));
}

#[tokio::test]
async fn test_reload_of_vanished_mod_leaves_it_unloaded() {
    let fx = Fixture::new();
    fx.add_mod(greeter());
    fx.manager.load_mod("greeter").await.unwrap();
    let events = fx.record_events();

    std::fs::remove_dir_all(fx.user_dir().join("greeter")).unwrap();
    let err = fx.manager.reload_mod("greeter").await.unwrap_err();

    assert!(matches!(err, ModError::Load { ref id, .. } if id == "greeter"));
    assert!(!fx.manager.is_loaded("greeter"));
    assert!(fx.manager.get_command("hello").is_none());
    assert!(!fx.loader.is_cached("greeter"));
    assert_eq!(*events.lock().unwrap(), vec!["unloaded:greeter"]);
}
