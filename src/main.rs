use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lilypad_bot::application::errors::BotError;
use lilypad_bot::domain::traits::Transport;
use lilypad_bot::infrastructure::adapters::{ConsoleAdapter, MemoryTransport};
use lilypad_bot::infrastructure::config::{Config, TransportKind};

#[derive(Parser)]
#[command(name = "lilypad-bot")]
#[command(about = "A chat bot built out of hot-swappable mods", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
    /// Find, install and remove user mods
    Ribbit {
        #[command(subcommand)]
        action: RibbitAction,
    },
}

#[derive(Subcommand)]
enum RibbitAction {
    /// Search the package registry for mods
    Search { term: Option<String> },
    /// Install a mod into the user mod directory
    Install { mod_id: String },
    /// Remove a mod installed by ribbit
    Uninstall { mod_id: String },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run => run_bot(&cli.config),
        Commands::Version => {
            println!("lilypad-bot v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(&cli.config),
        Commands::Ribbit { action } => run_ribbit(&cli.config, action),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Config {
    let mut config = if path.exists() {
        Config::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        tracing::info!("No config at {}, using defaults", path.display());
        Config::default()
    };
    config.apply_env();
    config
}

fn runtime() -> Result<tokio::runtime::Runtime, BotError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BotError::Internal(format!("Failed to start runtime: {}", e)))
}

fn run_bot(config_path: &Path) -> Result<(), BotError> {
    let config = load_config(config_path);
    tracing::info!("Starting lilypad-bot: {}", config.bot.nick);

    runtime()?.block_on(async {
        let (transport, reader) = match config.transport.adapter {
            TransportKind::Console => {
                let console = Arc::new(
                    ConsoleAdapter::new(&config.bot.nick)
                        .with_console_nick(&config.transport.console_nick),
                );
                let reader = console.spawn_reader();
                (console as Arc<dyn Transport>, Some(reader))
            }
            TransportKind::Memory => {
                (Arc::new(MemoryTransport::new(&config.bot.nick)) as Arc<dyn Transport>, None)
            }
        };

        let bot = lilypad_bot::assemble(&config, transport).await?;
        bot.start(&config.transport.channels, &config.mods.autoload)
            .await?;
        let result = bot.run().await;

        if let Some(reader) = reader {
            reader.abort();
        }
        result
    })
}

fn run_ribbit(config_path: &Path, action: RibbitAction) -> Result<(), BotError> {
    let config = load_config(config_path);
    let ribbit = lilypad_bot::ribbit_from_config(&config);

    runtime()?.block_on(async {
        match action {
            RibbitAction::Search { term } => {
                let results = ribbit.search(term.as_deref()).await?;
                if results.is_empty() {
                    println!("No mods found");
                }
                for package in results {
                    println!(
                        "{:<24} {:<10} {}",
                        ribbit.mod_id_of(&package.name).unwrap_or(&package.name),
                        package.version.as_deref().unwrap_or("-"),
                        package.description.as_deref().unwrap_or("")
                    );
                }
            }
            RibbitAction::Install { mod_id } => {
                let path = ribbit.install(&mod_id).await?;
                println!("Installed {} at {}", mod_id, path.display());
            }
            RibbitAction::Uninstall { mod_id } => {
                ribbit.uninstall(&mod_id).await?;
                println!("Uninstalled {}", mod_id);
            }
        }
        Ok(())
    })
}

fn init_config(path: &Path) -> Result<(), BotError> {
    Config::write_default(path)?;
    println!("Created {}", path.display());
    Ok(())
}
