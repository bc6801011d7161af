//! Binary entrypoint for the playervault CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and an empty database
//! - `status` - print player and account counts and the item storage mix
//! - `create-account <name>` - create an account, prompting for the password
//! - `create-player <account> <name>` - create a character on an account
//! - `inspect <name>` - dump a player's item trees as JSON
//! - `convert --to <relational|binary>` - re-save every player in the other item storage mode
//!
//! See the library crate docs for module-level details: `playervault::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::{json, Value};

use playervault::cache::PlayerCacheManager;
use playervault::config::Config;
use playervault::items::{ItemTree, NodeId, PlayerItems};
use playervault::records::ItemStorage;
use playervault::repository;

#[derive(Parser)]
#[command(name = "playervault")]
#[command(about = "Player, account and item persistence for game servers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the database
    Init,
    /// Show player and account counts
    Status,
    /// Create an account (password is prompted)
    CreateAccount {
        name: String,
    },
    /// Create a character on an existing account
    CreatePlayer {
        /// Account name
        account: String,
        /// Character name
        name: String,
    },
    /// Print a player's items as JSON
    Inspect {
        name: String,
    },
    /// Re-save every player's items in the given storage mode
    Convert {
        /// Target mode: relational or binary
        #[arg(long)]
        to: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new playervault configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            let config = Config::default();
            let db = config.open_database()?;
            db.flush()?;
            info!("Database initialized at {}", config.storage.data_dir);
        }
        Commands::Status => {
            let config = load_config(pre_config, &cli.config).await?;
            let db = config.open_database()?;
            let mut relational = 0usize;
            let mut binary = 0usize;
            let mut online = 0usize;
            for guid in db.list_player_guids()? {
                let profile = db.get_player(guid)?;
                match profile.item_storage {
                    ItemStorage::Relational => relational += 1,
                    ItemStorage::Binary => binary += 1,
                }
                if profile.online {
                    online += 1;
                }
            }
            println!("playervault v{}", env!("CARGO_PKG_VERSION"));
            println!("Data dir: {}", config.storage.data_dir);
            println!("Save mode: {}", config.storage.item_storage.as_str());
            println!("Accounts: {}", db.account_count());
            println!(
                "Players: {} ({} online, {} relational, {} binary)",
                db.player_count(),
                online,
                relational,
                binary
            );
        }
        Commands::CreateAccount { name } => {
            let config = load_config(pre_config, &cli.config).await?;
            let db = config.open_database()?;
            let pass1 = rpassword::prompt_password("New password: ")?;
            if pass1.len() < 8 {
                println!("Error: password too short (min 8).");
                return Ok(());
            }
            if pass1.len() > 128 {
                println!("Error: password too long.");
                return Ok(());
            }
            let pass2 = rpassword::prompt_password("Confirm password: ")?;
            if pass1 != pass2 {
                println!("Error: passwords do not match.");
                return Ok(());
            }
            let account = repository::create_account(&db, &name, &pass1)?;
            println!("Account '{}' created with id {}.", account.name, account.id);
        }
        Commands::CreatePlayer { account, name } => {
            let config = load_config(pre_config, &cli.config).await?;
            let db = config.open_database()?;
            let account = repository::load_account_by_name(&db, &account)?
                .ok_or_else(|| anyhow!("Unknown account '{}'", account))?;
            let record = repository::create_player(&db, account.id, &name)?;
            println!(
                "Player '{}' created with guid {} on account '{}'.",
                record.name, record.guid, account.name
            );
        }
        Commands::Inspect { name } => {
            let config = load_config(pre_config, &cli.config).await?;
            let db = config.open_database()?;
            let loaded = repository::load_player_by_name(&db, &name)?;
            let player = &loaded.value;
            let anomalies: Vec<String> = loaded.anomalies.iter().map(|a| a.to_string()).collect();
            let dump = json!({
                "guid": player.guid(),
                "name": player.name(),
                "item_storage": player.profile.item_storage.as_str(),
                "items": items_json(&player.items),
                "anomalies": anomalies,
            });
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        Commands::Convert { to } => {
            let config = load_config(pre_config, &cli.config).await?;
            let mode = ItemStorage::from_str(&to)
                .ok_or_else(|| anyhow!("Unknown item storage mode '{}'", to))?;
            let db = config.open_database()?;
            let cache = PlayerCacheManager::with_database(&db, mode, config.cache.clone());
            cache.start()?;
            let mut queued = 0usize;
            for guid in db.list_player_guids()? {
                let profile = db.get_player(guid)?;
                if profile.item_storage == mode {
                    continue;
                }
                let items = repository::load_player_items(&db, &profile)?;
                if !items.is_clean() {
                    warn!(
                        "player {} has {} item anomalies; converting what was recovered",
                        profile.name,
                        items.anomalies.len()
                    );
                }
                cache.cache_player(guid, &items.value);
                cache.add_to_save_list(guid);
                queued += 1;
            }
            let failed = cache.shutdown();
            let stats = cache.stats();
            println!(
                "Converted {} of {} players to {} storage ({} flushes, {} failures).",
                queued - failed,
                queued,
                mode.as_str(),
                stats.flushes,
                stats.flush_failures
            );
            if failed > 0 {
                return Err(anyhow!("{} players could not be converted", failed));
            }
        }
    }

    Ok(())
}

async fn load_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    match pre_config {
        Some(config) => Ok(config),
        None => Config::load(path).await,
    }
}

fn node_json(tree: &ItemTree, node: NodeId) -> Value {
    let Some(item) = tree.get(node) else {
        return Value::Null;
    };
    let children: Vec<Value> = tree
        .children(node)
        .iter()
        .map(|&child| node_json(tree, child))
        .collect();
    json!({
        "type": item.type_id,
        "count": item.count,
        "kind": item.kind,
        "attributes": item.attributes,
        "children": children,
    })
}

fn items_json(items: &PlayerItems) -> Value {
    let mut slots = serde_json::Map::new();
    for (slot, tree) in items.equipped() {
        slots.insert(slot.name().to_string(), node_json(tree, tree.root()));
    }
    let mut depots = serde_json::Map::new();
    for (depot_id, chest) in &items.depot_chests {
        let trees: Vec<Value> = chest.iter().map(|t| node_json(t, t.root())).collect();
        depots.insert(depot_id.to_string(), Value::Array(trees));
    }
    let inbox: Vec<Value> = items.inbox.iter().map(|t| node_json(t, t.root())).collect();
    json!({
        "last_depot_id": items.last_depot_id,
        "inventory": slots,
        "depot_chests": depots,
        "inbox": inbox,
    })
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins; otherwise the configured level
    let config_level = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok());
    let base_level = match verbosity {
        0 => config_level.unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // Mirror to the console only when attached to a terminal
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
            let _ = builder.try_init();
            return;
        }
    }
    builder.format(|fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
    });
    let _ = builder.try_init();
}
