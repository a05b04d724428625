// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kvstore::config::StoreConfig;
use kvstore::storage::{Database, DatabaseError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "kvstore",
    version,
    about = "Crash-safe copy-on-write B+tree key-value store",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Database file (overrides KVSTORE_DATABASE_PATH)"
    )]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the value stored under a key")]
    Get { key: String },

    #[command(about = "Store a value under a key")]
    Set { key: String, value: String },

    #[command(about = "Delete a key")]
    Del { key: String },

    #[command(about = "List entries in key order")]
    Scan {
        #[arg(long, help = "Start at the first key >= this one")]
        from: Option<String>,

        #[arg(long, help = "Stop after this many entries")]
        limit: Option<usize>,
    },

    #[command(about = "Check the tree structure")]
    Verify,

    #[command(about = "Print root record and page counts")]
    Stats,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kvstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration from environment variables
    let mut config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.db {
        config.database_path = path;
    }

    let mut db = match Database::open_with_config(&config) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(
                "Failed to open database {}: {e}",
                config.database_path.display()
            );
            std::process::exit(1);
        }
    };

    match run(&mut db, cli.command) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(2);
        }
    }
}

/// Execute one command. `Ok(false)` means the key was not found.
fn run(db: &mut Database, command: Command) -> Result<bool, DatabaseError> {
    match command {
        Command::Get { key } => match db.get(key.as_bytes())? {
            Some(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(true)
            }
            None => Ok(false),
        },
        Command::Set { key, value } => {
            db.set(key.as_bytes(), value.as_bytes())?;
            Ok(true)
        }
        Command::Del { key } => db.delete(key.as_bytes()),
        Command::Scan { from, limit } => {
            let start = from.unwrap_or_default();
            let limit = limit.unwrap_or(usize::MAX);
            let mut iter = db.iter_from(start.as_bytes())?;
            let mut printed = 0;
            while printed < limit {
                let Some((key, value)) = iter.next_entry()? else {
                    break;
                };
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
                printed += 1;
            }
            Ok(true)
        }
        Command::Verify => {
            let stats = db.verify()?;
            println!(
                "ok: height={} pages={} leaves={} entries={}",
                stats.height, stats.pages, stats.leaves, stats.entries
            );
            Ok(true)
        }
        Command::Stats => {
            let superblock = *db.storage().superblock();
            println!("root: {}", superblock.root);
            println!("total pages: {}", superblock.total_page_count);
            println!("file pages: {}", db.storage().file_pages());
            println!("commit sequence: {}", superblock.commit_sequence);
            println!("entries: {}", db.count()?);
            Ok(true)
        }
    }
}
