use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notekeep_core::db::Database;

mod commands;
mod config;

use commands::Entity;
use config::Config;

#[derive(Parser)]
#[command(name = "notekeep")]
#[command(about = "Manage the notekeep note store")]
struct Cli {
    /// SQLite database file (overrides NOTEKEEP_DATABASE and the config file)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Verify foreign keys and delete policies
    Check,
    /// Print the number of rows in each table
    Stats {
        /// Print counts as a JSON object
        #[arg(long)]
        json: bool,
    },
    /// List every relation with its delete policy
    Relations,
    /// Print the JSON Schema of one record type, or of all of them
    Schema {
        #[arg(value_enum)]
        entity: Option<Entity>,
    },
}

/// Initialize tracing on stderr so stdout carries only command output
fn init_tracing(filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_database(config: &Config, flag: Option<PathBuf>) -> anyhow::Result<Database> {
    let path = config.database_path(flag)?;
    tracing::info!("Using database at {}", path.display());
    Ok(Database::open(path)?)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_error) = Config::load();
    init_tracing(&config.log_filter());
    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {:#}", e);
    }

    match cli.command {
        Some(Commands::Check) => {
            let db = open_database(&config, cli.database)?;
            commands::check(&db)?;
        }
        Some(Commands::Stats { json }) => {
            let db = open_database(&config, cli.database)?;
            commands::stats(&db, json)?;
        }
        Some(Commands::Relations) => commands::relations(),
        Some(Commands::Schema { entity }) => commands::schema(entity)?,
        Some(Commands::Migrate) | None => {
            let db = open_database(&config, cli.database)?;
            commands::migrate(&db)?;
        }
    }

    Ok(())
}
