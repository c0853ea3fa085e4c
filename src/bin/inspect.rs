//! History store CLI
//!
//! Commands for inspecting an append-only JSONL history store.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chronicle::{HistoryStore, JsonlHistoryStore};

#[derive(Parser)]
#[command(name = "chronicle-inspect")]
#[command(about = "Inspect an append-only history store")]
struct Cli {
    /// Path to the JSONL history store
    #[arg(short, long, default_value = "history.jsonl")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracked tables with history
    Tables,

    /// Show history rows for a table, newest first
    Show {
        /// Tracked table name
        table: String,
        /// Restrict to one instance by primary-key value
        #[arg(short, long)]
        pk: Option<String>,
        /// Snapshot field holding the primary key
        #[arg(long, default_value = "id")]
        pk_field: String,
    },

    /// Verify snapshot checksums for a table
    Verify {
        /// Tracked table name
        table: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let store = JsonlHistoryStore::open(&cli.store)?;

    match cli.command {
        Commands::Tables => {
            let tables = store.tables();
            if tables.is_empty() {
                println!("No history recorded yet.");
            } else {
                for table in tables {
                    println!("{}  ({} rows)", table, store.count(&table)?);
                }
            }
        }

        Commands::Show { table, pk, pk_field } => {
            let rows = match pk {
                Some(raw) => {
                    // Accept either a JSON literal or a bare string key.
                    let pk = serde_json::from_str(&raw)
                        .unwrap_or_else(|_| serde_json::Value::String(raw));
                    store.for_instance(&table, &pk_field, &pk)?
                }
                None => store.all(&table)?,
            };
            if rows.is_empty() {
                println!("No history rows for `{}`.", table);
            }
            for row in rows {
                let user = row
                    .history_user
                    .as_ref()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let reason = row.history_change_reason.as_deref().unwrap_or("");
                println!(
                    "{:>6}  {}  {}  user={}  {}  {}",
                    row.history_id,
                    row.history_type.code(),
                    row.history_date.format("%Y-%m-%d %H:%M:%S"),
                    user,
                    serde_json::to_string(&row.fields)?,
                    reason,
                );
            }
        }

        Commands::Verify { table } => {
            if store.verify_all(&table)? {
                println!("All checksums valid for `{}`.", table);
            } else {
                println!("Checksum mismatch detected in `{}`.", table);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
