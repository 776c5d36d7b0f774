//! kvwrap CLI
//!
//! Command-line access to a log-backed kvwrap database.
//!
//! # Commands
//!
//! - `get`, `put`, `delete`, `exists` - Single-record operations
//! - `dump`, `count` - Read-only traversal
//! - `wipe` - Remove every record
//! - `seqnum`, `info`, `verify` - Database metadata and integrity
//!
//! Keys and values are taken as text, or as bytes when written `hex:<digits>`.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// kvwrap command-line database tools.
#[derive(Parser)]
#[command(name = "kvwrap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// Record key
        key: String,
    },

    /// Store a value under a key
    Put {
        /// Record key
        key: String,

        /// Value to store
        value: String,

        /// Fail if the key already exists
        #[arg(short, long)]
        insert: bool,
    },

    /// Delete a key
    Delete {
        /// Record key
        key: String,
    },

    /// Report whether a key exists
    Exists {
        /// Record key
        key: String,
    },

    /// Print every record
    Dump {
        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Count the records
    Count,

    /// Remove every record
    Wipe {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Print the change counter
    Seqnum,

    /// Display database metadata and dispatch
    Info {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay the log and report its state
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("kvwrap CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("kvwrap core v{}", kvwrap_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Database path required (--path)")?;
    match cli.command {
        Commands::Get { key } => commands::read::get(&path, &key)?,
        Commands::Put { key, value, insert } => commands::write::put(&path, &key, &value, insert)?,
        Commands::Delete { key } => commands::write::delete(&path, &key)?,
        Commands::Exists { key } => commands::read::exists(&path, &key)?,
        Commands::Dump { limit, format } => commands::read::dump(&path, limit, &format)?,
        Commands::Count => commands::read::count(&path)?,
        Commands::Wipe { yes } => {
            if !yes {
                return Err("Refusing to wipe without --yes".into());
            }
            commands::write::wipe(&path)?;
        }
        Commands::Seqnum => commands::info::seqnum(&path)?,
        Commands::Info { format } => commands::info::run(&path, &format)?,
        Commands::Verify => commands::info::verify(&path)?,
        Commands::Version => {}
    }

    Ok(())
}
