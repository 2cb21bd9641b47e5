//! driftsync CLI
//!
//! Maintenance tools for a directory-backed driftsync store.
//!
//! # Commands
//!
//! - `inspect` - Display archive, operation-log and backup statistics
//! - `dump-oplog` - Dump operation-log entries for debugging
//! - `verify` - Check archive and operation-log integrity
//! - `backups` - List, delete or clear safety backups
//! - `flush` - Flush the young archive into the old one
//! - `compress` - Compress old archived tasks

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// driftsync command-line store tools.
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump operation-log entries for debugging
    DumpOplog {
        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only entries after this sequence number
        #[arg(short, long, default_value = "0")]
        after: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify store integrity
    Verify {
        /// Check the archive tiers
        #[arg(short, long)]
        archive: bool,

        /// Check the operation log
        #[arg(short, long)]
        oplog: bool,
    },

    /// Manage safety backups
    Backups {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Flush the young archive into the old one
    Flush {
        /// Flush even if the flush interval has not elapsed
        #[arg(short, long)]
        now: bool,

        /// Log the flush as an operation of this client so it syncs
        #[arg(short, long)]
        client_id: Option<String>,

        /// Schema version stamped on the logged operation
        #[arg(long, default_value = "1")]
        schema_version: u32,
    },

    /// Compress archived tasks completed before the cutoff
    Compress {
        /// Cutoff in epoch milliseconds (default: one year ago)
        #[arg(long)]
        cutoff: Option<i64>,

        /// Log the compression as an operation of this client so it syncs
        #[arg(short, long)]
        client_id: Option<String>,

        /// Schema version stamped on the logged operation
        #[arg(long, default_value = "1")]
        schema_version: u32,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum BackupAction {
    /// List backups, newest first
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete one backup
    Delete {
        /// Backup id
        id: String,
    },

    /// Delete every backup
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format).await?;
        }
        Commands::DumpOplog {
            limit,
            after,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump-oplog")?;
            commands::dump_oplog::run(&path, limit, after, &format).await?;
        }
        Commands::Verify { archive, oplog } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            let check_all = !archive && !oplog;
            commands::verify::run(&path, archive || check_all, oplog || check_all).await?;
        }
        Commands::Backups { action } => {
            let path = cli.path.ok_or("Store path required for backups")?;
            match action {
                BackupAction::List { format } => commands::backups::list(&path, &format).await?,
                BackupAction::Delete { id } => commands::backups::delete(&path, &id).await?,
                BackupAction::Clear => commands::backups::clear(&path).await?,
            }
        }
        Commands::Flush {
            now,
            client_id,
            schema_version,
        } => {
            let path = cli.path.ok_or("Store path required for flush")?;
            commands::flush::run(&path, now, client_id.as_deref(), schema_version).await?;
        }
        Commands::Compress {
            cutoff,
            client_id,
            schema_version,
        } => {
            let path = cli.path.ok_or("Store path required for compress")?;
            commands::compress::run(&path, cutoff, client_id.as_deref(), schema_version).await?;
        }
        Commands::Version => {
            println!("driftsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
