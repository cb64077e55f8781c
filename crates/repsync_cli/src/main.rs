//! Repsync CLI
//!
//! Command-line tools for repsync record stores.
//!
//! # Commands
//!
//! - `log` - Record a workout in the local store
//! - `list` - List records of one entity type
//! - `delete` - Tombstone a record
//! - `status` - Show pending changes and watermarks
//! - `sync` - Run one sync cycle against a file-backed cloud
//! - `purge` - Remove converged tombstones past the retention window

mod commands;

use clap::{Parser, Subcommand};
use repsync_protocol::{EntityType, OwnerId, RecordId};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Repsync command-line store tools.
#[derive(Parser)]
#[command(name = "repsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local record store file
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
    /// Record a workout
    Log {
        /// Owner of the workout
        #[arg(short, long)]
        owner: OwnerId,

        /// Kind of workout
        #[arg(short = 't', long, default_value = "strength")]
        workout_type: String,

        /// Duration in seconds
        #[arg(short, long, default_value = "3600")]
        duration: u32,

        /// Free-form notes
        #[arg(short, long, default_value = "")]
        notes: String,
    },

    /// List live records
    List {
        /// Owner whose records to list
        #[arg(short, long)]
        owner: OwnerId,

        /// Entity type (workout_log, set, program, workout_template, scheduled_workout)
        #[arg(short, long, default_value = "workout_log")]
        entity_type: EntityType,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Tombstone a record
    Delete {
        /// Record id
        id: RecordId,
    },

    /// Show sync status of an owner
    Status {
        /// Owner to inspect
        #[arg(short, long)]
        owner: OwnerId,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one sync cycle against a cloud file
    Sync {
        /// Owner to sync
        #[arg(short, long)]
        owner: OwnerId,

        /// Path to the cloud file
        #[arg(short, long)]
        cloud: PathBuf,

        /// Forget the pull watermark and refetch everything
        #[arg(long)]
        full: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove converged tombstones
    Purge {
        /// Owner whose tombstones to purge
        #[arg(short, long)]
        owner: OwnerId,

        /// Retention window in days
        #[arg(short, long, default_value = "7")]
        retention_days: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = cli.path.ok_or("Store path required (--path)")?;

    match cli.command {
        Commands::Log {
            owner,
            workout_type,
            duration,
            notes,
        } => {
            commands::log::run(&path, &owner, workout_type, duration, notes)?;
        }
        Commands::List {
            owner,
            entity_type,
            format,
        } => {
            commands::list::run(&path, &owner, entity_type, &format)?;
        }
        Commands::Delete { id } => {
            commands::delete::run(&path, &id)?;
        }
        Commands::Status { owner, format } => {
            commands::status::run(&path, &owner, &format)?;
        }
        Commands::Sync {
            owner,
            cloud,
            full,
            format,
        } => {
            commands::sync::run(&path, &owner, &cloud, full, &format)?;
        }
        Commands::Purge {
            owner,
            retention_days,
        } => {
            commands::purge::run(&path, &owner, retention_days)?;
        }
    }

    Ok(())
}
