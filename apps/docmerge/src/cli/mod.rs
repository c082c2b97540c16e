//! # docmerge CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create an empty content database
//! - `import` - Merge a DocView document into the tree
//! - `export` - Write a subtree as DocView, or the whole tree canonically
//! - `status` - Show tree status
//! - `hash` - BLAKE3 hash of the canonical export
//! - `server` - Start the HTTP server

mod commands;

use clap::{Parser, Subcommand};
use docmerge_core::VaultError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// docmerge - streaming DocView import and merge engine
#[derive(Parser, Debug)]
#[command(name = "docmerge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the content database (redb)
    #[arg(short = 'D', long, global = true, default_value = "docmerge.redb")]
    pub database: PathBuf,

    /// Path to the TOML configuration (import options and filters)
    #[arg(short, long, global = true, default_value = "docmerge.toml")]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Show tree status
    Status,

    /// Import a DocView document
    Import {
        /// Document to import
        #[arg(short, long)]
        file: PathBuf,

        /// Path the document root is imported at
        #[arg(short, long)]
        target: String,

        /// Binary attachment, as NODE_PATH@PROPERTY=FILE (repeatable)
        #[arg(short, long = "attach")]
        attachments: Vec<String>,

        /// Parse and merge, but do not commit the result
        #[arg(long)]
        dry_run: bool,
    },

    /// Export the tree
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Subtree to export (docview format only)
        #[arg(short, long, default_value = "/")]
        path: String,

        /// Export format (docview, canonical)
        #[arg(short = 'F', long, default_value = "docview")]
        format: String,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Compute BLAKE3 cryptographic hash of the tree
    Hash,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), VaultError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(&cli.database, &host, port).await,
        Some(Commands::Status) => cmd_status(&cli.database, json_mode),
        Some(Commands::Import {
            file,
            target,
            attachments,
            dry_run,
        }) => cmd_import(
            &cli.database,
            &cli.config,
            json_mode,
            &ImportArgs {
                file,
                target,
                attachments,
                dry_run,
            },
        ),
        Some(Commands::Export {
            output,
            path,
            format,
        }) => cmd_export(&cli.database, &output, &path, &format),
        Some(Commands::Init { force }) => cmd_init(&cli.database, force),
        Some(Commands::Hash) => cmd_hash(&cli.database, json_mode),
        None => cmd_status(&cli.database, json_mode),
    }
}
