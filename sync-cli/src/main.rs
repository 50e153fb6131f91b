//! # livesync
//!
//! CLI for the livesync state-synchronization protocol.
//!
//! ## Commands
//!
//! - `watch`: Follow a live document and print it after every update
//! - `patch`: Apply a JSON Patch file to a JSON document
//! - `merge`: Merge a snapshot into a JSON document
//!
//! ## Example
//!
//! ```bash
//! # Follow a document over WebSocket
//! livesync watch ws://localhost:3000/sync --pretty
//!
//! # Same endpoint over server-sent events, timings from a config file
//! livesync watch http://localhost:3000/sync --transport push --config livesync.toml
//!
//! # Offline tools
//! livesync patch doc.json ops.json
//! livesync merge doc.json snapshot.json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{merge, patch, watch};
use config::TransportChoice;

/// CLI for the livesync state-synchronization protocol.
#[derive(Parser, Debug)]
#[command(name = "livesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow a live document and print it after every update
    Watch {
        /// Endpoint URL (absolute, or relative to --base-url)
        url: Option<String>,

        /// Transport to use (default: from the URL scheme)
        #[arg(long, short, value_enum)]
        transport: Option<TransportChoice>,

        /// TOML config file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Origin that relative endpoints are resolved against
        #[arg(long)]
        base_url: Option<String>,

        /// Pretty-print documents
        #[arg(long)]
        pretty: bool,
    },

    /// Apply a JSON Patch file to a JSON document and print the result
    Patch {
        /// Document to patch
        document: PathBuf,

        /// File holding an array of patch operations
        patch: PathBuf,

        /// Apply leniently, without validating against a copy first
        #[arg(long)]
        no_validate: bool,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Merge a snapshot into a JSON document and print the result
    Merge {
        /// Document to merge into
        document: PathBuf,

        /// Snapshot to merge from
        snapshot: PathBuf,

        /// Also delete `$`-prefixed keys missing from the snapshot
        #[arg(long)]
        strict: bool,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Watch {
            url,
            transport,
            config,
            base_url,
            pretty,
        } => {
            let options = watch::Options {
                url,
                transport,
                config,
                base_url,
                pretty,
            };
            watch::run(options).await?;
        }
        Commands::Patch {
            document,
            patch,
            no_validate,
            pretty,
        } => {
            patch::run(&document, &patch, !no_validate, pretty).await?;
        }
        Commands::Merge {
            document,
            snapshot,
            strict,
            pretty,
        } => {
            merge::run(&document, &snapshot, strict, pretty).await?;
        }
    }

    Ok(())
}
