//! # Cache Command Implementation
//!
//! This module implements the `cache` subcommand, which provides
//! functionality for inspecting and clearing the persistent probe cache.
//!
//! ## Subcommands
//!
//! - **`show`**: Display the state file's entries (path and last-write-time
//!   per cached probe)
//! - **`clear`**: Delete the state file

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use refsolve::cache::ProbeCache;
use refsolve::defaults;
use refsolve::metadata::PeMetadataProbe;
use refsolve::suggestions;

/// Inspect or clear the persistent probe cache
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// The state file holding the persisted cache.
    ///
    /// Defaults to the platform cache directory
    /// (e.g., `~/.cache/refsolve/refsolve.cache` on Linux).
    /// Can also be set with the `REFSOLVE_STATE_FILE` environment variable.
    #[arg(long, value_name = "FILE", env = "REFSOLVE_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    /// Show the cached probe entries
    Show(ShowArgs),
    /// Delete the state file
    Clear,
}

/// Arguments for the cache show command
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Output format (text, json)
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub format: String,
}

#[derive(Serialize)]
struct JsonEntry {
    path: PathBuf,
    mtime: i64,
}

/// Execute the `cache` command.
pub fn execute(args: CacheArgs) -> Result<()> {
    let state_file = args
        .state_file
        .unwrap_or_else(defaults::default_state_file);

    match args.command {
        CacheSubcommand::Show(show) => {
            if !state_file.exists() {
                return Err(suggestions::state_file_not_found(&state_file));
            }
            let (cache, advisory) =
                ProbeCache::load(Box::new(PeMetadataProbe), &state_file);
            if let Some(advisory) = advisory {
                return Err(anyhow::anyhow!(advisory));
            }
            let entries = cache.entries_summary();
            match show.format.to_lowercase().as_str() {
                "json" => {
                    let rows: Vec<JsonEntry> = entries
                        .into_iter()
                        .map(|(path, mtime)| JsonEntry { path, mtime })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                "text" => {
                    println!(
                        "{} cached probe(s) in {}",
                        entries.len(),
                        state_file.display()
                    );
                    for (path, mtime) in entries {
                        println!("  {} (mtime {mtime})", path.display());
                    }
                }
                other => {
                    return Err(anyhow::anyhow!(
                        "Invalid format: '{other}'. Valid options are: text, json"
                    ))
                }
            }
        }
        CacheSubcommand::Clear => {
            match std::fs::remove_file(&state_file) {
                Ok(()) => println!("Removed {}", state_file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("Nothing to clear: {} does not exist", state_file.display());
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "Failed to remove {}: {e}",
                        state_file.display()
                    ))
                }
            }
        }
    }
    Ok(())
}
