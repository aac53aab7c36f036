//! # CLI Argument Parsing and Command Dispatch
//!
//! The `clap`-derived surface of the `refsolve` binary: global flags
//! (`--color`, `--log-level`, `--verbose`, `--quiet`), the subcommand
//! enum, and the dispatcher that initializes logging and hands off to the
//! implementation modules under `src/commands/`.
//!
//! Diagnostic verbosity is resolved once, up front: `--quiet` pins the
//! logger to errors, repeated `-v` flags raise it to debug and then
//! trace, and only when neither is given does the textual `--log-level`
//! value apply.

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

use crate::commands;
use refsolve::output::ColorMode;

/// Assembly reference resolver - compute and explain a build's reference closure
#[derive(Parser, Debug)]
#[command(name = "refsolve")]
#[command(
    version,
    about,
    long_about = "Assembly reference resolver - compute the transitive reference closure, \
                  pick one file per identity, and explain every decision"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// When to color output
    #[arg(long, global = true, value_enum, default_value = "auto")]
    color: ColorMode,

    /// Log level used when --verbose/--quiet are absent
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Print more diagnostics (repeat for trace output)
    #[arg(
        short = 'v',
        long,
        global = true,
        action = ArgAction::Count,
        conflicts_with = "quiet"
    )]
    verbose: u8,

    /// Only print errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the reference closure described by an inputs file
    Resolve(commands::resolve::ResolveArgs),

    /// Validate an inputs file and its side files without resolving
    Validate(commands::validate::ValidateArgs),

    /// Inspect or clear the persistent probe cache
    Cache(commands::cache::CacheArgs),

    /// Display the resolved reference graph as a tree
    Tree(commands::tree::TreeArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the parsed CLI command
    pub fn execute(self) -> Result<()> {
        self.init_logging()?;

        match self.command {
            Commands::Resolve(args) => {
                // A completed run that recorded resolution errors exits
                // with a dedicated code, separated from operational
                // failures; the sentinel travels up as a pseudo-error.
                match commands::resolve::execute(args) {
                    Err(e) if e.to_string() == "RESOLUTION_ERRORS" => {
                        std::process::exit(refsolve::exit_codes::RESOLUTION_ERRORS);
                    }
                    other => other,
                }
            }
            Commands::Validate(args) => commands::validate::execute(args),
            Commands::Cache(args) => commands::cache::execute(args),
            Commands::Tree(args) => commands::tree::execute(args, self.color),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }

    fn init_logging(&self) -> Result<()> {
        env_logger::Builder::from_default_env()
            .filter_level(self.log_filter()?)
            .write_style(if self.color.enabled() {
                env_logger::WriteStyle::Auto
            } else {
                env_logger::WriteStyle::Never
            })
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init()
            .map_err(|e| anyhow!("could not initialize logging: {e}"))
    }

    /// Effective logger level. `--quiet` wins, then `-v` counts, then the
    /// textual `--log-level`.
    fn log_filter(&self) -> Result<LevelFilter> {
        if self.quiet {
            return Ok(LevelFilter::Error);
        }
        Ok(match self.verbose {
            0 => self.log_level.parse().map_err(|_| {
                anyhow!(
                    "unknown log level '{}' (expected one of: error, warn, info, debug, trace, off)",
                    self.log_level
                )
            })?,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
    }
}
