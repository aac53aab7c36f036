//! # Completions Command Implementation
//!
//! Emits a completion script for the requested shell on stdout, built
//! from the same clap definition the binary parses with, so the script
//! always matches the real flag surface. Redirect the output wherever the
//! shell loads completions from, e.g.
//! `refsolve completions zsh > ~/.zfunc/_refsolve`.

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::Shell;

use crate::cli::Cli;

/// Generate shell completion scripts
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Execute the `completions` command.
pub fn execute(args: CompletionsArgs) -> Result<()> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(args.shell, &mut command, name, &mut std::io::stdout().lock());
    Ok(())
}
