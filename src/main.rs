//! Binary entry point for `refsolve`.
//!
//! All resolver behavior lives in the library crate; this file only
//! parses the command line and hands control to the dispatcher in
//! [`cli`]. Errors bubbling out of a command surface through `anyhow`'s
//! reporting and become a non-zero exit code.

mod cli;
mod commands;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    cli::Cli::parse().execute()
}
