//! Terminal color policy for CLI output.
//!
//! The global `--color` flag parses straight into [`ColorMode`]; `always`
//! and `never` are unconditional, while `auto` defers to the conventional
//! environment protocol before asking the terminal itself:
//!
//! 1. `NO_COLOR` set to anything (even empty) disables color
//!    (<https://no-color.org/>).
//! 2. `CLICOLOR_FORCE` set to a non-empty value other than `0` enables
//!    color even without a TTY.
//! 3. `CLICOLOR=0` disables color.
//! 4. `TERM=dumb` disables color.
//! 5. Otherwise the `console` crate decides from the terminal's
//!    capabilities.

use std::env;

use clap::ValueEnum;

/// Parsed value of the global `--color` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Color unconditionally, even when piped.
    Always,
    /// Never color.
    Never,
    /// Follow `NO_COLOR`/`CLICOLOR` and the terminal's capabilities.
    Auto,
}

impl ColorMode {
    /// Resolve the mode against the current environment.
    pub fn enabled(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => environment_allows_color(),
        }
    }
}

fn environment_allows_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if let Ok(force) = env::var("CLICOLOR_FORCE") {
        if !force.is_empty() && force != "0" {
            return true;
        }
    }
    if env::var("CLICOLOR").as_deref() == Ok("0") {
        return false;
    }
    if env::var("TERM").as_deref() == Ok("dumb") {
        return false;
    }
    console::Term::stdout().features().colors_supported()
}
