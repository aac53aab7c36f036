//! # Validate Command Implementation
//!
//! This module implements the `validate` subcommand, which parses the
//! inputs file and every side file it references (binding-redirect
//! configuration, redist and subset lists) without running a resolution.
//!
//! This command is a safe, read-only operation that does not touch the
//! probe cache.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use refsolve::config;
use refsolve::redirect::RedirectSet;
use refsolve::redist::RedistPolicy;
use refsolve::suggestions;

/// Validate an inputs file and its side files without resolving
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the inputs file to check.
    #[arg(
        short = 'i',
        long,
        value_name = "FILE",
        default_value = "refsolve.yaml",
        env = "REFSOLVE_INPUTS"
    )]
    pub inputs: PathBuf,
}

/// Execute the `validate` command.
pub fn execute(args: ValidateArgs) -> Result<()> {
    println!("Validating inputs from: {}", args.inputs.display());

    let config = config::from_file(&args.inputs).map_err(|e| match e {
        refsolve::error::Error::Inputs { ref path, .. } if !path.exists() => {
            suggestions::inputs_not_found(path)
        }
        other => anyhow::Error::new(other),
    })?;

    println!(
        "  {} primary reference(s), {} primary file(s)",
        config.primary_assemblies.len(),
        config.primary_files.len()
    );
    println!("  {} search path entr(ies)", config.search_paths.len());

    if let Some(config_file) = &config.config_file {
        let redirects = RedirectSet::from_config_file(config_file)?;
        println!(
            "  {} binding redirect(s) from {}",
            redirects.len(),
            config_file.display()
        );
    }

    let table_count =
        config.installed_assembly_tables.len() + config.full_framework_tables.len();
    if table_count > 0 || !config.installed_assembly_subset_tables.is_empty() {
        let mut full = config.installed_assembly_tables.clone();
        full.extend(config.full_framework_tables.iter().cloned());
        let outcome = RedistPolicy::load(
            &full,
            &config.installed_assembly_subset_tables,
            &config.full_subset_names,
        );
        for advisory in &outcome.advisories {
            log::warn!("{advisory}");
        }
        if !outcome.advisories.is_empty() {
            return Err(anyhow::anyhow!(
                "{} redist list(s) could not be loaded",
                outcome.advisories.len()
            ));
        }
        println!("  {table_count} redist list(s) loaded");
    }

    if config.primary_assemblies.is_empty() && config.primary_files.is_empty() {
        return Err(suggestions::no_primaries(&args.inputs));
    }

    println!("Inputs are valid.");
    Ok(())
}
