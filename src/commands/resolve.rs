//! # Resolve Command Implementation
//!
//! This module implements the `resolve` subcommand: run one full resolver
//! invocation from an inputs file and present the output tables.
//!
//! ## Exit Codes
//!
//! - 0: every primary resolved and no errors were recorded
//! - 1: the invocation itself failed (unreadable inputs, invalid
//!   parameters, malformed binding-redirect configuration)
//! - 2: the resolver ran to completion but recorded resolution errors
//!   (conveyed to `cli.rs` through the `RESOLUTION_ERRORS` sentinel)

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use refsolve::config;
use refsolve::decisions::{Decision, LogBackend};
use refsolve::outputs::ResolutionOutputs;
use refsolve::resolver::ResolverEngine;
use refsolve::suggestions;

/// Resolve the reference closure described by an inputs file
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Path to the inputs file describing primaries and search paths.
    #[arg(
        short = 'i',
        long,
        value_name = "FILE",
        default_value = "refsolve.yaml",
        env = "REFSOLVE_INPUTS"
    )]
    pub inputs: PathBuf,

    /// Output format (text, json)
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub format: String,

    /// Override the state file configured in the inputs.
    ///
    /// Can also be set with the `REFSOLVE_STATE_FILE` environment variable.
    #[arg(long, value_name = "FILE", env = "REFSOLVE_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

/// JSON shape of one invocation's result.
#[derive(Serialize)]
struct JsonReport<'a> {
    success: bool,
    reference_count: usize,
    probe_count: u64,
    cache_hit_count: u64,
    outputs: &'a ResolutionOutputs,
    events: &'a [Decision],
}

/// Execute the `resolve` command.
pub fn execute(args: ResolveArgs) -> Result<()> {
    let mut config = config::from_file(&args.inputs).map_err(|e| match e {
        refsolve::error::Error::Inputs { ref path, .. } if !path.exists() => {
            suggestions::inputs_not_found(path)
        }
        other => anyhow::Error::new(other),
    })?;
    if config.primary_assemblies.is_empty() && config.primary_files.is_empty() {
        return Err(suggestions::no_primaries(&args.inputs));
    }
    if let Some(state_file) = args.state_file {
        config.state_file = Some(state_file);
    }

    let engine = ResolverEngine::with_defaults(config, Box::new(LogBackend));
    let report = engine.resolve()?;

    match args.format.to_lowercase().as_str() {
        "json" => {
            let json = JsonReport {
                success: report.success,
                reference_count: report.reference_count,
                probe_count: report.probe_count,
                cache_hit_count: report.cache_hit_count,
                outputs: &report.outputs,
                events: &report.events,
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        "text" => print_text(&report),
        other => {
            return Err(anyhow::anyhow!(
                "Invalid format: '{other}'. Valid options are: text, json"
            ))
        }
    }

    if report.success {
        Ok(())
    } else {
        Err(anyhow::anyhow!("RESOLUTION_ERRORS"))
    }
}

fn print_text(report: &refsolve::resolver::ResolutionReport) {
    let outputs = &report.outputs;
    println!(
        "Resolved {} reference(s) ({} probe(s), {} cache hit(s))",
        report.reference_count, report.probe_count, report.cache_hit_count
    );

    if !outputs.resolved_files.is_empty() {
        println!("\nPrimary references:");
        for file in &outputs.resolved_files {
            println!("  {}", file.fusion_name);
            println!("      {} (copy-local: {:?})", file.path.display(), file.copy_local);
        }
    }
    if !outputs.resolved_dependency_files.is_empty() {
        println!("\nDependencies:");
        for file in &outputs.resolved_dependency_files {
            println!("  {}", file.fusion_name);
            println!("      {} (copy-local: {:?})", file.path.display(), file.copy_local);
        }
    }
    if !outputs.copy_local_files.is_empty() {
        println!("\nCopy-local files:");
        for path in &outputs.copy_local_files {
            println!("  {}", path.display());
        }
    }
    if !outputs.satellite_files.is_empty() {
        println!("\nSatellite files:");
        for path in &outputs.satellite_files {
            println!("  {}", path.display());
        }
    }
    if !outputs.suggested_redirects.is_empty() {
        println!("\nSuggested binding redirects:");
        for redirect in &outputs.suggested_redirects {
            println!("  {} -> {}", redirect.identity, redirect.max_version);
        }
    }
    for path in &outputs.files_written {
        println!("\nState file written: {}", path.display());
    }
}
