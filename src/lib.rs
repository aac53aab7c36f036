//! # Assembly Reference Resolver
//!
//! This library computes the transitive closure of a project's assembly
//! references: given the primary references a project asks for, it finds
//! one concrete file per assembly identity, walks that file's own
//! references, reconciles version conflicts, decides which files must be
//! copied next to the build output, and explains every decision it made
//! through a structured log.
//!
//! ## Core Concepts
//!
//! - **Identity (`identity`)**: the value type for strong and simple
//!   assembly names, with the two comparison modes everything else builds
//!   on (strict, and simple: versions ignored).
//! - **Metadata Probe (`metadata`)**: reads a PE/CLI image and extracts
//!   the identity-relevant slice: the assembly's own name, its references,
//!   runtime version, architecture.
//! - **Caching (`cache`)**: probe results are memoized by path and mtime
//!   and persisted to a state file across invocations.
//! - **Candidate Search (`locator`, `hosts`)**: the search-path language
//!   (`{HintPath}`, `{Gac}`, literal directories, ...) and the host seams
//!   for registry and GAC access.
//! - **Policy (`redist`, `redirect`)**: framework-membership lists decide
//!   what is part of the target framework; binding redirects remap
//!   versions before resolution.
//! - **The Graph (`reference`, `resolver`, `conflict`, `outputs`)**: the
//!   reference table, the closure driver, conflict resolution with
//!   suggested redirects, and the copy-local classifier.
//! - **Decision Log (`decisions`)**: the append-only event stream every
//!   phase writes its reasoning into.
//!
//! ## Execution Flow
//!
//! A [`resolver::ResolverEngine`] runs these phases in order:
//!
//! 1.  **Validate** the configuration aggregate.
//! 2.  **Load policy**: redist and subset lists, exclusion list.
//! 3.  **Load redirects**: config file plus framework retargets.
//! 4.  **Closure**: expand from the primaries, probing candidates through
//!     the cache with a worker pool.
//! 5.  **Prune** references excluded by the targeted subset.
//! 6.  **Resolve conflicts**; under auto-unify, install the suggested
//!     redirects and recompute the closure once.
//! 7.  **Classify outputs**: copy-local, satellites, related files.
//! 8.  **Flush** the probe cache.
//!
//! ## Quick Example
//!
//! ```no_run
//! use refsolve::config::{PrimaryAssembly, ResolverConfig};
//! use refsolve::decisions::NullBackend;
//! use refsolve::resolver::ResolverEngine;
//!
//! let mut config = ResolverConfig::default();
//! config.primary_assemblies.push(PrimaryAssembly::new(
//!     "MyApp.Core, Version=1.0.0.0".parse().unwrap(),
//! ));
//! config.search_paths = vec!["bin/libs".parse().unwrap()];
//!
//! let engine = ResolverEngine::with_defaults(config, Box::new(NullBackend));
//! let report = engine.resolve().unwrap();
//! for file in &report.outputs.resolved_files {
//!     println!("{} -> {}", file.fusion_name, file.path.display());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod conflict;
pub mod decisions;
pub mod defaults;
pub mod error;
pub mod hosts;
pub mod identity;
pub mod locator;
pub mod metadata;
pub mod output;
pub mod outputs;
pub mod redirect;
pub mod redist;
pub mod reference;
pub mod resolver;
pub mod suggestions;

#[cfg(test)]
mod identity_proptest;

/// Process exit codes used by the CLI.
pub mod exit_codes {
    /// Everything resolved cleanly.
    pub const SUCCESS: i32 = 0;
    /// The invocation itself failed (bad inputs, invalid configuration).
    pub const ERROR: i32 = 1;
    /// The resolver ran but recorded resolution errors.
    pub const RESOLUTION_ERRORS: i32 = 2;
}
