//! Default values for resolver configuration.
//!
//! This module provides centralized default values used across commands,
//! ensuring consistency and avoiding duplication.

use std::path::PathBuf;

use crate::locator::SearchPath;

/// Assembly extensions considered during candidate search, in priority
/// order.
pub const DEFAULT_ASSEMBLY_EXTENSIONS: &[&str] = &[".winmd", ".dll", ".exe"];

/// Extensions of files that travel with a resolved assembly.
pub const DEFAULT_RELATED_FILE_EXTENSIONS: &[&str] = &[".pdb", ".xml"];

/// Runtime version targeted when the inputs do not say otherwise.
pub const DEFAULT_TARGETED_RUNTIME_VERSION: &str = "2.0.50727";

/// Returns the default state-file path.
///
/// Uses the platform-appropriate cache directory:
/// - Linux: `~/.cache/refsolve` (XDG Base Directory)
/// - macOS: `~/Library/Caches/refsolve`
/// - Windows: `{FOLDERID_LocalAppData}\refsolve`
///
/// Falls back to `.refsolve-cache` in the current directory if the platform
/// cache directory cannot be determined.
///
/// This can be overridden by the `--state-file` CLI flag or the
/// `REFSOLVE_STATE_FILE` environment variable.
pub fn default_state_file() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".refsolve-cache"))
        .join("refsolve")
        .join("refsolve.cache")
}

/// The search order used when the inputs configure none: candidate files
/// first, then the hint path, the target framework, legacy registered
/// folders, the GAC, and finally the raw file name.
pub fn default_search_paths() -> Vec<SearchPath> {
    vec![
        SearchPath::CandidateAssemblyFiles,
        SearchPath::HintPath,
        SearchPath::TargetFrameworkDirectory,
        SearchPath::AssemblyFolders,
        SearchPath::Gac,
        SearchPath::RawFileName,
    ]
}
