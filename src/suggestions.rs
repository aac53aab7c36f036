//! # Error Suggestions
//!
//! This module provides helper functions for generating helpful error
//! messages with hints and suggestions. Following CLI recommendations,
//! errors should tell users what went wrong AND how to fix it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crate::suggestions;
//!
//! // Instead of:
//! anyhow::bail!("Inputs file not found: {}", path.display());
//!
//! // Use:
//! return Err(suggestions::inputs_not_found(path));
//! ```

use std::path::Path;

/// Generate an error for when the inputs file is not found.
///
/// Includes hints about:
/// - Creating a new inputs file
/// - Using the -i/--inputs flag
/// - Using the REFSOLVE_INPUTS environment variable
pub fn inputs_not_found(path: &Path) -> anyhow::Error {
    anyhow::anyhow!(
        "Inputs file not found: {path}\n\n\
         hint: Create a refsolve.yaml file describing your primary references\n\
         hint: Use -i/--inputs to specify a different path\n\
         hint: Set the REFSOLVE_INPUTS environment variable",
        path = path.display()
    )
}

/// Generate an error for an inputs file with no roots.
///
/// Includes hints about the two ways to declare roots.
pub fn no_primaries(path: &Path) -> anyhow::Error {
    anyhow::anyhow!(
        "Inputs file {path} declares no primary references\n\n\
         hint: Add a 'primaries:' list of fusion names\n\
         hint: Or add a 'files:' list of assembly paths",
        path = path.display()
    )
}

/// Generate an error for a missing state file on `cache show`.
pub fn state_file_not_found(path: &Path) -> anyhow::Error {
    anyhow::anyhow!(
        "State file not found: {path}\n\n\
         hint: Run 'refsolve resolve' with a state_file configured to create one\n\
         hint: Use --state-file to point at a different location",
        path = path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_inputs_not_found_mentions_flag_and_env() {
        let message = inputs_not_found(&PathBuf::from("/tmp/refsolve.yaml")).to_string();
        assert!(message.contains("--inputs"));
        assert!(message.contains("REFSOLVE_INPUTS"));
        assert!(message.contains("/tmp/refsolve.yaml"));
    }

    #[test]
    fn test_no_primaries_mentions_both_keys() {
        let message = no_primaries(&PathBuf::from("refsolve.yaml")).to_string();
        assert!(message.contains("primaries:"));
        assert!(message.contains("files:"));
    }
}
