//! Error handling types for the refsolve library

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for resolver operations
///
/// Only `InvalidParameter` and `InvalidConfigFile` abort an invocation;
/// everything else is either recorded on the owning reference or surfaced
/// as an advisory while the closure continues.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: String, value: String },

    #[error("{path}({line}): invalid binding-redirect configuration: {message}", path = .path.display())]
    InvalidConfigFile {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Invalid fusion name '{text}': {message}")]
    FusionName { text: String, message: String },

    #[error("{path}: not a valid assembly image: {reason}", path = .path.display())]
    BadImage { path: PathBuf, reason: String },

    #[error("Invalid redist list {path}: {message}", path = .path.display())]
    InvalidRedistList { path: PathBuf, message: String },

    #[error("State file error: {message}")]
    StateFile { message: String },

    #[error("Inputs file {path}: {message}", path = .path.display())]
    Inputs { path: PathBuf, message: String },

    #[error("Resolution cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for resolver operations
pub type Result<T> = std::result::Result<T, Error>;
