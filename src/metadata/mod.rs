//! # Metadata Probe
//!
//! Extracts the identity-relevant slice of metadata from an assembly image on
//! disk: the assembly's own fusion name, the assemblies it references, its
//! scatter files, runtime version, processor architecture, and whether it is
//! a WinMD.
//!
//! The probe reads genuine PE/CLI images. It walks the MZ/PE headers to the
//! CLR data directory, then the metadata root and its stream headers, and
//! finally decodes the `#~` table stream far enough to read the Assembly,
//! AssemblyRef and File tables (plus TypeRef/MemberRef/CustomAttribute, which
//! are needed to recover the target framework attribute). Everything else in
//! the image is skipped by size.
//!
//! Probing is a pure function of file content. Callers go through the
//! persistent cache rather than calling [`MetadataProbe::probe`] directly, so
//! a file is only ever decoded once per modification.

mod image;
mod tables;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::{AssemblyIdentity, ProcessorArchitecture};

/// Everything the resolver wants to know about one assembly file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// The assembly's own identity, from the Assembly table. Absent for
    /// images that carry metadata but no assembly manifest (netmodules);
    /// the locator rejects such candidates as having no fusion name.
    pub identity: Option<AssemblyIdentity>,
    /// Identities of every assembly this one references.
    pub references: Vec<AssemblyIdentity>,
    /// File-table entries carrying no metadata (module scatter files).
    pub scatter_files: Vec<String>,
    /// Runtime version string from the metadata root, e.g. `v4.0.30319`.
    pub runtime_version: String,
    /// Architecture derived from the COFF machine and CorFlags.
    pub architecture: ProcessorArchitecture,
    /// True when the metadata version string declares a WinMD.
    pub is_winmd: bool,
    /// Value of `TargetFrameworkAttribute` when present.
    pub framework_name: Option<String>,
}

/// Seam for metadata extraction, so tests can substitute canned results.
pub trait MetadataProbe: Send + Sync {
    /// Probe the file at `path`.
    ///
    /// Fails with [`Error::BadImage`] on malformed content and [`Error::Io`]
    /// on filesystem errors.
    fn probe(&self, path: &Path) -> Result<ProbeResult>;
}

/// Default probe reading PE/CLI images from disk.
#[derive(Debug, Default)]
pub struct PeMetadataProbe;

impl MetadataProbe for PeMetadataProbe {
    fn probe(&self, path: &Path) -> Result<ProbeResult> {
        let data = std::fs::read(path)?;
        image::parse(&data).map_err(|reason| Error::BadImage {
            path: path.to_path_buf(),
            reason,
        })
    }
}
