//! Host abstraction for registry and shared-assembly-cache access
//!
//! The candidate search consults two machine-wide stores that only exist in
//! full on Windows hosts: the platform registry (for `{Registry:...}` and
//! `{AssemblyFolders}` search paths) and the global assembly cache. Both sit
//! behind traits so that non-Windows hosts degrade to empty results and
//! tests can substitute fakes.

use std::path::{Path, PathBuf};

use crate::identity::{AssemblyIdentity, AssemblyVersion, ProcessorArchitecture};

/// Trait for platform-registry reads - allows mocking in tests
///
/// Paths use backslash-separated key syntax with the hive as the first
/// component (`HKEY_LOCAL_MACHINE\SOFTWARE\...`). All operations are
/// best-effort: failure is indistinguishable from absence.
pub trait Registry: Send + Sync {
    /// Names of the immediate subkeys of `path`.
    fn subkey_names(&self, path: &str) -> Vec<String>;

    /// The key's default value, if set.
    fn default_value(&self, path: &str) -> Option<String>;

    /// Whether the key exists at all.
    fn open(&self, path: &str) -> bool;
}

/// Registry backend for hosts without a platform registry.
#[derive(Debug, Default)]
pub struct EmptyRegistry;

impl Registry for EmptyRegistry {
    fn subkey_names(&self, _path: &str) -> Vec<String> {
        Vec::new()
    }

    fn default_value(&self, _path: &str) -> Option<String> {
        None
    }

    fn open(&self, _path: &str) -> bool {
        false
    }
}

/// Trait for shared assembly cache queries - allows mocking in tests
pub trait GlobalAssemblyCache: Send + Sync {
    /// Locate the best file for `identity`, preferring the architecture
    /// flavor matching `target`.
    fn locate(
        &self,
        identity: &AssemblyIdentity,
        target: ProcessorArchitecture,
    ) -> Option<PathBuf>;

    /// Whether any installed assembly simple-matches `identity`,
    /// regardless of where the reference ends up being resolved from.
    fn contains(&self, identity: &AssemblyIdentity) -> bool;
}

/// GAC backend reading the conventional on-disk layout:
/// `<root>/<flavor>/<Name>/[vX.Y_]<version>_<culture>_<pkt>/<Name>.<ext>`.
///
/// With no roots configured (the default off Windows) every query misses.
#[derive(Debug, Default)]
pub struct DirectoryGac {
    roots: Vec<PathBuf>,
}

/// Flavor subdirectories in preference order for a target architecture.
fn flavors_for(target: ProcessorArchitecture) -> &'static [&'static str] {
    match target {
        ProcessorArchitecture::X86 => &["GAC_32", "GAC_MSIL"],
        ProcessorArchitecture::Amd64 => &["GAC_64", "GAC_MSIL"],
        ProcessorArchitecture::Ia64 => &["GAC_64", "GAC_MSIL"],
        ProcessorArchitecture::Arm => &["GAC_ARM", "GAC_MSIL"],
        ProcessorArchitecture::Msil | ProcessorArchitecture::None => {
            &["GAC_MSIL", "GAC_32", "GAC_64", "GAC_ARM"]
        }
    }
}

impl DirectoryGac {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Version directories for one assembly name, as `(version, culture,
    /// token, path)` tuples, highest version first.
    fn version_dirs(&self, name_dir: &Path) -> Vec<(AssemblyVersion, String, String, PathBuf)> {
        let mut found = Vec::new();
        let Ok(entries) = std::fs::read_dir(name_dir) else {
            return found;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            if let Some((version, culture, token)) = parse_gac_dir_name(&dir_name) {
                found.push((version, culture, token, entry.path()));
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.3.cmp(&b.3)));
        found
    }

    fn matching_file(&self, version_dir: &Path, name: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(version_dir).ok()?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_stem()
                        .map(|stem| stem.to_string_lossy().eq_ignore_ascii_case(name))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();
        files.into_iter().next()
    }

    fn candidates<'a>(
        &'a self,
        identity: &'a AssemblyIdentity,
        target: ProcessorArchitecture,
    ) -> impl Iterator<Item = (AssemblyVersion, PathBuf)> + 'a {
        let wanted_culture = identity.culture.clone();
        let wanted_token = identity
            .public_key_token
            .map(|t| t.to_string())
            .unwrap_or_default();
        self.roots
            .iter()
            .flat_map(move |root| flavors_for(target).iter().map(move |f| root.join(f)))
            .flat_map(move |flavor_dir| {
                let name_dir = flavor_dir.join(&identity.simple_name);
                self.version_dirs(&name_dir)
            })
            .filter(move |(_, culture, token, _)| {
                culture.eq_ignore_ascii_case(&wanted_culture)
                    && token.eq_ignore_ascii_case(&wanted_token)
            })
            .filter_map(|(version, _, _, dir)| {
                self.matching_file(&dir, &identity.simple_name)
                    .map(|file| (version, file))
            })
    }
}

impl GlobalAssemblyCache for DirectoryGac {
    fn locate(
        &self,
        identity: &AssemblyIdentity,
        target: ProcessorArchitecture,
    ) -> Option<PathBuf> {
        if !identity.is_strong_named() {
            // Only strong names are installable; weak requests never hit.
            return None;
        }
        let mut best: Option<(AssemblyVersion, PathBuf)> = None;
        for (version, file) in self.candidates(identity, target) {
            match identity.version {
                // Strong-named requests with a version need that exact one.
                Some(wanted) if version != wanted => continue,
                Some(_) => return Some(file),
                None => {
                    if best.as_ref().map(|(v, _)| version > *v).unwrap_or(true) {
                        best = Some((version, file));
                    }
                }
            }
        }
        best.map(|(_, file)| file)
    }

    fn contains(&self, identity: &AssemblyIdentity) -> bool {
        if !identity.is_strong_named() {
            return false;
        }
        // Ignore the requested version: "found in the GAC" is a
        // simple-identity question.
        let mut relaxed = identity.clone();
        relaxed.version = None;
        let found = self.candidates(&relaxed, ProcessorArchitecture::None)
            .next()
            .is_some();
        found
    }
}

/// Parse a GAC version directory name:
/// `[vX.Y_]<version>_<culture>_<publicKeyToken>` with an empty culture
/// segment for the invariant culture.
fn parse_gac_dir_name(name: &str) -> Option<(AssemblyVersion, String, String)> {
    let mut parts: Vec<&str> = name.split('_').collect();
    if parts.len() == 4 && parts[0].starts_with('v') {
        parts.remove(0);
    }
    if parts.len() != 3 {
        return None;
    }
    let version: AssemblyVersion = parts[0].parse().ok()?;
    let culture = crate::identity::normalize_culture(parts[1]);
    let token = parts[2].to_ascii_lowercase();
    if token.len() != 16 {
        return None;
    }
    Some((version, culture, token))
}
