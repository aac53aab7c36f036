//! # Candidate Locator
//!
//! Given a requested identity and the configured search-path list, produce
//! the candidate files the resolver should probe, in strict priority order.
//!
//! Search-path entries are processed exactly in the order given. Within one
//! entry the internal ordering is deterministic: directory scans try each
//! allowed extension in extension-list order, registry subtrees are walked
//! in sorted key order, and candidate-file lists keep their input order.
//!
//! The locator never probes metadata itself. It marks candidates that can be
//! rejected without a probe (missing files, GAC misses, raw names that are
//! not files); the resolver probes the rest and attaches fusion-name or
//! architecture rejections as it goes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::cache::ProbeCache;
use crate::error::{Error, Result};
use crate::hosts::{GlobalAssemblyCache, Registry};
use crate::identity::{AssemblyIdentity, AssemblyVersion, ProcessorArchitecture};

/// One entry of the search-path list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPath {
    /// Literal directory to scan for `{name}.{ext}`.
    Directory(PathBuf),
    /// The requester's hint-path attribute.
    HintPath,
    /// The invocation's candidate-files list.
    CandidateAssemblyFiles,
    /// Directories derived from a platform-registry subtree.
    Registry {
        base: String,
        version: String,
        suffix: String,
    },
    /// Legacy registered directories.
    AssemblyFolders,
    /// The shared assembly cache.
    Gac,
    /// Treat the request's name literally as a path.
    RawFileName,
    /// The configured target framework directories.
    TargetFrameworkDirectory,
}

impl FromStr for SearchPath {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        let trimmed = token.trim();
        if !trimmed.starts_with('{') {
            if trimmed.is_empty() {
                return Err(Error::InvalidParameter {
                    name: "search_paths".to_string(),
                    value: "empty entry".to_string(),
                });
            }
            return Ok(SearchPath::Directory(PathBuf::from(trimmed)));
        }
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "{hintpath}" => Ok(SearchPath::HintPath),
            "{candidateassemblyfiles}" => Ok(SearchPath::CandidateAssemblyFiles),
            "{assemblyfolders}" => Ok(SearchPath::AssemblyFolders),
            "{gac}" => Ok(SearchPath::Gac),
            "{rawfilename}" => Ok(SearchPath::RawFileName),
            "{targetframeworkdirectory}" => Ok(SearchPath::TargetFrameworkDirectory),
            _ if lower.starts_with("{registry:") && trimmed.ends_with('}') => {
                let inner = &trimmed["{registry:".len()..trimmed.len() - 1];
                let mut parts = inner.splitn(3, ',');
                let base = parts.next().unwrap_or("").trim().to_string();
                let version = parts.next().unwrap_or("").trim().to_string();
                let suffix = parts.next().unwrap_or("").trim().to_string();
                if base.is_empty() || suffix.is_empty() {
                    return Err(Error::InvalidParameter {
                        name: "search_paths".to_string(),
                        value: token.to_string(),
                    });
                }
                Ok(SearchPath::Registry {
                    base,
                    version,
                    suffix,
                })
            }
            _ => Err(Error::InvalidParameter {
                name: "search_paths".to_string(),
                value: token.to_string(),
            }),
        }
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPath::Directory(dir) => write!(f, "{}", dir.display()),
            SearchPath::HintPath => f.write_str("{HintPath}"),
            SearchPath::CandidateAssemblyFiles => f.write_str("{CandidateAssemblyFiles}"),
            SearchPath::Registry {
                base,
                version,
                suffix,
            } => write!(f, "{{Registry:{base},{version},{suffix}}}"),
            SearchPath::AssemblyFolders => f.write_str("{AssemblyFolders}"),
            SearchPath::Gac => f.write_str("{Gac}"),
            SearchPath::RawFileName => f.write_str("{RawFileName}"),
            SearchPath::TargetFrameworkDirectory => f.write_str("{TargetFrameworkDirectory}"),
        }
    }
}

/// Which kind of search-path entry produced a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocationSource {
    HintPath,
    CandidateFile,
    Directory,
    Registry,
    Gac,
    RawFile,
    FrameworkDir,
}

/// A concrete file the search considered or selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLocation {
    pub path: PathBuf,
    pub source: LocationSource,
    /// Index of the search-path entry that produced this location; used as
    /// the conflict tie-breaker of last resort.
    pub search_path_index: usize,
    /// Last-write-time in nanoseconds since the epoch, filled in when the
    /// location is selected.
    pub modified: Option<i64>,
}

/// Why a considered candidate was not selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectionReason {
    FileNotFound,
    FusionNamesDidNotMatch {
        expected: String,
        found: String,
    },
    TargetHadNoFusionName,
    NotInGac,
    NotAFileNameOnDisk,
    ProcessorArchitectureDoesNotMatch {
        want: ProcessorArchitecture,
        got: ProcessorArchitecture,
    },
    BadImage {
        reason: String,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::FileNotFound => f.write_str("the file does not exist"),
            RejectionReason::FusionNamesDidNotMatch { expected, found } => {
                write!(f, "fusion names did not match (expected '{expected}', found '{found}')")
            }
            RejectionReason::TargetHadNoFusionName => {
                f.write_str("the file has no assembly manifest")
            }
            RejectionReason::NotInGac => f.write_str("the identity is not installed in the GAC"),
            RejectionReason::NotAFileNameOnDisk => {
                f.write_str("the request's name is not a file on disk")
            }
            RejectionReason::ProcessorArchitectureDoesNotMatch { want, got } => {
                write!(f, "processor architecture {got} does not match {want}")
            }
            RejectionReason::BadImage { reason } => write!(f, "not a valid assembly: {reason}"),
        }
    }
}

/// A candidate produced by the locator. `rejection` is pre-set when the
/// candidate can be dismissed without probing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub location: FileLocation,
    pub rejection: Option<RejectionReason>,
}

/// Per-request inputs to the search beyond the identity itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOverrides<'a> {
    pub hint_path: Option<&'a Path>,
    /// When set, only this extension is considered for directory scans.
    pub executable_extension: Option<&'a str>,
}

/// Enumerates candidates for requested identities.
pub struct CandidateLocator<'a> {
    search_paths: &'a [SearchPath],
    extensions: &'a [String],
    framework_dirs: &'a [PathBuf],
    candidate_files: &'a [PathBuf],
    target_architecture: ProcessorArchitecture,
    registry: &'a dyn Registry,
    gac: &'a dyn GlobalAssemblyCache,
    cache: &'a ProbeCache,
}

impl<'a> CandidateLocator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search_paths: &'a [SearchPath],
        extensions: &'a [String],
        framework_dirs: &'a [PathBuf],
        candidate_files: &'a [PathBuf],
        target_architecture: ProcessorArchitecture,
        registry: &'a dyn Registry,
        gac: &'a dyn GlobalAssemblyCache,
        cache: &'a ProbeCache,
    ) -> Self {
        Self {
            search_paths,
            extensions,
            framework_dirs,
            candidate_files,
            target_architecture,
            registry,
            gac,
            cache,
        }
    }

    /// All candidates for `identity`, in search order.
    pub fn enumerate(
        &self,
        identity: &AssemblyIdentity,
        overrides: RequestOverrides<'_>,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (index, entry) in self.search_paths.iter().enumerate() {
            match entry {
                SearchPath::Directory(dir) => {
                    self.scan_directory(
                        dir,
                        identity,
                        overrides,
                        LocationSource::Directory,
                        index,
                        &mut candidates,
                    );
                }
                SearchPath::HintPath => {
                    if let Some(hint) = overrides.hint_path {
                        self.push_file(
                            hint.to_path_buf(),
                            LocationSource::HintPath,
                            index,
                            &mut candidates,
                        );
                    }
                }
                SearchPath::CandidateAssemblyFiles => {
                    for file in self.candidate_files {
                        if self.file_matches_request(file, identity, overrides) {
                            self.push_file(
                                file.clone(),
                                LocationSource::CandidateFile,
                                index,
                                &mut candidates,
                            );
                        }
                    }
                }
                SearchPath::Registry {
                    base,
                    version,
                    suffix,
                } => {
                    for dir in registry_directories(self.registry, base, version, suffix) {
                        self.scan_directory(
                            &dir,
                            identity,
                            overrides,
                            LocationSource::Registry,
                            index,
                            &mut candidates,
                        );
                    }
                }
                SearchPath::AssemblyFolders => {
                    for dir in assembly_folders(self.registry) {
                        self.scan_directory(
                            &dir,
                            identity,
                            overrides,
                            LocationSource::Registry,
                            index,
                            &mut candidates,
                        );
                    }
                }
                SearchPath::Gac => {
                    match self.gac.locate(identity, self.target_architecture) {
                        Some(path) => candidates.push(Candidate {
                            location: FileLocation {
                                path,
                                source: LocationSource::Gac,
                                search_path_index: index,
                                modified: None,
                            },
                            rejection: None,
                        }),
                        None => candidates.push(Candidate {
                            location: FileLocation {
                                path: PathBuf::from(identity.to_string()),
                                source: LocationSource::Gac,
                                search_path_index: index,
                                modified: None,
                            },
                            rejection: Some(RejectionReason::NotInGac),
                        }),
                    }
                }
                SearchPath::RawFileName => {
                    let path = PathBuf::from(&identity.simple_name);
                    let rejection = if self.cache.file_exists(&path) {
                        None
                    } else {
                        Some(RejectionReason::NotAFileNameOnDisk)
                    };
                    candidates.push(Candidate {
                        location: FileLocation {
                            path,
                            source: LocationSource::RawFile,
                            search_path_index: index,
                            modified: None,
                        },
                        rejection,
                    });
                }
                SearchPath::TargetFrameworkDirectory => {
                    for dir in self.framework_dirs {
                        self.scan_directory(
                            dir,
                            identity,
                            overrides,
                            LocationSource::FrameworkDir,
                            index,
                            &mut candidates,
                        );
                    }
                }
            }
        }
        candidates
    }

    fn extensions_for(&self, overrides: RequestOverrides<'_>) -> Vec<String> {
        match overrides.executable_extension {
            Some(ext) => vec![ext.to_string()],
            None => self.extensions.to_vec(),
        }
    }

    fn scan_directory(
        &self,
        dir: &Path,
        identity: &AssemblyIdentity,
        overrides: RequestOverrides<'_>,
        source: LocationSource,
        index: usize,
        out: &mut Vec<Candidate>,
    ) {
        for ext in self.extensions_for(overrides) {
            let path = dir.join(format!("{}{}", identity.simple_name, ext));
            let rejection = if self.cache.file_exists(&path) {
                None
            } else {
                Some(RejectionReason::FileNotFound)
            };
            out.push(Candidate {
                location: FileLocation {
                    path,
                    source,
                    search_path_index: index,
                    modified: None,
                },
                rejection,
            });
        }
    }

    fn push_file(
        &self,
        path: PathBuf,
        source: LocationSource,
        index: usize,
        out: &mut Vec<Candidate>,
    ) {
        let rejection = if self.cache.file_exists(&path) {
            None
        } else {
            Some(RejectionReason::FileNotFound)
        };
        out.push(Candidate {
            location: FileLocation {
                path,
                source,
                search_path_index: index,
                modified: None,
            },
            rejection,
        });
    }

    fn file_matches_request(
        &self,
        file: &Path,
        identity: &AssemblyIdentity,
        overrides: RequestOverrides<'_>,
    ) -> bool {
        let stem_matches = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().eq_ignore_ascii_case(&identity.simple_name))
            .unwrap_or(false);
        if !stem_matches {
            return false;
        }
        let ext = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();
        self.extensions_for(overrides)
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
    }
}

/// Walk `base`'s version subkeys (at or below `version`, highest first),
/// then the `suffix` key under each; every subkey's default value names a
/// directory. Registry failures yield zero directories.
fn registry_directories(
    registry: &dyn Registry,
    base: &str,
    version: &str,
    suffix: &str,
) -> Vec<PathBuf> {
    let ceiling: Option<AssemblyVersion> = version.trim().trim_start_matches('v').parse().ok();
    let mut versions: Vec<(AssemblyVersion, String)> = registry
        .subkey_names(base)
        .into_iter()
        .filter_map(|name| {
            let parsed: AssemblyVersion = name.trim_start_matches('v').parse().ok()?;
            Some((parsed, name))
        })
        .filter(|(parsed, _)| ceiling.map(|c| *parsed <= c).unwrap_or(true))
        .collect();
    versions.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let mut dirs = Vec::new();
    for (_, version_key) in versions {
        let folders_key = format!("{base}\\{version_key}\\{suffix}");
        let mut vendor_keys = registry.subkey_names(&folders_key);
        vendor_keys.sort_by(|a, b| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));
        for vendor in vendor_keys {
            if let Some(dir) = registry.default_value(&format!("{folders_key}\\{vendor}")) {
                dirs.push(PathBuf::from(dir));
            }
        }
    }
    dirs
}

const ASSEMBLY_FOLDERS_KEY: &str =
    "HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\.NETFramework\\AssemblyFolders";

/// Legacy registered directories: each subkey's default value is a
/// directory.
fn assembly_folders(registry: &dyn Registry) -> Vec<PathBuf> {
    let mut names = registry.subkey_names(ASSEMBLY_FOLDERS_KEY);
    names.sort_by(|a, b| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));
    names
        .into_iter()
        .filter_map(|name| registry.default_value(&format!("{ASSEMBLY_FOLDERS_KEY}\\{name}")))
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::{DirectoryGac, EmptyRegistry};
    use crate::metadata::{MetadataProbe, ProbeResult};
    use std::collections::HashMap;

    struct NeverProbe;

    impl MetadataProbe for NeverProbe {
        fn probe(&self, path: &Path) -> Result<ProbeResult> {
            panic!("locator tests must not probe: {}", path.display());
        }
    }

    fn cache() -> ProbeCache {
        ProbeCache::new(Box::new(NeverProbe))
    }

    fn exts() -> Vec<String> {
        vec![".winmd".to_string(), ".dll".to_string(), ".exe".to_string()]
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(
            "{HintPath}".parse::<SearchPath>().unwrap(),
            SearchPath::HintPath
        );
        assert_eq!("{GAC}".parse::<SearchPath>().unwrap(), SearchPath::Gac);
        assert_eq!(
            "/usr/lib/project".parse::<SearchPath>().unwrap(),
            SearchPath::Directory(PathBuf::from("/usr/lib/project"))
        );
        let registry = "{Registry:SOFTWARE\\Vendor\\.NETFramework,v4.0,AssemblyFoldersEx}"
            .parse::<SearchPath>()
            .unwrap();
        assert_eq!(
            registry,
            SearchPath::Registry {
                base: "SOFTWARE\\Vendor\\.NETFramework".to_string(),
                version: "v4.0".to_string(),
                suffix: "AssemblyFoldersEx".to_string(),
            }
        );
        assert!("{Bogus}".parse::<SearchPath>().is_err());
        assert!("".parse::<SearchPath>().is_err());
    }

    #[test]
    fn test_directory_scan_orders_extensions() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("Foo.dll"), b"x").unwrap();
        let search = vec![SearchPath::Directory(temp.path().to_path_buf())];
        let extensions = exts();
        let cache = cache();
        let gac = DirectoryGac::default();
        let locator = CandidateLocator::new(
            &search,
            &extensions,
            &[],
            &[],
            ProcessorArchitecture::None,
            &EmptyRegistry,
            &gac,
            &cache,
        );
        let candidates =
            locator.enumerate(&AssemblyIdentity::named("Foo"), RequestOverrides::default());
        assert_eq!(candidates.len(), 3);
        // .winmd first (missing), then .dll (present), then .exe (missing).
        assert_eq!(
            candidates[0].rejection,
            Some(RejectionReason::FileNotFound)
        );
        assert!(candidates[1].rejection.is_none());
        assert!(candidates[1].location.path.ends_with("Foo.dll"));
        assert_eq!(candidates[1].location.source, LocationSource::Directory);
    }

    #[test]
    fn test_hint_path_only_when_present() {
        let temp = tempfile::tempdir().unwrap();
        let hint = temp.path().join("Lib.dll");
        std::fs::write(&hint, b"x").unwrap();
        let search = vec![SearchPath::HintPath];
        let extensions = exts();
        let cache = cache();
        let gac = DirectoryGac::default();
        let locator = CandidateLocator::new(
            &search,
            &extensions,
            &[],
            &[],
            ProcessorArchitecture::None,
            &EmptyRegistry,
            &gac,
            &cache,
        );
        let identity = AssemblyIdentity::named("Lib");
        assert!(locator
            .enumerate(&identity, RequestOverrides::default())
            .is_empty());
        let with_hint = locator.enumerate(
            &identity,
            RequestOverrides {
                hint_path: Some(&hint),
                ..Default::default()
            },
        );
        assert_eq!(with_hint.len(), 1);
        assert_eq!(with_hint[0].location.source, LocationSource::HintPath);
        assert!(with_hint[0].rejection.is_none());
    }

    #[test]
    fn test_gac_miss_records_rejection() {
        let search = vec![SearchPath::Gac];
        let extensions = exts();
        let cache = cache();
        let gac = DirectoryGac::default();
        let locator = CandidateLocator::new(
            &search,
            &extensions,
            &[],
            &[],
            ProcessorArchitecture::None,
            &EmptyRegistry,
            &gac,
            &cache,
        );
        let identity: AssemblyIdentity =
            "Lib, Version=1.0.0.0, PublicKeyToken=b77a5c561934e089".parse().unwrap();
        let candidates = locator.enumerate(&identity, RequestOverrides::default());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rejection, Some(RejectionReason::NotInGac));
    }

    #[test]
    fn test_raw_file_name() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("Literal.dll");
        std::fs::write(&file, b"x").unwrap();
        let search = vec![SearchPath::RawFileName];
        let extensions = exts();
        let cache = cache();
        let gac = DirectoryGac::default();
        let locator = CandidateLocator::new(
            &search,
            &extensions,
            &[],
            &[],
            ProcessorArchitecture::None,
            &EmptyRegistry,
            &gac,
            &cache,
        );
        let found = locator.enumerate(
            &AssemblyIdentity::named(file.to_string_lossy().to_string()),
            RequestOverrides::default(),
        );
        assert_eq!(found.len(), 1);
        assert!(found[0].rejection.is_none());

        let missing = locator.enumerate(
            &AssemblyIdentity::named("/no/such/file.dll"),
            RequestOverrides::default(),
        );
        assert_eq!(
            missing[0].rejection,
            Some(RejectionReason::NotAFileNameOnDisk)
        );
    }

    #[test]
    fn test_candidate_files_filtered_by_name_and_extension() {
        let temp = tempfile::tempdir().unwrap();
        let matching = temp.path().join("Lib.dll");
        let wrong_name = temp.path().join("Other.dll");
        let wrong_ext = temp.path().join("Lib.txt");
        for p in [&matching, &wrong_name, &wrong_ext] {
            std::fs::write(p, b"x").unwrap();
        }
        let files = vec![matching.clone(), wrong_name, wrong_ext];
        let search = vec![SearchPath::CandidateAssemblyFiles];
        let extensions = exts();
        let cache = cache();
        let gac = DirectoryGac::default();
        let locator = CandidateLocator::new(
            &search,
            &extensions,
            &[],
            &files,
            ProcessorArchitecture::None,
            &EmptyRegistry,
            &gac,
            &cache,
        );
        let candidates =
            locator.enumerate(&AssemblyIdentity::named("Lib"), RequestOverrides::default());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].location.path, matching);
        assert_eq!(candidates[0].location.source, LocationSource::CandidateFile);
    }

    #[test]
    fn test_executable_extension_restricts_scan() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("App.dll"), b"x").unwrap();
        std::fs::write(temp.path().join("App.exe"), b"x").unwrap();
        let search = vec![SearchPath::Directory(temp.path().to_path_buf())];
        let extensions = exts();
        let cache = cache();
        let gac = DirectoryGac::default();
        let locator = CandidateLocator::new(
            &search,
            &extensions,
            &[],
            &[],
            ProcessorArchitecture::None,
            &EmptyRegistry,
            &gac,
            &cache,
        );
        let candidates = locator.enumerate(
            &AssemblyIdentity::named("App"),
            RequestOverrides {
                executable_extension: Some(".exe"),
                ..Default::default()
            },
        );
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].location.path.ends_with("App.exe"));
    }

    /// In-memory registry fake mirroring the AssemblyFoldersEx layout.
    struct MapRegistry {
        subkeys: HashMap<String, Vec<String>>,
        defaults: HashMap<String, String>,
    }

    impl Registry for MapRegistry {
        fn subkey_names(&self, path: &str) -> Vec<String> {
            self.subkeys.get(path).cloned().unwrap_or_default()
        }

        fn default_value(&self, path: &str) -> Option<String> {
            self.defaults.get(path).cloned()
        }

        fn open(&self, path: &str) -> bool {
            self.subkeys.contains_key(path) || self.defaults.contains_key(path)
        }
    }

    #[test]
    fn test_registry_directories_walks_versions_descending() {
        let base = "SOFTWARE\\Vendor\\.NETFramework";
        let mut subkeys = HashMap::new();
        subkeys.insert(
            base.to_string(),
            vec!["v3.5".to_string(), "v4.0".to_string(), "junk".to_string()],
        );
        subkeys.insert(
            format!("{base}\\v4.0\\AssemblyFoldersEx"),
            vec!["VendorLib".to_string()],
        );
        subkeys.insert(
            format!("{base}\\v3.5\\AssemblyFoldersEx"),
            vec!["OldLib".to_string()],
        );
        let mut defaults = HashMap::new();
        defaults.insert(
            format!("{base}\\v4.0\\AssemblyFoldersEx\\VendorLib"),
            "/opt/vendor/4.0".to_string(),
        );
        defaults.insert(
            format!("{base}\\v3.5\\AssemblyFoldersEx\\OldLib"),
            "/opt/vendor/3.5".to_string(),
        );
        let registry = MapRegistry { subkeys, defaults };
        let dirs = registry_directories(&registry, base, "v4.0", "AssemblyFoldersEx");
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/opt/vendor/4.0"),
                PathBuf::from("/opt/vendor/3.5")
            ]
        );

        // A lower ceiling filters newer versions out.
        let dirs = registry_directories(&registry, base, "v3.5", "AssemblyFoldersEx");
        assert_eq!(dirs, vec![PathBuf::from("/opt/vendor/3.5")]);
    }
}
