//! # Resolver Configuration
//!
//! This module defines the strongly-typed configuration aggregate the
//! resolver consumes, and the YAML inputs-file binding the CLI reads it
//! from.
//!
//! ## Inputs file
//!
//! A `refsolve.yaml` file is a flat mapping: `primaries` lists the root
//! references (fusion-name strings, or detailed entries with per-item
//! metadata), `files` lists roots with known locations, and every other
//! resolver option appears under its snake_case name:
//!
//! ```yaml
//! primaries:
//!   - "MyApp.Core, Version=1.0.0.0, PublicKeyToken=b77a5c561934e089"
//!   - name: ThirdParty.Widgets
//!     hint_path: packages/widgets/ThirdParty.Widgets.dll
//!     private: true
//! search_paths:
//!   - "{HintPath}"
//!   - bin/libs
//!   - "{Gac}"
//! auto_unify: true
//! ```
//!
//! Unknown keys are rejected so typos fail loudly. Relative paths resolve
//! against the inputs file's directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::defaults;
use crate::error::{Error, Result};
use crate::identity::{AssemblyIdentity, AssemblyVersion, ProcessorArchitecture};
use crate::locator::SearchPath;

/// One root reference requested by the project.
#[derive(Debug, Clone)]
pub struct PrimaryAssembly {
    pub identity: AssemblyIdentity,
    pub hint_path: Option<PathBuf>,
    /// Explicit copy-local override.
    pub private: Option<bool>,
    /// Force strict identity matching even for weak names; `None` means
    /// "strict exactly when the request is strong-named".
    pub specific_version: Option<bool>,
    pub embed_interop_types: bool,
    pub executable_extension: Option<String>,
    pub sub_type: Option<String>,
    /// Resolved by an outer package manager; dependency enumeration is
    /// skipped unless `find_dependencies_of_externally_resolved` is set.
    pub externally_resolved: bool,
}

impl PrimaryAssembly {
    pub fn new(identity: AssemblyIdentity) -> Self {
        Self {
            identity,
            hint_path: None,
            private: None,
            specific_version: None,
            embed_interop_types: false,
            executable_extension: None,
            sub_type: None,
            externally_resolved: false,
        }
    }
}

/// Severity of an architecture mismatch between a resolved file and the
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchMismatchSeverity {
    None,
    #[default]
    Warning,
    Error,
}

/// The full configuration of one resolver invocation.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub primary_assemblies: Vec<PrimaryAssembly>,
    /// Roots with known locations; probed directly, no search.
    pub primary_files: Vec<PathBuf>,
    pub search_paths: Vec<SearchPath>,
    pub allowed_assembly_extensions: Vec<String>,
    pub allowed_related_file_extensions: Vec<String>,
    /// Files offered to `{CandidateAssemblyFiles}`.
    pub candidate_assembly_files: Vec<PathBuf>,
    pub target_framework_dirs: Vec<PathBuf>,
    pub installed_assembly_tables: Vec<PathBuf>,
    pub installed_assembly_subset_tables: Vec<PathBuf>,
    pub full_framework_tables: Vec<PathBuf>,
    pub full_framework_dirs: Vec<PathBuf>,
    pub ignore_default_installed_assembly_tables: bool,
    pub target_framework_version: Option<String>,
    pub target_framework_moniker: Option<String>,
    pub targeted_runtime_version: String,
    pub target_processor_architecture: ProcessorArchitecture,
    pub auto_unify: bool,
    pub copy_local_dependencies_when_parent_in_gac: bool,
    pub do_not_copy_local_if_in_gac: bool,
    /// Source of explicit binding redirects.
    pub config_file: Option<PathBuf>,
    /// Probe-cache persistence; `None` disables it.
    pub state_file: Option<PathBuf>,
    /// Roots scanned by the directory-layout GAC backend.
    pub gac_roots: Vec<PathBuf>,
    /// When false the closure stops after primaries, and auto-unify is
    /// short-circuited: unification needs a closure to act on.
    pub find_dependencies: bool,
    pub find_dependencies_of_externally_resolved: bool,
    pub find_satellites: bool,
    pub find_serialization_assemblies: bool,
    pub find_related_files: bool,
    pub warn_or_error_on_arch_mismatch: ArchMismatchSeverity,
    /// Subset names that stand for the whole framework.
    pub full_subset_names: Vec<String>,
    pub silent: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            primary_assemblies: Vec::new(),
            primary_files: Vec::new(),
            search_paths: defaults::default_search_paths(),
            allowed_assembly_extensions: defaults::DEFAULT_ASSEMBLY_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_related_file_extensions: defaults::DEFAULT_RELATED_FILE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            candidate_assembly_files: Vec::new(),
            target_framework_dirs: Vec::new(),
            installed_assembly_tables: Vec::new(),
            installed_assembly_subset_tables: Vec::new(),
            full_framework_tables: Vec::new(),
            full_framework_dirs: Vec::new(),
            ignore_default_installed_assembly_tables: false,
            target_framework_version: None,
            target_framework_moniker: None,
            targeted_runtime_version: defaults::DEFAULT_TARGETED_RUNTIME_VERSION.to_string(),
            target_processor_architecture: ProcessorArchitecture::None,
            auto_unify: false,
            copy_local_dependencies_when_parent_in_gac: false,
            do_not_copy_local_if_in_gac: false,
            config_file: None,
            state_file: None,
            gac_roots: Vec::new(),
            find_dependencies: true,
            find_dependencies_of_externally_resolved: false,
            find_satellites: true,
            find_serialization_assemblies: true,
            find_related_files: true,
            warn_or_error_on_arch_mismatch: ArchMismatchSeverity::Warning,
            full_subset_names: crate::redist::DEFAULT_FULL_SUBSET_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            silent: false,
        }
    }
}

impl ResolverConfig {
    /// Validate the aggregate. Fails with [`Error::InvalidParameter`],
    /// which aborts the invocation.
    pub fn validate(&self) -> Result<()> {
        for ext in self
            .allowed_assembly_extensions
            .iter()
            .chain(&self.allowed_related_file_extensions)
        {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(Error::InvalidParameter {
                    name: "allowed_extensions".to_string(),
                    value: ext.clone(),
                });
            }
        }
        let runtime = self.targeted_runtime_version.trim_start_matches('v');
        if runtime.parse::<AssemblyVersion>().is_err() {
            return Err(Error::InvalidParameter {
                name: "targeted_runtime_version".to_string(),
                value: self.targeted_runtime_version.clone(),
            });
        }
        if let Some(state_file) = &self.state_file {
            if state_file.is_dir() {
                return Err(Error::InvalidParameter {
                    name: "state_file".to_string(),
                    value: format!("{} is a directory", state_file.display()),
                });
            }
        }
        if let Some(version) = &self.target_framework_version {
            if version.trim_start_matches('v').parse::<AssemblyVersion>().is_err() {
                return Err(Error::InvalidParameter {
                    name: "target_framework_version".to_string(),
                    value: version.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A primary entry in the inputs file: a bare fusion name or a detailed
/// mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PrimaryInput {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        hint_path: Option<PathBuf>,
        #[serde(default)]
        private: Option<bool>,
        #[serde(default)]
        specific_version: Option<bool>,
        #[serde(default)]
        embed_interop_types: bool,
        #[serde(default)]
        executable_extension: Option<String>,
        #[serde(default)]
        sub_type: Option<String>,
        #[serde(default)]
        externally_resolved: bool,
    },
}

/// Serde shape of the inputs file; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputsFile {
    #[serde(default)]
    primaries: Vec<PrimaryInput>,
    #[serde(default)]
    files: Vec<PathBuf>,
    #[serde(default)]
    search_paths: Option<Vec<String>>,
    #[serde(default)]
    allowed_assembly_extensions: Option<Vec<String>>,
    #[serde(default)]
    allowed_related_file_extensions: Option<Vec<String>>,
    #[serde(default)]
    candidate_assembly_files: Vec<PathBuf>,
    #[serde(default)]
    target_framework_dirs: Vec<PathBuf>,
    #[serde(default)]
    installed_assembly_tables: Vec<PathBuf>,
    #[serde(default)]
    installed_assembly_subset_tables: Vec<PathBuf>,
    #[serde(default)]
    full_framework_tables: Vec<PathBuf>,
    #[serde(default)]
    full_framework_dirs: Vec<PathBuf>,
    #[serde(default)]
    ignore_default_installed_assembly_tables: bool,
    #[serde(default)]
    target_framework_version: Option<String>,
    #[serde(default)]
    target_framework_moniker: Option<String>,
    #[serde(default)]
    targeted_runtime_version: Option<String>,
    #[serde(default)]
    target_processor_architecture: Option<String>,
    #[serde(default)]
    auto_unify: bool,
    #[serde(default)]
    copy_local_dependencies_when_parent_in_gac: bool,
    #[serde(default)]
    do_not_copy_local_if_in_gac: bool,
    #[serde(default)]
    config_file: Option<PathBuf>,
    #[serde(default)]
    state_file: Option<PathBuf>,
    #[serde(default)]
    gac_roots: Vec<PathBuf>,
    #[serde(default)]
    find_dependencies: Option<bool>,
    #[serde(default)]
    find_dependencies_of_externally_resolved: bool,
    #[serde(default)]
    find_satellites: Option<bool>,
    #[serde(default)]
    find_serialization_assemblies: Option<bool>,
    #[serde(default)]
    find_related_files: Option<bool>,
    #[serde(default)]
    warn_or_error_on_arch_mismatch: Option<ArchMismatchSeverity>,
    #[serde(default)]
    full_subset_names: Option<Vec<String>>,
    #[serde(default)]
    silent: bool,
}

/// Parse an inputs file into a validated [`ResolverConfig`].
pub fn from_file(path: &Path) -> Result<ResolverConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Inputs {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let inputs: InputsFile = serde_yaml::from_str(&text).map_err(|e| Error::Inputs {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let config = bind(inputs, base)?;
    config.validate()?;
    Ok(config)
}

fn bind(inputs: InputsFile, base: &Path) -> Result<ResolverConfig> {
    let mut config = ResolverConfig::default();

    for primary in inputs.primaries {
        config.primary_assemblies.push(match primary {
            PrimaryInput::Name(text) => PrimaryAssembly::new(text.parse()?),
            PrimaryInput::Detailed {
                name,
                hint_path,
                private,
                specific_version,
                embed_interop_types,
                executable_extension,
                sub_type,
                externally_resolved,
            } => PrimaryAssembly {
                identity: name.parse()?,
                hint_path: hint_path.map(|p| absolutize(base, p)),
                private,
                specific_version,
                embed_interop_types,
                executable_extension,
                sub_type,
                externally_resolved,
            },
        });
    }
    config.primary_files = absolutize_all(base, inputs.files);

    if let Some(tokens) = inputs.search_paths {
        config.search_paths = tokens
            .iter()
            .map(|token| {
                let parsed: SearchPath = token.parse()?;
                Ok(match parsed {
                    SearchPath::Directory(dir) => SearchPath::Directory(absolutize(base, dir)),
                    other => other,
                })
            })
            .collect::<Result<_>>()?;
    }
    if let Some(extensions) = inputs.allowed_assembly_extensions {
        config.allowed_assembly_extensions = extensions;
    }
    if let Some(extensions) = inputs.allowed_related_file_extensions {
        config.allowed_related_file_extensions = extensions;
    }
    config.candidate_assembly_files = absolutize_all(base, inputs.candidate_assembly_files);
    config.target_framework_dirs = absolutize_all(base, inputs.target_framework_dirs);
    config.installed_assembly_tables = absolutize_all(base, inputs.installed_assembly_tables);
    config.installed_assembly_subset_tables =
        absolutize_all(base, inputs.installed_assembly_subset_tables);
    config.full_framework_tables = absolutize_all(base, inputs.full_framework_tables);
    config.full_framework_dirs = absolutize_all(base, inputs.full_framework_dirs);
    config.ignore_default_installed_assembly_tables =
        inputs.ignore_default_installed_assembly_tables;
    config.target_framework_version = inputs.target_framework_version;
    config.target_framework_moniker = inputs.target_framework_moniker;
    if let Some(runtime) = inputs.targeted_runtime_version {
        config.targeted_runtime_version = runtime;
    }
    if let Some(arch) = inputs.target_processor_architecture {
        config.target_processor_architecture = arch.parse()?;
    }
    config.auto_unify = inputs.auto_unify;
    config.copy_local_dependencies_when_parent_in_gac =
        inputs.copy_local_dependencies_when_parent_in_gac;
    config.do_not_copy_local_if_in_gac = inputs.do_not_copy_local_if_in_gac;
    config.config_file = inputs.config_file.map(|p| absolutize(base, p));
    config.state_file = inputs.state_file.map(|p| absolutize(base, p));
    config.gac_roots = absolutize_all(base, inputs.gac_roots);
    config.find_dependencies = inputs.find_dependencies.unwrap_or(true);
    config.find_dependencies_of_externally_resolved =
        inputs.find_dependencies_of_externally_resolved;
    config.find_satellites = inputs.find_satellites.unwrap_or(true);
    config.find_serialization_assemblies =
        inputs.find_serialization_assemblies.unwrap_or(true);
    config.find_related_files = inputs.find_related_files.unwrap_or(true);
    if let Some(severity) = inputs.warn_or_error_on_arch_mismatch {
        config.warn_or_error_on_arch_mismatch = severity;
    }
    if let Some(names) = inputs.full_subset_names {
        config.full_subset_names = names;
    }
    config.silent = inputs.silent;
    Ok(config)
}

fn absolutize(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn absolutize_all(base: &Path, paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.into_iter().map(|p| absolutize(base, p)).collect()
}
