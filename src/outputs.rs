//! # Output Classification
//!
//! The last phase of an invocation: decide copy-local for every reference,
//! gather the files that travel with each chosen assembly (related files,
//! satellites, serialization assemblies, scatter files), and assemble the
//! ordered output tables handed back to the caller.
//!
//! Copy-local is a first-match-wins rule chain; the resulting
//! [`CopyLocalState`] names the rule that fired so the decision log can
//! explain the outcome.

use std::path::PathBuf;

use serde::Serialize;

use crate::cache::ProbeCache;
use crate::config::ResolverConfig;
use crate::locator::LocationSource;
use crate::redirect::BindingRedirect;
use crate::reference::{
    ConflictLossReason, ConflictState, CopyLocalState, Reference, ReferenceId, ReferenceTable,
};

/// One row of the resolved-file tables.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub fusion_name: String,
    pub copy_local: CopyLocalState,
    pub is_winmd: bool,
    pub runtime_version: Option<String>,
    pub redist_name: Option<String>,
    /// Primary item names that pulled this file in.
    pub source_items: Vec<String>,
}

/// A suggested binding redirect in output form.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestedRedirect {
    pub identity: String,
    pub max_version: String,
}

/// The ordered output tables of one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionOutputs {
    pub resolved_files: Vec<ResolvedFile>,
    pub resolved_dependency_files: Vec<ResolvedFile>,
    pub related_files: Vec<PathBuf>,
    pub satellite_files: Vec<PathBuf>,
    pub serialization_assembly_files: Vec<PathBuf>,
    pub scatter_files: Vec<PathBuf>,
    pub copy_local_files: Vec<PathBuf>,
    pub suggested_redirects: Vec<SuggestedRedirect>,
    pub depends_on_system_runtime: bool,
    pub depends_on_netstandard: bool,
    pub files_written: Vec<PathBuf>,
}

/// Classify every reference and build the output tables.
pub fn classify(
    table: &mut ReferenceTable,
    config: &ResolverConfig,
    cache: &ProbeCache,
    suggested: &[BindingRedirect],
) -> ResolutionOutputs {
    let ids = table.ids_primaries_first();

    for &id in &ids {
        let state = copy_local_state(table, id, config);
        let Some(reference) = table.get_mut(id) else {
            continue;
        };
        reference.copy_local = state;
    }

    for &id in &ids {
        let companions = table
            .get(id)
            .filter(|r| r.is_resolved())
            .map(|r| find_companions(r, config, cache));
        if let (Some(companions), Some(reference)) = (companions, table.get_mut(id)) {
            reference.related_files = companions.related;
            reference.satellite_files = companions.satellites;
            reference.serialization_assembly = companions.serialization;
        }
    }

    let mut outputs = ResolutionOutputs {
        depends_on_system_runtime: table.depends_on("System.Runtime"),
        depends_on_netstandard: table.depends_on("netstandard"),
        suggested_redirects: suggested
            .iter()
            .map(|r| SuggestedRedirect {
                identity: r.identity.to_string(),
                max_version: r.new_version.to_string(),
            })
            .collect(),
        ..Default::default()
    };

    for &id in &ids {
        let Some(reference) = table.get(id) else {
            continue;
        };
        if !reference.is_resolved() || !emits_output(reference) {
            continue;
        }
        let Some(location) = reference.resolved_location.as_ref() else {
            continue;
        };
        let row = ResolvedFile {
            path: location.path.clone(),
            fusion_name: reference
                .resolved_identity
                .as_ref()
                .unwrap_or(&reference.effective_identity)
                .to_string(),
            copy_local: reference.copy_local,
            is_winmd: reference.is_winmd,
            runtime_version: reference.runtime_version.clone(),
            redist_name: reference.redist_name.clone(),
            source_items: reference.source_items.iter().cloned().collect(),
        };
        if reference.is_primary {
            outputs.resolved_files.push(row);
        } else {
            outputs.resolved_dependency_files.push(row);
        }

        outputs.related_files.extend(reference.related_files.clone());
        outputs
            .satellite_files
            .extend(reference.satellite_files.clone());
        outputs
            .serialization_assembly_files
            .extend(reference.serialization_assembly.clone());
        outputs.scatter_files.extend(reference.scatter_files.clone());

        if reference.copy_local.is_copy_local() {
            outputs.copy_local_files.push(location.path.clone());
            outputs.copy_local_files.extend(reference.related_files.clone());
            outputs
                .copy_local_files
                .extend(reference.satellite_files.clone());
            outputs
                .copy_local_files
                .extend(reference.serialization_assembly.clone());
            outputs.copy_local_files.extend(reference.scatter_files.clone());
        }
    }

    outputs
}

/// Victims lose their outputs, except both sides of an insoluble conflict.
fn emits_output(reference: &Reference) -> bool {
    match reference.conflict_state {
        ConflictState::Victim { reason, .. } => {
            reason == ConflictLossReason::InsolubleConflict
        }
        _ => true,
    }
}

/// The copy-local rule chain, first match wins.
fn copy_local_state(
    table: &ReferenceTable,
    id: ReferenceId,
    config: &ResolverConfig,
) -> CopyLocalState {
    let Some(reference) = table.get(id) else {
        return CopyLocalState::Undecided;
    };

    // 1. An explicit Private setting on the requester decides outright.
    if let Some(private) = reference.private_setting {
        return if private {
            CopyLocalState::YesPrivate
        } else {
            CopyLocalState::NoPrivate
        };
    }
    // 2. Unresolved references are never copied.
    if !reference.is_resolved() {
        return CopyLocalState::No;
    }
    // 3. Framework prerequisites ship with the machine.
    if reference.is_prerequisite {
        return CopyLocalState::NoPrerequisite;
    }
    // 4. Embedded interop types need no file at runtime.
    if reference.embed_interop_types {
        return CopyLocalState::NoEmbedded;
    }
    // 5. Conflict victims yield to the victor's file.
    if let ConflictState::Victim { reason, .. } = reference.conflict_state {
        if reason != ConflictLossReason::InsolubleConflict {
            return CopyLocalState::NoConflictVictim;
        }
    }
    // 6. Files resolved out of the GAC load from the GAC.
    if reference
        .resolved_location
        .as_ref()
        .map(|l| l.source == LocationSource::Gac)
        .unwrap_or(false)
    {
        return CopyLocalState::NoResolvedFromGac;
    }
    // 7. Present in the GAC, and the configuration trusts the GAC.
    if reference.found_in_gac && config.do_not_copy_local_if_in_gac {
        return CopyLocalState::NoFoundInGac;
    }
    // 8. Every parent loads from the GAC, so nothing will probe beside the
    //    output.
    if !config.copy_local_dependencies_when_parent_in_gac
        && !reference.is_primary
        && !reference.dependees.is_empty()
        && reference.dependees.iter().all(|d| {
            table
                .get(d.id)
                .map(parent_in_gac)
                .unwrap_or(false)
        })
    {
        return CopyLocalState::NoParentsInGac;
    }
    // 9. Framework files are part of the target, not the application.
    if reference.is_framework_file {
        return CopyLocalState::NoFrameworkFile;
    }
    // 10. Everything else copies.
    CopyLocalState::YesHeuristic
}

fn parent_in_gac(parent: &Reference) -> bool {
    parent.found_in_gac
        || parent
            .resolved_location
            .as_ref()
            .map(|l| l.source == LocationSource::Gac)
            .unwrap_or(false)
}

struct Companions {
    related: Vec<PathBuf>,
    satellites: Vec<PathBuf>,
    serialization: Option<PathBuf>,
}

/// Files that travel with a resolved assembly.
fn find_companions(
    reference: &Reference,
    config: &ResolverConfig,
    cache: &ProbeCache,
) -> Companions {
    let mut companions = Companions {
        related: Vec::new(),
        satellites: Vec::new(),
        serialization: None,
    };
    let Some(location) = reference.resolved_location.as_ref() else {
        return companions;
    };
    let Some(dir) = location.path.parent() else {
        return companions;
    };
    let Some(stem) = location.path.file_stem().map(|s| s.to_string_lossy().into_owned())
    else {
        return companions;
    };

    if config.find_related_files {
        for ext in &config.allowed_related_file_extensions {
            let candidate = dir.join(format!("{stem}{ext}"));
            if cache.file_exists(&candidate) {
                companions.related.push(candidate);
            }
        }
    }

    if config.find_satellites {
        // Culture-named subdirectories holding <stem>.resources.dll.
        for entry in cache.list_dir(dir).iter() {
            let subdir = dir.join(entry);
            let satellite = subdir.join(format!("{stem}.resources.dll"));
            if cache.file_exists(&satellite) {
                companions.satellites.push(satellite);
            }
        }
    }

    if config.find_serialization_assemblies {
        let serializer = dir.join(format!("{stem}.XmlSerializers.dll"));
        if cache.file_exists(&serializer) {
            companions.serialization = Some(serializer);
        }
    }

    companions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AssemblyIdentity;
    use std::path::Path;
    use crate::locator::FileLocation;
    use crate::metadata::{MetadataProbe, ProbeResult};
    use crate::reference::Reference;

    struct NeverProbe;

    impl MetadataProbe for NeverProbe {
        fn probe(&self, _path: &Path) -> crate::error::Result<ProbeResult> {
            unreachable!("classification must not probe")
        }
    }

    fn config() -> ResolverConfig {
        ResolverConfig::default()
    }

    fn resolved(name: &str, primary: bool, source: LocationSource, dir: &Path) -> Reference {
        let identity: AssemblyIdentity =
            format!("{name}, Version=1.0.0.0").parse().unwrap();
        let mut reference = Reference::new(identity.clone(), primary);
        reference.resolved_identity = Some(identity);
        reference.resolved_location = Some(FileLocation {
            path: dir.join(format!("{name}.dll")),
            source,
            search_path_index: 0,
            modified: None,
        });
        reference
    }

    #[test]
    fn test_private_setting_overrides_everything() {
        let temp = tempfile::tempdir().unwrap();
        let mut table = ReferenceTable::new();
        let mut reference = resolved("Gac", true, LocationSource::Gac, temp.path());
        reference.private_setting = Some(true);
        let id = table.insert(reference);
        assert_eq!(
            copy_local_state(&table, id, &config()),
            CopyLocalState::YesPrivate
        );

        let mut reference = resolved("Local", true, LocationSource::Directory, temp.path());
        reference.private_setting = Some(false);
        let id = table.insert(reference);
        assert_eq!(
            copy_local_state(&table, id, &config()),
            CopyLocalState::NoPrivate
        );
    }

    #[test]
    fn test_unresolved_is_never_copied() {
        let mut table = ReferenceTable::new();
        let id = table.insert(Reference::new(AssemblyIdentity::named("Missing"), true));
        assert_eq!(copy_local_state(&table, id, &config()), CopyLocalState::No);
    }

    #[test]
    fn test_gac_rules_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let mut table = ReferenceTable::new();

        let mut prerequisite = resolved("System", true, LocationSource::FrameworkDir, temp.path());
        prerequisite.is_prerequisite = true;
        let id = table.insert(prerequisite);
        assert_eq!(
            copy_local_state(&table, id, &config()),
            CopyLocalState::NoPrerequisite
        );

        let from_gac = resolved("FromGac", true, LocationSource::Gac, temp.path());
        let id = table.insert(from_gac);
        assert_eq!(
            copy_local_state(&table, id, &config()),
            CopyLocalState::NoResolvedFromGac
        );

        let mut found = resolved("Found", true, LocationSource::Directory, temp.path());
        found.found_in_gac = true;
        let id = table.insert(found);
        let mut no_gac_copy = config();
        no_gac_copy.do_not_copy_local_if_in_gac = true;
        assert_eq!(
            copy_local_state(&table, id, &no_gac_copy),
            CopyLocalState::NoFoundInGac
        );
        // Default configuration allows the copy.
        assert_eq!(
            copy_local_state(&table, id, &config()),
            CopyLocalState::YesHeuristic
        );
    }

    #[test]
    fn test_parents_in_gac_rule() {
        let temp = tempfile::tempdir().unwrap();
        let mut table = ReferenceTable::new();
        let parent = resolved("Parent", true, LocationSource::Gac, temp.path());
        let parent_id = table.insert(parent);
        let mut child = resolved("Child", false, LocationSource::Directory, temp.path());
        child.add_dependee(parent_id, AssemblyIdentity::named("Child"));
        let child_id = table.insert(child);

        assert_eq!(
            copy_local_state(&table, child_id, &config()),
            CopyLocalState::NoParentsInGac
        );

        let mut relaxed = config();
        relaxed.copy_local_dependencies_when_parent_in_gac = true;
        assert_eq!(
            copy_local_state(&table, child_id, &relaxed),
            CopyLocalState::YesHeuristic
        );
    }

    #[test]
    fn test_victims_lose_outputs_but_insoluble_keeps_both() {
        let temp = tempfile::tempdir().unwrap();
        let mut table = ReferenceTable::new();
        let winner = resolved("Lib", true, LocationSource::Directory, temp.path());
        let winner_id = table.insert(winner);
        let mut victim = resolved("Lib", false, LocationSource::Directory, temp.path());
        victim.conflict_state = ConflictState::Victim {
            reason: ConflictLossReason::HadLowerVersion,
            winner: winner_id,
        };
        let mut kept = resolved("Lib2", true, LocationSource::Directory, temp.path());
        kept.conflict_state = ConflictState::Victim {
            reason: ConflictLossReason::InsolubleConflict,
            winner: winner_id,
        };
        table.insert(victim);
        table.insert(kept);

        let cache = ProbeCache::new(Box::new(NeverProbe));
        let outputs = classify(&mut table, &config(), &cache, &[]);
        let names: Vec<String> = outputs
            .resolved_files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"Lib.dll".to_string()));
        assert!(names.contains(&"Lib2.dll".to_string()));
        assert_eq!(outputs.resolved_dependency_files.len(), 0);
    }

    #[test]
    fn test_companions_found_next_to_file() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("Lib.dll"), b"x").unwrap();
        std::fs::write(temp.path().join("Lib.pdb"), b"x").unwrap();
        std::fs::write(temp.path().join("Lib.xml"), b"x").unwrap();
        std::fs::write(temp.path().join("Lib.XmlSerializers.dll"), b"x").unwrap();
        std::fs::create_dir(temp.path().join("de")).unwrap();
        std::fs::write(temp.path().join("de/Lib.resources.dll"), b"x").unwrap();

        let mut table = ReferenceTable::new();
        table.insert(resolved("Lib", true, LocationSource::Directory, temp.path()));
        let cache = ProbeCache::new(Box::new(NeverProbe));
        let outputs = classify(&mut table, &config(), &cache, &[]);

        assert_eq!(outputs.related_files.len(), 2);
        assert_eq!(outputs.satellite_files.len(), 1);
        assert!(outputs.satellite_files[0].ends_with("de/Lib.resources.dll"));
        assert_eq!(outputs.serialization_assembly_files.len(), 1);
        // Copy-local gathers the file and all companions.
        assert_eq!(outputs.copy_local_files.len(), 5);
    }

    #[test]
    fn test_depends_on_flags() {
        let temp = tempfile::tempdir().unwrap();
        let mut table = ReferenceTable::new();
        table.insert(resolved(
            "System.Runtime",
            false,
            LocationSource::Directory,
            temp.path(),
        ));
        let cache = ProbeCache::new(Box::new(NeverProbe));
        let outputs = classify(&mut table, &config(), &cache, &[]);
        assert!(outputs.depends_on_system_runtime);
        assert!(!outputs.depends_on_netstandard);
    }
}
