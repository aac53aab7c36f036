//! Library-level scenarios for the resolver engine.
//!
//! These tests fabricate real PE/CLI images with the shared builder, run
//! full invocations through `ResolverEngine`, and check the output tables
//! and decision-log events end to end: simple resolution, transitive
//! conflicts with and without auto-unify, subset exclusion, architecture
//! mismatches, and cache reuse across invocations.

mod common;

use std::path::Path;

use common::AssemblyImageBuilder;
use refsolve::config::{ArchMismatchSeverity, PrimaryAssembly, ResolverConfig};
use refsolve::decisions::{codes, Decision, NullBackend};
use refsolve::identity::ProcessorArchitecture;
use refsolve::metadata::{MetadataProbe, PeMetadataProbe};
use refsolve::reference::{CopyLocalState, UnificationReason};
use refsolve::resolver::{ResolutionReport, ResolverEngine};

fn config_with_dirs(dirs: &[&Path]) -> ResolverConfig {
    let mut config = ResolverConfig::default();
    config.search_paths = dirs
        .iter()
        .map(|dir| dir.to_string_lossy().parse().unwrap())
        .collect();
    config
}

fn add_primary(config: &mut ResolverConfig, fusion_name: &str) {
    config
        .primary_assemblies
        .push(PrimaryAssembly::new(fusion_name.parse().unwrap()));
}

fn run(config: ResolverConfig) -> ResolutionReport {
    ResolverEngine::with_defaults(config, Box::new(NullBackend))
        .resolve()
        .unwrap()
}

fn warning_codes(report: &ResolutionReport) -> Vec<String> {
    report
        .events
        .iter()
        .filter_map(|event| match event {
            Decision::Warning { code, .. } => Some(code.clone()),
            _ => None,
        })
        .collect()
}

fn error_codes(report: &ResolutionReport) -> Vec<String> {
    report
        .events
        .iter()
        .filter_map(|event| match event {
            Decision::Error { code, .. } => Some(code.clone()),
            _ => None,
        })
        .collect()
}

/// Probe a built image and return its public key token bytes.
fn token_of(path: &Path) -> [u8; 8] {
    let probe = PeMetadataProbe;
    *probe
        .probe(path)
        .unwrap()
        .identity
        .unwrap()
        .public_key_token
        .unwrap()
        .as_bytes()
}

#[test]
fn simple_resolution_of_one_primary() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("Foo", "1.0.0.0").write_to(dir.path());

    let mut config = config_with_dirs(&[dir.path()]);
    add_primary(&mut config, "Foo, Version=1.0.0.0");
    let report = run(config);

    assert!(report.success);
    assert_eq!(report.reference_count, 1);
    assert_eq!(report.outputs.resolved_files.len(), 1);
    assert!(report.outputs.resolved_dependency_files.is_empty());
    assert!(report.outputs.suggested_redirects.is_empty());
    assert_eq!(
        report.outputs.resolved_files[0].copy_local,
        CopyLocalState::YesHeuristic
    );
    assert!(report.outputs.resolved_files[0]
        .path
        .ends_with("Foo.dll"));
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, Decision::Resolved { .. })));
}

#[test]
fn transitive_dependencies_are_discovered() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("App", "1.0.0.0")
        .reference("Dep", "1.0.0.0")
        .write_to(dir.path());
    AssemblyImageBuilder::new("Dep", "1.0.0.0")
        .reference("Leaf", "1.0.0.0")
        .write_to(dir.path());
    AssemblyImageBuilder::new("Leaf", "1.0.0.0").write_to(dir.path());

    let mut config = config_with_dirs(&[dir.path()]);
    add_primary(&mut config, "App, Version=1.0.0.0");
    let report = run(config);

    assert!(report.success);
    assert_eq!(report.reference_count, 3);
    assert_eq!(report.outputs.resolved_files.len(), 1);
    assert_eq!(report.outputs.resolved_dependency_files.len(), 2);
    // Every non-primary node is reachable from a primary.
    let primary = report.graph.iter().position(|n| n.is_primary).unwrap();
    let mut reachable = vec![primary];
    let mut index = 0;
    while index < reachable.len() {
        let node = reachable[index];
        for &child in &report.graph[node].children {
            if !reachable.contains(&child) {
                reachable.push(child);
            }
        }
        index += 1;
    }
    assert_eq!(reachable.len(), report.graph.len());
}

#[test]
fn find_dependencies_off_stops_at_primaries() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("App", "1.0.0.0")
        .reference("Dep", "1.0.0.0")
        .write_to(dir.path());
    AssemblyImageBuilder::new("Dep", "1.0.0.0").write_to(dir.path());

    let mut config = config_with_dirs(&[dir.path()]);
    config.find_dependencies = false;
    add_primary(&mut config, "App, Version=1.0.0.0");
    let report = run(config);

    assert_eq!(report.reference_count, 1);
    assert!(report.outputs.resolved_dependency_files.is_empty());
}

/// Two primaries pull in different versions of a strong-named library.
fn conflict_fixture(auto_unify: bool) -> ResolutionReport {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let key = b"not-a-real-key-but-hashable";

    let lib_v1 = AssemblyImageBuilder::new("Lib", "1.0.0.0")
        .public_key(key)
        .write_to(dir_a.path());
    let token = token_of(&lib_v1);
    AssemblyImageBuilder::new("Lib", "2.0.0.0")
        .public_key(key)
        .write_to(dir_b.path());
    AssemblyImageBuilder::new("A", "1.0.0.0")
        .reference_strong("Lib", "1.0.0.0", token)
        .write_to(dir_a.path());
    AssemblyImageBuilder::new("B", "1.0.0.0")
        .reference_strong("Lib", "2.0.0.0", token)
        .write_to(dir_b.path());

    let mut config = config_with_dirs(&[dir_a.path(), dir_b.path()]);
    config.auto_unify = auto_unify;
    add_primary(&mut config, "A, Version=1.0.0.0");
    add_primary(&mut config, "B, Version=1.0.0.0");
    run(config)
}

#[test]
fn transitive_conflict_without_auto_unify() {
    let report = conflict_fixture(false);

    assert!(report.success, "a soluble conflict is only a warning");
    // A, B, the victim Lib 1.0 and the victor Lib 2.0.
    assert_eq!(report.reference_count, 4);

    let libs: Vec<&str> = report
        .outputs
        .resolved_dependency_files
        .iter()
        .map(|f| f.fusion_name.as_str())
        .collect();
    assert_eq!(libs.len(), 1, "the victim loses its output row: {libs:?}");
    assert!(libs[0].contains("Lib") && libs[0].contains("2.0.0.0"));

    assert_eq!(report.outputs.suggested_redirects.len(), 1);
    let redirect = &report.outputs.suggested_redirects[0];
    assert!(redirect.identity.contains("Lib"));
    assert!(redirect.identity.contains("PublicKeyToken="));
    assert_eq!(redirect.max_version, "2.0.0.0");

    assert!(warning_codes(&report).contains(&codes::CONFLICT.to_string()));
    assert!(report.events.iter().any(|e| matches!(
        e,
        Decision::Conflict { winner, loser, .. }
            if winner.contains("2.0.0.0") && loser.contains("1.0.0.0")
    )));
}

#[test]
fn auto_unify_removes_the_conflict() {
    let report = conflict_fixture(true);

    assert!(report.success);
    // Both requests unified onto one Lib node.
    assert_eq!(report.reference_count, 3);
    assert_eq!(report.outputs.resolved_dependency_files.len(), 1);
    assert!(report.outputs.resolved_dependency_files[0]
        .fusion_name
        .contains("2.0.0.0"));

    assert!(report.outputs.suggested_redirects.is_empty());
    assert!(!warning_codes(&report).contains(&codes::CONFLICT.to_string()));
    assert!(report.events.iter().any(|e| matches!(
        e,
        Decision::Unified { reason, from, .. }
            if *reason == UnificationReason::AutoUnify && from == "1.0.0.0"
    )));
}

#[test]
fn subset_exclusion_prunes_the_reference() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("Foo", "1.0.0.0").write_to(dir.path());

    let full_list = dir.path().join("FrameworkList.xml");
    std::fs::write(
        &full_list,
        r#"<FileList Redist="TestFx">
  <File AssemblyName="Foo" Version="1.0.0.0" Culture="neutral" InGAC="false" />
</FileList>"#,
    )
    .unwrap();
    let subset_list = dir.path().join("Client.xml");
    std::fs::write(
        &subset_list,
        r#"<FileList Redist="Client">
  <File AssemblyName="SomethingElse" Version="1.0.0.0" Culture="neutral" InGAC="false" />
</FileList>"#,
    )
    .unwrap();

    let mut config = config_with_dirs(&[dir.path()]);
    config.installed_assembly_tables = vec![full_list];
    config.installed_assembly_subset_tables = vec![subset_list];
    add_primary(&mut config, "Foo, Version=1.0.0.0");
    let report = run(config);

    assert!(report.success, "exclusion is an advisory, not an error");
    assert_eq!(report.reference_count, 0);
    assert!(report.outputs.resolved_files.is_empty());
    assert!(report.outputs.copy_local_files.is_empty());
    assert!(report.events.iter().any(|e| matches!(
        e,
        Decision::ExclusionApplied { identity, subset }
            if identity.contains("Foo") && subset == "Client"
    )));
}

#[test]
fn architecture_mismatch_as_error_fails_the_invocation() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("Native", "1.0.0.0")
        .amd64()
        .write_to(dir.path());

    let mut config = config_with_dirs(&[dir.path()]);
    config.target_processor_architecture = ProcessorArchitecture::X86;
    config.warn_or_error_on_arch_mismatch = ArchMismatchSeverity::Error;
    add_primary(&mut config, "Native, Version=1.0.0.0");
    let report = run(config);

    assert!(!report.success);
    assert!(error_codes(&report).contains(&codes::ARCH_MISMATCH.to_string()));
    // The file still resolves; the severity decides the outcome, not the
    // selection.
    assert_eq!(report.outputs.resolved_files.len(), 1);
}

#[test]
fn architecture_mismatch_as_warning_keeps_success() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("Native", "1.0.0.0")
        .amd64()
        .write_to(dir.path());

    let mut config = config_with_dirs(&[dir.path()]);
    config.target_processor_architecture = ProcessorArchitecture::X86;
    config.warn_or_error_on_arch_mismatch = ArchMismatchSeverity::Warning;
    add_primary(&mut config, "Native, Version=1.0.0.0");
    let report = run(config);

    assert!(report.success);
    assert!(warning_codes(&report).contains(&codes::ARCH_MISMATCH.to_string()));
}

#[test]
fn cache_reuse_skips_probes_on_second_run() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("App", "1.0.0.0")
        .reference("Dep", "1.0.0.0")
        .write_to(dir.path());
    AssemblyImageBuilder::new("Dep", "1.0.0.0").write_to(dir.path());
    let state_file = dir.path().join("state/refsolve.cache");

    let make_config = || {
        let mut config = config_with_dirs(&[dir.path()]);
        config.state_file = Some(state_file.clone());
        add_primary(&mut config, "App, Version=1.0.0.0");
        config
    };

    let first = run(make_config());
    assert!(first.probe_count > 0);
    assert_eq!(first.outputs.files_written, vec![state_file.clone()]);

    let second = run(make_config());
    assert_eq!(second.probe_count, 0, "all probes served from the cache");
    assert!(second.cache_hit_count > 0);
    // Not dirty again, so the state file is not rewritten.
    assert!(second.outputs.files_written.is_empty());

    let first_files: Vec<_> = first.outputs.resolved_files.iter().map(|f| &f.path).collect();
    let second_files: Vec<_> = second.outputs.resolved_files.iter().map(|f| &f.path).collect();
    assert_eq!(first_files, second_files);
}

#[test]
fn identical_runs_produce_identical_event_streams() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("App", "1.0.0.0")
        .reference("Zeta", "1.0.0.0")
        .reference("Alpha", "1.0.0.0")
        .write_to(dir.path());
    AssemblyImageBuilder::new("Zeta", "1.0.0.0").write_to(dir.path());
    AssemblyImageBuilder::new("Alpha", "1.0.0.0").write_to(dir.path());

    let make_config = || {
        let mut config = config_with_dirs(&[dir.path()]);
        add_primary(&mut config, "App, Version=1.0.0.0");
        config
    };

    let first = run(make_config());
    let second = run(make_config());
    assert_eq!(
        serde_json::to_string(&first.events).unwrap(),
        serde_json::to_string(&second.events).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.outputs).unwrap(),
        serde_json::to_string(&second.outputs).unwrap()
    );
}

#[test]
fn unresolved_dependency_is_advisory_not_error() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("App", "1.0.0.0")
        .reference("Ghost", "1.0.0.0")
        .write_to(dir.path());

    let mut config = config_with_dirs(&[dir.path()]);
    add_primary(&mut config, "App, Version=1.0.0.0");
    let report = run(config);

    assert!(report.success);
    assert_eq!(report.outputs.resolved_files.len(), 1);
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, Decision::Advisory { message } if message.contains("Ghost"))));
    let ghost = report.graph.iter().find(|n| n.identity.contains("Ghost")).unwrap();
    assert!(!ghost.resolved);
}

#[test]
fn unresolved_primary_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with_dirs(&[dir.path()]);
    add_primary(&mut config, "Nowhere, Version=1.0.0.0");
    let report = run(config);

    assert!(report.success, "a missing primary warns but does not fail");
    assert!(warning_codes(&report).contains(&codes::RESOLUTION_FAILED.to_string()));
    assert!(report.outputs.resolved_files.is_empty());
}

#[test]
fn related_and_satellite_files_travel_with_the_assembly() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("Foo", "1.0.0.0").write_to(dir.path());
    std::fs::write(dir.path().join("Foo.pdb"), b"symbols").unwrap();
    std::fs::create_dir(dir.path().join("de")).unwrap();
    std::fs::write(dir.path().join("de/Foo.resources.dll"), b"strings").unwrap();

    let mut config = config_with_dirs(&[dir.path()]);
    add_primary(&mut config, "Foo, Version=1.0.0.0");
    let report = run(config);

    assert_eq!(report.outputs.related_files.len(), 1);
    assert!(report.outputs.related_files[0].ends_with("Foo.pdb"));
    assert_eq!(report.outputs.satellite_files.len(), 1);
    assert!(report.outputs.satellite_files[0].ends_with("de/Foo.resources.dll"));
    // Copy-local gathers the assembly plus its companions.
    assert_eq!(report.outputs.copy_local_files.len(), 3);
}

#[test]
fn scatter_files_come_from_the_file_table() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("Split", "1.0.0.0")
        .scatter_file("Split.part1.netmodule")
        .write_to(dir.path());

    let mut config = config_with_dirs(&[dir.path()]);
    add_primary(&mut config, "Split, Version=1.0.0.0");
    let report = run(config);

    assert_eq!(report.outputs.scatter_files.len(), 1);
    assert!(report.outputs.scatter_files[0].ends_with("Split.part1.netmodule"));
}

#[test]
fn depends_on_flags_follow_simple_names() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("App", "1.0.0.0")
        .reference("System.Runtime", "4.0.0.0")
        .write_to(dir.path());
    AssemblyImageBuilder::new("System.Runtime", "4.0.0.0").write_to(dir.path());

    let mut config = config_with_dirs(&[dir.path()]);
    add_primary(&mut config, "App, Version=1.0.0.0");
    let report = run(config);

    assert!(report.outputs.depends_on_system_runtime);
    assert!(!report.outputs.depends_on_netstandard);
}

#[test]
fn config_redirect_unifies_before_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let key = b"redirect-key-material";
    let lib = AssemblyImageBuilder::new("Lib", "2.0.0.0")
        .public_key(key)
        .write_to(dir.path());
    let token = token_of(&lib);
    let token_hex: String = token.iter().map(|b| format!("{b:02x}")).collect();
    AssemblyImageBuilder::new("App", "1.0.0.0")
        .reference_strong("Lib", "1.0.0.0", token)
        .write_to(dir.path());

    let config_file = dir.path().join("app.config");
    std::fs::write(
        &config_file,
        format!(
            r#"<configuration><runtime><assemblyBinding>
  <dependentAssembly>
    <assemblyIdentity name="Lib" publicKeyToken="{token_hex}" culture="neutral"/>
    <bindingRedirect oldVersion="0.0.0.0-1.9.9.9" newVersion="2.0.0.0"/>
  </dependentAssembly>
</assemblyBinding></runtime></configuration>"#
        ),
    )
    .unwrap();

    let mut config = config_with_dirs(&[dir.path()]);
    config.config_file = Some(config_file);
    add_primary(&mut config, "App, Version=1.0.0.0");
    let report = run(config);

    assert!(report.success);
    assert_eq!(report.outputs.resolved_dependency_files.len(), 1);
    assert!(report.outputs.resolved_dependency_files[0]
        .fusion_name
        .contains("2.0.0.0"));
    assert!(report.events.iter().any(|e| matches!(
        e,
        Decision::Unified { reason, .. } if *reason == UnificationReason::ConfigRedirect
    )));
}

#[test]
fn malformed_config_file_aborts() {
    let dir = tempfile::tempdir().unwrap();
    AssemblyImageBuilder::new("Foo", "1.0.0.0").write_to(dir.path());
    let config_file = dir.path().join("app.config");
    std::fs::write(&config_file, "<configuration><runtime><assemblyBinding><dependentAssembly><bindingRedirect oldVersion=\"1.0\" newVersion=\"2.0\"/>").unwrap();

    let mut config = config_with_dirs(&[dir.path()]);
    config.config_file = Some(config_file);
    add_primary(&mut config, "Foo, Version=1.0.0.0");

    let result = ResolverEngine::with_defaults(config, Box::new(NullBackend)).resolve();
    assert!(matches!(
        result,
        Err(refsolve::error::Error::InvalidConfigFile { .. })
    ));
}
