//! # Reference Graph Builder
//!
//! The driver that turns a configuration into a resolved reference graph.
//!
//! ## Execution flow
//!
//! 1.  **Validation**: the configuration aggregate is checked; invalid
//!     parameters abort before any filesystem work.
//! 2.  **Policy and redirects**: framework-membership lists are loaded, the
//!     binding-redirect configuration is parsed (malformed content is
//!     fatal), and framework retargets are derived.
//! 3.  **Closure**: a FIFO queue seeded with the primaries expands the
//!     graph. Each popped request is redirected, merged into an existing
//!     node when its identity is already present, or resolved by probing
//!     the locator's candidates in order. Discovered dependencies are
//!     enqueued sorted by identity so expansion order is deterministic.
//! 4.  **Exclusion pruning**: references excluded by the subset policy are
//!     removed along with every edge into them.
//! 5.  **Conflicts**: winners are chosen; in auto-unify mode the suggested
//!     redirects are installed and the closure is recomputed exactly once
//!     so unification can propagate.
//! 6.  **Classification**: copy-local and companion files are computed and
//!     the output tables assembled.
//! 7.  **Cache flush**: the probe cache is written back if dirty.
//!
//! The decision log is assembled at the end from the per-reference records,
//! which is what makes the event order deterministic regardless of how the
//! probe pool interleaved.
//!
//! Cycle tolerance comes from the merge step: a request whose identity is
//! already in the table only adds a back-edge and is never expanded twice.

mod workers;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{file_mtime, ProbeCache};
use crate::config::{ArchMismatchSeverity, PrimaryAssembly, ResolverConfig};
use crate::conflict::{self, ConflictOutcome};
use crate::decisions::{codes, Decision, DecisionBackend, DecisionLog, ReferenceKind};
use crate::error::{Error, Result};
use crate::hosts::{GlobalAssemblyCache, Registry};
use crate::identity::{AssemblyIdentity, MatchMode};
use crate::locator::{
    Candidate, CandidateLocator, FileLocation, LocationSource, RejectionReason, RequestOverrides,
};
use crate::metadata::MetadataProbe;
use crate::outputs::{self, ResolutionOutputs};
use crate::redirect::{RedirectSet, RedirectSource};
use crate::redist::{self, Classification, RedistPolicy};
use crate::reference::{
    ConsideredLocation, PreUnificationVersion, Reference, ReferenceError, ReferenceId,
    ReferenceTable, UnificationReason,
};

/// Environment flag enabling per-candidate search messages.
pub const VERBOSE_SEARCH_ENV: &str = "REFSOLVE_LOG_VERBOSE_SEARCH";

/// Everything one invocation hands back.
#[derive(Debug)]
pub struct ResolutionReport {
    /// False iff any decision-log event is an error.
    pub success: bool,
    pub outputs: ResolutionOutputs,
    pub events: Vec<Decision>,
    /// Flattened graph for display; children are indexes into the list.
    pub graph: Vec<GraphNode>,
    pub reference_count: usize,
    /// Real metadata decodes performed (cache misses).
    pub probe_count: u64,
    pub cache_hit_count: u64,
}

/// One node of the flattened dependency graph.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphNode {
    pub identity: String,
    pub is_primary: bool,
    pub resolved: bool,
    pub children: Vec<usize>,
}

/// Flatten the table into display nodes; edges are dependee back-edges
/// reversed into child lists.
fn graph_nodes(table: &ReferenceTable) -> Vec<GraphNode> {
    let ids = table.ids_primaries_first();
    let position: std::collections::HashMap<ReferenceId, usize> =
        ids.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();
    let mut nodes: Vec<GraphNode> = ids
        .iter()
        .filter_map(|&id| table.get(id))
        .map(|r| GraphNode {
            identity: r.effective_identity.to_string(),
            is_primary: r.is_primary,
            resolved: r.is_resolved(),
            children: Vec::new(),
        })
        .collect();
    for (pos, &id) in ids.iter().enumerate() {
        let Some(reference) = table.get(id) else {
            continue;
        };
        for dependee in &reference.dependees {
            if let Some(&parent_pos) = position.get(&dependee.id) {
                nodes[parent_pos].children.push(pos);
            }
        }
    }
    for node in &mut nodes {
        node.children.sort_unstable();
        node.children.dedup();
    }
    nodes
}

/// The resolver. Construct with collaborators, call [`resolve`], consume
/// the report.
///
/// [`resolve`]: ResolverEngine::resolve
pub struct ResolverEngine {
    config: ResolverConfig,
    cache: ProbeCache,
    registry: Box<dyn Registry>,
    gac: Box<dyn GlobalAssemblyCache>,
    log: DecisionLog,
    cancel: Arc<AtomicBool>,
    startup_advisories: Vec<String>,
}

impl ResolverEngine {
    /// Engine with explicit collaborators; the probe cache is loaded from
    /// the configured state file when one is set.
    pub fn new(
        config: ResolverConfig,
        probe: Box<dyn MetadataProbe>,
        registry: Box<dyn Registry>,
        gac: Box<dyn GlobalAssemblyCache>,
        backend: Box<dyn DecisionBackend>,
    ) -> Self {
        let verbose_search = std::env::var_os(VERBOSE_SEARCH_ENV).is_some();
        let mut startup_advisories = Vec::new();
        let cache = match &config.state_file {
            Some(state_file) => {
                let (cache, advisory) = ProbeCache::load(probe, state_file);
                startup_advisories.extend(advisory);
                cache
            }
            None => ProbeCache::new(probe),
        };
        let log = DecisionLog::new(backend, config.silent, verbose_search);
        Self {
            config,
            cache,
            registry,
            gac,
            log,
            cancel: Arc::new(AtomicBool::new(false)),
            startup_advisories,
        }
    }

    /// Engine with the default host collaborators: the PE probe, an empty
    /// registry, and the directory-layout GAC over `config.gac_roots`.
    pub fn with_defaults(config: ResolverConfig, backend: Box<dyn DecisionBackend>) -> Self {
        let gac = crate::hosts::DirectoryGac::new(config.gac_roots.clone());
        Self::new(
            config,
            Box::new(crate::metadata::PeMetadataProbe),
            Box::new(crate::hosts::EmptyRegistry),
            Box::new(gac),
            backend,
        )
    }

    /// Token that cancels the invocation from another thread. Checked at
    /// every queue pop and between probes; on cancellation the cache is not
    /// flushed.
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the invocation to completion.
    pub fn resolve(mut self) -> Result<ResolutionReport> {
        if let Err(e) = self.config.validate() {
            self.log.error(codes::INVALID_PARAMETER, e.to_string());
            return Err(e);
        }

        self.log_inputs();
        for advisory in std::mem::take(&mut self.startup_advisories) {
            self.log.advisory(advisory);
        }

        let policy = self.load_policy();
        let mut redirects = match &self.config.config_file {
            Some(config_file) => match RedirectSet::from_config_file(config_file) {
                Ok(redirects) => redirects,
                Err(e) => {
                    self.log.error(codes::INVALID_CONFIG_FILE, e.to_string());
                    return Err(e);
                }
            },
            None => RedirectSet::new(),
        };
        redirects.add_framework_retargets(&policy);

        let context = ClosureContext {
            config: &self.config,
            registry: self.registry.as_ref(),
            gac: self.gac.as_ref(),
            cache: &self.cache,
            cancel: self.cancel.as_ref(),
        };

        let mut table = build_closure(&context, &policy, &redirects)?;
        let mut exclusions = prune_exclusions(&mut table, &policy);
        let mut outcome = conflict::resolve_conflicts(&mut table);

        // Auto-unify needs a closure to act on; without dependencies the
        // re-pass is short-circuited.
        if self.config.auto_unify
            && self.config.find_dependencies
            && !outcome.suggested_redirects.is_empty()
        {
            redirects.install_auto_unify(outcome.suggested_redirects.clone());
            table = build_closure(&context, &policy, &redirects)?;
            exclusions = prune_exclusions(&mut table, &policy);
            outcome = conflict::resolve_conflicts(&mut table);
        }

        mark_dependency_failures(&mut table);

        let mut outputs = outputs::classify(
            &mut table,
            &self.config,
            &self.cache,
            &outcome.suggested_redirects,
        );

        self.finalize_log(&table, &outcome, &exclusions);

        if let Some(state_file) = self.config.state_file.clone() {
            match self.cache.flush(&state_file) {
                Ok(true) => outputs.files_written.push(state_file),
                Ok(false) => {}
                // Reported, but does not affect the success flag.
                Err(e) => self
                    .log
                    .advisory(format!("failed to write state file: {e}")),
            }
        }

        self.log.finish();
        Ok(ResolutionReport {
            success: !self.log.has_errors(),
            outputs,
            graph: graph_nodes(&table),
            reference_count: table.len(),
            probe_count: self.cache.probe_count(),
            cache_hit_count: self.cache.hit_count(),
            events: self.log.into_events(),
        })
    }

    fn log_inputs(&mut self) {
        let search_paths = self
            .config
            .search_paths
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(";");
        let inputs = [
            (
                "primary_assemblies",
                self.config.primary_assemblies.len().to_string(),
            ),
            ("primary_files", self.config.primary_files.len().to_string()),
            ("search_paths", search_paths),
            (
                "target_processor_architecture",
                self.config.target_processor_architecture.to_string(),
            ),
            (
                "targeted_runtime_version",
                self.config.targeted_runtime_version.clone(),
            ),
            (
                "target_framework_moniker",
                self.config
                    .target_framework_moniker
                    .clone()
                    .unwrap_or_default(),
            ),
            ("auto_unify", self.config.auto_unify.to_string()),
            (
                "find_dependencies",
                self.config.find_dependencies.to_string(),
            ),
            (
                "state_file",
                self.config
                    .state_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        ];
        for (name, value) in inputs {
            self.log.record(Decision::Input {
                name: name.to_string(),
                value,
            });
        }
    }

    fn load_policy(&mut self) -> RedistPolicy {
        let mut full_tables = self.config.installed_assembly_tables.clone();
        full_tables.extend(self.config.full_framework_tables.iter().cloned());
        let mut subset_tables = self.config.installed_assembly_subset_tables.clone();

        if !self.config.ignore_default_installed_assembly_tables {
            let (default_full, default_subset) =
                redist::default_tables(&self.config.target_framework_dirs);
            full_tables.extend(default_full);
            subset_tables.extend(default_subset);
            let (full_framework_defaults, _) =
                redist::default_tables(&self.config.full_framework_dirs);
            full_tables.extend(full_framework_defaults);
        }

        let outcome =
            RedistPolicy::load(&full_tables, &subset_tables, &self.config.full_subset_names);
        for advisory in outcome.advisories {
            self.log.advisory(advisory);
        }
        outcome.policy
    }

    /// Sequence the per-reference blocks, exclusions, conflicts and
    /// suggested redirects into the decision log.
    fn finalize_log(
        &mut self,
        table: &ReferenceTable,
        outcome: &ConflictOutcome,
        exclusions: &[(String, String)],
    ) {
        for id in table.ids_primaries_first() {
            let Some(reference) = table.get(id) else {
                continue;
            };
            let identity = reference.effective_identity.to_string();
            self.log.record(Decision::PrimaryOrDependency {
                identity: identity.clone(),
                reference_kind: if reference.is_primary {
                    ReferenceKind::Primary
                } else {
                    ReferenceKind::Dependency
                },
            });
            for pre in &reference.pre_unification_versions {
                self.log.record(Decision::Unified {
                    identity: identity.clone(),
                    from: pre.version.to_string(),
                    to: reference
                        .effective_identity
                        .version_or_zero()
                        .to_string(),
                    reason: pre.reason,
                });
            }
            for considered in &reference.considered_locations {
                self.log.record(Decision::Considered {
                    location: considered.location.path.display().to_string(),
                    reason: considered.rejection.as_ref().map(|r| r.to_string()),
                });
            }
            match (&reference.resolved_identity, &reference.resolved_location) {
                (Some(resolved), Some(location)) => {
                    self.log.record(Decision::Resolved {
                        identity: resolved.to_string(),
                        location: location.path.display().to_string(),
                    });
                }
                _ => {
                    if reference.is_primary {
                        self.log.warning(
                            codes::RESOLUTION_FAILED,
                            format!("could not resolve primary reference '{identity}'"),
                        );
                    } else {
                        self.log
                            .advisory(format!("could not resolve dependency '{identity}'"));
                    }
                }
            }
            for error in &reference.errors {
                match error {
                    ReferenceError::ArchMismatch { want, got } => {
                        let message = format!(
                            "'{identity}' was built for {got} but the target is {want}"
                        );
                        match self.config.warn_or_error_on_arch_mismatch {
                            ArchMismatchSeverity::None => {}
                            ArchMismatchSeverity::Warning => {
                                self.log.warning(codes::ARCH_MISMATCH, message)
                            }
                            ArchMismatchSeverity::Error => {
                                self.log.error(codes::ARCH_MISMATCH, message)
                            }
                        }
                    }
                    ReferenceError::BadImage { path, reason } => self.log.advisory(format!(
                        "'{}' is not a valid assembly: {reason}",
                        path.display()
                    )),
                    ReferenceError::DependencyFailed { dependency } => {
                        self.log.advisory(format!(
                            "'{identity}' depends on unresolved '{dependency}'"
                        ));
                    }
                    ReferenceError::ResolutionFailed => {}
                }
            }
            self.log.record(Decision::CopyLocalDecision {
                identity,
                state: reference.copy_local,
            });
        }

        for (identity, subset) in exclusions {
            self.log.record(Decision::ExclusionApplied {
                identity: identity.clone(),
                subset: subset.clone(),
            });
            self.log.advisory(format!(
                "'{identity}' removed: not part of the targeted subset '{subset}'"
            ));
        }

        for resolved in &outcome.conflicts {
            let Some(winner) = table.get(resolved.winner) else {
                continue;
            };
            let winner_identity = winner.comparison_identity().to_string();
            for &(victim_id, reason) in &resolved.victims {
                let Some(victim) = table.get(victim_id) else {
                    continue;
                };
                self.log.record(Decision::Conflict {
                    winner: winner_identity.clone(),
                    loser: victim.comparison_identity().to_string(),
                    reason,
                });
            }
            if resolved.insoluble {
                self.log.warning(
                    codes::INSOLUBLE_CONFLICT,
                    format!(
                        "two primary references disagree on the version of '{winner_identity}'"
                    ),
                );
            } else {
                self.log.warning(
                    codes::CONFLICT,
                    format!(
                        "found conflicts for '{winner_identity}'; consider the suggested binding redirect"
                    ),
                );
            }
        }

        for redirect in &outcome.suggested_redirects {
            self.log.record(Decision::SuggestedRedirect {
                identity: redirect.identity.to_string(),
                new_version: redirect.new_version.to_string(),
            });
        }
    }
}

/// Borrowed collaborators for one closure pass.
struct ClosureContext<'a> {
    config: &'a ResolverConfig,
    registry: &'a dyn Registry,
    gac: &'a dyn GlobalAssemblyCache,
    cache: &'a ProbeCache,
    cancel: &'a AtomicBool,
}

/// One queued resolution request.
struct Pending {
    identity: AssemblyIdentity,
    /// Parent node and the identity it asked for, for dependencies.
    parent: Option<(ReferenceId, AssemblyIdentity)>,
    /// Index into `config.primary_assemblies`.
    primary: Option<usize>,
    /// Known location, for `primary_files` roots.
    file: Option<PathBuf>,
}

fn build_closure(
    context: &ClosureContext<'_>,
    policy: &RedistPolicy,
    redirects: &RedirectSet,
) -> Result<ReferenceTable> {
    let config = context.config;
    let mut table = ReferenceTable::new();
    let mut queue: VecDeque<Pending> = VecDeque::new();

    for (index, primary) in config.primary_assemblies.iter().enumerate() {
        queue.push_back(Pending {
            identity: primary.identity.clone(),
            parent: None,
            primary: Some(index),
            file: None,
        });
    }
    for file in &config.primary_files {
        let name = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        queue.push_back(Pending {
            identity: AssemblyIdentity::named(name),
            parent: None,
            primary: None,
            file: Some(file.clone()),
        });
    }

    let locator = CandidateLocator::new(
        &config.search_paths,
        &config.allowed_assembly_extensions,
        &config.target_framework_dirs,
        &config.candidate_assembly_files,
        config.target_processor_architecture,
        context.registry,
        context.gac,
        context.cache,
    );

    while let Some(pending) = queue.pop_front() {
        if context.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        process_pending(context, policy, redirects, &locator, &mut table, &mut queue, pending)?;
    }

    propagate_source_items(&mut table);
    Ok(table)
}

#[allow(clippy::too_many_arguments)]
fn process_pending(
    context: &ClosureContext<'_>,
    policy: &RedistPolicy,
    redirects: &RedirectSet,
    locator: &CandidateLocator<'_>,
    table: &mut ReferenceTable,
    queue: &mut VecDeque<Pending>,
    pending: Pending,
) -> Result<()> {
    let config = context.config;
    let requested = pending.identity.clone();
    let spec: Option<&PrimaryAssembly> = pending.primary.map(|i| &config.primary_assemblies[i]);

    // Apply redirects before anything else so that merging happens on the
    // unified identity.
    let (effective, unification) = match redirects.apply(&requested) {
        Some((version, source)) => (
            requested.with_version(version),
            Some((requested.version_or_zero(), unification_reason(source))),
        ),
        None => (requested.clone(), None),
    };

    let specific_version = spec
        .and_then(|s| s.specific_version)
        .unwrap_or_else(|| requested.is_strong_named() && requested.version.is_some());
    let strict = (effective.is_strong_named() || specific_version) && effective.version.is_some();

    // Merge: an existing node with the same identity absorbs this request.
    // A strict request only merges with a version-equal node, so distinct
    // strong-named versions coexist until conflict resolution; everything
    // else merges on the simple identity.
    let merge_target = if strict {
        table.find_strict(&effective)
    } else {
        table.find_simple(&effective.simple_key()).into_iter().next()
    };
    if let Some(existing) = merge_target {
        if let Some(reference) = table.get_mut(existing) {
            if let Some((parent, requested_by_parent)) = pending.parent {
                reference.add_dependee(parent, requested_by_parent);
            }
            if pending.primary.is_some() || pending.file.is_some() {
                reference.is_primary = true;
            }
        }
        return Ok(());
    }

    let mut reference = Reference::new(
        requested.clone(),
        pending.primary.is_some() || pending.file.is_some(),
    );
    reference.effective_identity = effective.clone();
    if let Some((old_version, reason)) = unification {
        reference.is_unified = true;
        reference
            .pre_unification_versions
            .push(PreUnificationVersion {
                version: old_version,
                reason,
            });
    }
    if let Some(spec) = spec {
        reference.private_setting = spec.private;
        reference.embed_interop_types = spec.embed_interop_types;
        reference.specific_version = specific_version;
        reference.externally_resolved = spec.externally_resolved;
        reference.hint_path = spec.hint_path.clone();
        reference.executable_extension = spec.executable_extension.clone();
        reference.sub_type = spec.sub_type.clone();
    }

    // Candidate enumeration: a known file short-circuits the search.
    let candidates = match &pending.file {
        Some(file) => vec![Candidate {
            location: FileLocation {
                path: file.clone(),
                source: LocationSource::RawFile,
                search_path_index: 0,
                modified: None,
            },
            rejection: if context.cache.file_exists(file) {
                None
            } else {
                Some(RejectionReason::NotAFileNameOnDisk)
            },
        }],
        None => locator.enumerate(
            &effective,
            RequestOverrides {
                hint_path: reference.hint_path.as_deref(),
                executable_extension: reference.executable_extension.as_deref(),
            },
        ),
    };

    // Probe every existing candidate in parallel; selection still walks
    // the candidates in order, so the extra results only warm the cache.
    let probe_paths: Vec<PathBuf> = candidates
        .iter()
        .filter(|c| c.rejection.is_none())
        .map(|c| c.location.path.clone())
        .collect();
    let probe_results = workers::probe_all(context.cache, &probe_paths, context.cancel);

    let match_mode = if strict {
        MatchMode::Strict
    } else {
        MatchMode::Simple
    };

    let mut probe_index = 0;
    let mut probed_references: Vec<AssemblyIdentity> = Vec::new();
    for candidate in candidates {
        if reference.is_resolved() {
            break;
        }
        if let Some(rejection) = candidate.rejection {
            reference.considered_locations.push(ConsideredLocation {
                location: candidate.location,
                rejection: Some(rejection),
            });
            continue;
        }
        let result = probe_results
            .get(probe_index)
            .and_then(|slot| slot.as_ref())
            .ok_or(Error::Cancelled)?;
        probe_index += 1;

        match result {
            Err(Error::BadImage { reason, .. }) => {
                reference.considered_locations.push(ConsideredLocation {
                    location: candidate.location.clone(),
                    rejection: Some(RejectionReason::BadImage {
                        reason: reason.clone(),
                    }),
                });
                reference.errors.push(ReferenceError::BadImage {
                    path: candidate.location.path,
                    reason: reason.clone(),
                });
            }
            Err(e) => {
                reference.considered_locations.push(ConsideredLocation {
                    location: candidate.location,
                    rejection: Some(RejectionReason::BadImage {
                        reason: e.to_string(),
                    }),
                });
            }
            Ok(probe) => {
                let Some(file_identity) = probe.identity.clone() else {
                    reference.considered_locations.push(ConsideredLocation {
                        location: candidate.location,
                        rejection: Some(RejectionReason::TargetHadNoFusionName),
                    });
                    continue;
                };
                if !file_identity.matches(&effective, match_mode) {
                    reference.considered_locations.push(ConsideredLocation {
                        location: candidate.location,
                        rejection: Some(RejectionReason::FusionNamesDidNotMatch {
                            expected: effective.to_string(),
                            found: file_identity.to_string(),
                        }),
                    });
                    continue;
                }
                let arch_ok = probe
                    .architecture
                    .compatible_with(config.target_processor_architecture);
                if !arch_ok {
                    if config.warn_or_error_on_arch_mismatch == ArchMismatchSeverity::None {
                        // Silent mode treats the mismatch as a search miss.
                        reference.considered_locations.push(ConsideredLocation {
                            location: candidate.location,
                            rejection: Some(
                                RejectionReason::ProcessorArchitectureDoesNotMatch {
                                    want: config.target_processor_architecture,
                                    got: probe.architecture,
                                },
                            ),
                        });
                        continue;
                    }
                    reference.errors.push(ReferenceError::ArchMismatch {
                        want: config.target_processor_architecture,
                        got: probe.architecture,
                    });
                }
                let mut location = candidate.location;
                location.modified = file_mtime(&location.path).ok();
                let dir = location.path.parent().map(|d| d.to_path_buf());
                reference.considered_locations.push(ConsideredLocation {
                    location: location.clone(),
                    rejection: None,
                });
                reference.resolved_identity = Some(file_identity);
                reference.resolved_location = Some(location);
                reference.runtime_version = Some(probe.runtime_version.clone());
                reference.is_winmd = probe.is_winmd;
                reference.framework_name = probe.framework_name.clone();
                reference.scatter_files = probe
                    .scatter_files
                    .iter()
                    .filter_map(|name| dir.as_ref().map(|d| d.join(name)))
                    .collect();
                probed_references = probe.references.clone();
            }
        }
    }

    if !reference.is_resolved() {
        reference.errors.push(ReferenceError::ResolutionFailed);
    }

    match policy.classify(&effective) {
        Classification::InFramework {
            redist_name,
            in_gac,
            ..
        } => {
            reference.redist_name = Some(redist_name);
            reference.is_prerequisite = in_gac;
        }
        Classification::Excluded | Classification::Unknown => {}
    }
    reference.found_in_gac = effective.is_strong_named() && context.gac.contains(&effective);
    reference.is_framework_file = reference
        .resolved_location
        .as_ref()
        .map(|location| {
            config
                .target_framework_dirs
                .iter()
                .any(|dir| location.path.starts_with(dir))
        })
        .unwrap_or(false);

    probed_references.sort();
    reference.probed_references = probed_references.clone();
    let resolved = reference.is_resolved();
    let externally_resolved = reference.externally_resolved;

    let id = table.insert(reference);
    if let Some((parent, requested_by_parent)) = pending.parent {
        if let Some(inserted) = table.get_mut(id) {
            inserted.add_dependee(parent, requested_by_parent);
        }
    }

    let expand = resolved
        && config.find_dependencies
        && (!externally_resolved || config.find_dependencies_of_externally_resolved);
    if expand {
        for dependency in probed_references {
            queue.push_back(Pending {
                identity: dependency.clone(),
                parent: Some((id, dependency)),
                primary: None,
                file: None,
            });
        }
    }
    Ok(())
}

fn unification_reason(source: RedirectSource) -> UnificationReason {
    match source {
        RedirectSource::Config => UnificationReason::ConfigRedirect,
        RedirectSource::FrameworkRetarget => UnificationReason::FrameworkRetarget,
        RedirectSource::AutoUnify => UnificationReason::AutoUnify,
    }
}

/// Remove references the subset policy excludes. Returns
/// `(identity, subset_name)` pairs for the decision log.
fn prune_exclusions(table: &mut ReferenceTable, policy: &RedistPolicy) -> Vec<(String, String)> {
    let subset = policy.subset_names().join(",");
    let excluded: Vec<(ReferenceId, String)> = table
        .iter()
        .filter(|(_, r)| {
            matches!(
                policy.classify(&r.effective_identity),
                Classification::Excluded
            )
        })
        .map(|(id, r)| (id, r.effective_identity.to_string()))
        .collect();

    let mut events = Vec::new();
    for (id, identity) in excluded {
        table.remove(id);
        events.push((identity, subset.clone()));
    }
    events
}

/// Roots own their names; every other node inherits the union of its
/// parents' source items. Iterate to a fixpoint so cycles converge.
fn propagate_source_items(table: &mut ReferenceTable) {
    let ids = table.ids();
    for &id in &ids {
        if let Some(reference) = table.get_mut(id) {
            if reference.is_primary {
                let name = reference.requested_identity.simple_name.clone();
                reference.source_items.insert(name);
            }
        }
    }
    loop {
        let mut changed = false;
        for &id in &ids {
            let Some(reference) = table.get(id) else {
                continue;
            };
            let mut inherited: Vec<String> = Vec::new();
            for dependee in &reference.dependees {
                if let Some(parent) = table.get(dependee.id) {
                    inherited.extend(parent.source_items.iter().cloned());
                }
            }
            if let Some(reference) = table.get_mut(id) {
                for item in inherited {
                    changed |= reference.source_items.insert(item);
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Attach `DependencyFailed` to parents of unresolved dependencies.
fn mark_dependency_failures(table: &mut ReferenceTable) {
    let ids = table.ids();
    let mut failures: Vec<(ReferenceId, String)> = Vec::new();
    for &id in &ids {
        let Some(reference) = table.get(id) else {
            continue;
        };
        if !reference.is_resolved() {
            continue;
        }
        for dependency in &reference.probed_references {
            let unresolved = table
                .find_simple(&dependency.simple_key())
                .into_iter()
                .filter_map(|dep_id| table.get(dep_id))
                .any(|dep| !dep.is_resolved());
            if unresolved {
                failures.push((id, dependency.to_string()));
            }
        }
    }
    for (id, dependency) in failures {
        if let Some(reference) = table.get_mut(id) {
            reference
                .errors
                .push(ReferenceError::DependencyFailed { dependency });
        }
    }
}
