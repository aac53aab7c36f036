//! # Reference Graph Data Model
//!
//! [`Reference`] is the central graph node: one per requested strict
//! identity, carrying everything the resolver learns about it. The
//! [`ReferenceTable`] owns every node; edges (`dependees`) are id handles
//! into the table rather than owning pointers, which is what makes cycles
//! harmless.
//!
//! Table invariants:
//! - no two *live* entries (non-victims) share a simple identity once
//!   conflicts are resolved;
//! - every non-primary entry has at least one dependee;
//! - every `Victim` names a `Victor` with the same simple identity;
//! - an entry is resolved iff it has a resolved location (metadata is
//!   probed before the location is recorded).
//!
//! Entries are destroyed only by exclusion-list pruning, which also drops
//! the edges into the pruned node and cascades to dependencies that become
//! orphaned by it.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde::Serialize;

use crate::identity::{AssemblyIdentity, AssemblyVersion, ProcessorArchitecture, SimpleKey};
use crate::locator::{FileLocation, RejectionReason};

/// Handle into the [`ReferenceTable`].
pub type ReferenceId = usize;

/// Copy-local decision, with the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CopyLocalState {
    /// Not yet classified.
    Undecided,
    /// `private` metadata explicitly true.
    YesPrivate,
    /// Default for locally-resolved references.
    YesHeuristic,
    /// `private` metadata explicitly false.
    NoPrivate,
    /// Unresolved references are never copied.
    No,
    /// Framework prerequisite (in-framework and installed in the GAC).
    NoPrerequisite,
    /// Embedded interop reference.
    NoEmbedded,
    /// Lost a conflict.
    NoConflictVictim,
    /// The chosen file came out of the GAC.
    NoResolvedFromGac,
    /// Present in the GAC and the configuration disables GAC copies.
    NoFoundInGac,
    /// Every dependee parent lives in the GAC.
    NoParentsInGac,
    /// File under a target framework directory.
    NoFrameworkFile,
}

impl CopyLocalState {
    pub fn is_copy_local(self) -> bool {
        matches!(self, CopyLocalState::YesPrivate | CopyLocalState::YesHeuristic)
    }
}

/// Why a conflict loser lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictLossReason {
    HadLowerVersion,
    WasNotPrimary,
    InsolubleConflict,
    FusionEquivalentWithSameVersion,
}

/// Conflict standing of one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictState {
    None,
    Victor,
    Victim {
        reason: ConflictLossReason,
        winner: ReferenceId,
    },
}

/// What changed a version before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnificationReason {
    None,
    ConfigRedirect,
    AutoUnify,
    FrameworkRetarget,
}

/// A version the requester asked for before unification replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreUnificationVersion {
    pub version: AssemblyVersion,
    pub reason: UnificationReason,
}

/// Recoverable errors recorded on the owning reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReferenceError {
    ResolutionFailed,
    DependencyFailed { dependency: String },
    BadImage { path: PathBuf, reason: String },
    ArchMismatch {
        want: ProcessorArchitecture,
        got: ProcessorArchitecture,
    },
}

/// Back-edge: the parent that required this reference and the identity the
/// parent actually asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dependee {
    pub id: ReferenceId,
    pub requested: AssemblyIdentity,
}

/// A location the search considered, with the reason it was passed over.
#[derive(Debug, Clone, Serialize)]
pub struct ConsideredLocation {
    pub location: FileLocation,
    pub rejection: Option<RejectionReason>,
}

/// One node of the reference graph.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    /// Identity exactly as stated by the requester.
    pub requested_identity: AssemblyIdentity,
    /// Requested identity after redirects; what the search looks for.
    pub effective_identity: AssemblyIdentity,
    /// Identity of the chosen file.
    pub resolved_identity: Option<AssemblyIdentity>,
    /// Chosen file; absent means unresolved.
    pub resolved_location: Option<FileLocation>,
    pub is_primary: bool,
    pub is_unified: bool,
    pub pre_unification_versions: Vec<PreUnificationVersion>,
    pub dependees: Vec<Dependee>,
    /// Primary item names that transitively required this reference.
    pub source_items: BTreeSet<String>,
    pub considered_locations: Vec<ConsideredLocation>,
    pub related_files: Vec<PathBuf>,
    pub satellite_files: Vec<PathBuf>,
    pub scatter_files: Vec<PathBuf>,
    pub serialization_assembly: Option<PathBuf>,
    pub copy_local: CopyLocalState,
    pub errors: Vec<ReferenceError>,
    pub conflict_state: ConflictState,
    pub is_framework_file: bool,
    /// Redist name when the policy classified this as in-framework.
    pub redist_name: Option<String>,
    /// In-framework and installed in the GAC (a prerequisite).
    pub is_prerequisite: bool,
    /// The GAC has some version of this identity, wherever it resolved from.
    pub found_in_gac: bool,
    pub is_winmd: bool,
    pub runtime_version: Option<String>,
    pub framework_name: Option<String>,
    /// Dependencies enumerated from the chosen file's metadata.
    pub probed_references: Vec<AssemblyIdentity>,

    // Item metadata carried from the requesting project item.
    pub private_setting: Option<bool>,
    pub embed_interop_types: bool,
    pub specific_version: bool,
    pub externally_resolved: bool,
    pub hint_path: Option<PathBuf>,
    pub executable_extension: Option<String>,
    pub sub_type: Option<String>,
}

impl Reference {
    /// Fresh unresolved node for a requested identity.
    pub fn new(requested: AssemblyIdentity, is_primary: bool) -> Self {
        Self {
            effective_identity: requested.clone(),
            requested_identity: requested,
            resolved_identity: None,
            resolved_location: None,
            is_primary,
            is_unified: false,
            pre_unification_versions: Vec::new(),
            dependees: Vec::new(),
            source_items: BTreeSet::new(),
            considered_locations: Vec::new(),
            related_files: Vec::new(),
            satellite_files: Vec::new(),
            scatter_files: Vec::new(),
            serialization_assembly: None,
            copy_local: CopyLocalState::Undecided,
            errors: Vec::new(),
            conflict_state: ConflictState::None,
            is_framework_file: false,
            redist_name: None,
            is_prerequisite: false,
            found_in_gac: false,
            is_winmd: false,
            runtime_version: None,
            framework_name: None,
            probed_references: Vec::new(),
            private_setting: None,
            embed_interop_types: false,
            specific_version: false,
            externally_resolved: false,
            hint_path: None,
            executable_extension: None,
            sub_type: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_location.is_some()
    }

    pub fn is_victim(&self) -> bool {
        matches!(self.conflict_state, ConflictState::Victim { .. })
    }

    /// The identity conflicts are judged by: resolved if available,
    /// effective otherwise.
    pub fn comparison_identity(&self) -> &AssemblyIdentity {
        self.resolved_identity
            .as_ref()
            .unwrap_or(&self.effective_identity)
    }

    pub fn simple_key(&self) -> SimpleKey {
        self.effective_identity.simple_key()
    }

    /// Record that `parent` (asking for `requested`) depends on this node.
    pub fn add_dependee(&mut self, parent: ReferenceId, requested: AssemblyIdentity) {
        if !self
            .dependees
            .iter()
            .any(|d| d.id == parent && d.requested == requested)
        {
            self.dependees.push(Dependee {
                id: parent,
                requested,
            });
        }
    }
}

/// Owner of every reference; lookup by id, strict identity, or simple key.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    entries: Vec<Option<Reference>>,
    by_simple: HashMap<SimpleKey, Vec<ReferenceId>>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: Reference) -> ReferenceId {
        let id = self.entries.len();
        self.by_simple
            .entry(reference.simple_key())
            .or_default()
            .push(id);
        self.entries.push(Some(reference));
        id
    }

    pub fn get(&self, id: ReferenceId) -> Option<&Reference> {
        self.entries.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ReferenceId) -> Option<&mut Reference> {
        self.entries.get_mut(id).and_then(Option::as_mut)
    }

    /// Live entries with the given simple identity, in insertion order.
    pub fn find_simple(&self, key: &SimpleKey) -> Vec<ReferenceId> {
        self.by_simple
            .get(key)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|&id| self.get(id).is_some())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The live entry whose effective identity strictly equals `identity`.
    pub fn find_strict(&self, identity: &AssemblyIdentity) -> Option<ReferenceId> {
        self.find_simple(&identity.simple_key())
            .into_iter()
            .find(|&id| {
                self.get(id)
                    .map(|r| {
                        r.effective_identity.version_or_zero() == identity.version_or_zero()
                    })
                    .unwrap_or(false)
            })
    }

    /// Remove `id` and every edge into it. Non-primary dependencies that
    /// lose their last dependee are removed as well.
    pub fn remove(&mut self, id: ReferenceId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let was_present = self
                .entries
                .get_mut(current)
                .and_then(Option::take)
                .is_some();
            if !was_present {
                continue;
            }
            for other_id in 0..self.entries.len() {
                let orphaned = {
                    let Some(other) = self.entries[other_id].as_mut() else {
                        continue;
                    };
                    other.dependees.retain(|d| d.id != current);
                    !other.is_primary && other.dependees.is_empty()
                };
                if orphaned && other_id != current {
                    pending.push(other_id);
                }
            }
        }
    }

    /// Ids of live entries, in insertion order.
    pub fn ids(&self) -> Vec<ReferenceId> {
        (0..self.entries.len())
            .filter(|&id| self.entries[id].is_some())
            .collect()
    }

    /// Ids ordered primaries-first (insertion order within each group),
    /// the order the decision log presents reference blocks in.
    pub fn ids_primaries_first(&self) -> Vec<ReferenceId> {
        let mut ids = self.ids();
        ids.sort_by_key(|&id| {
            let primary = self.get(id).map(|r| r.is_primary).unwrap_or(false);
            (!primary, id)
        });
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReferenceId, &Reference)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|r| (id, r)))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when any live reference has the given simple name.
    pub fn depends_on(&self, simple_name: &str) -> bool {
        self.iter()
            .any(|(_, r)| r.effective_identity.simple_name.eq_ignore_ascii_case(simple_name))
    }
}
