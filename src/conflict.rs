//! # Conflict Resolution
//!
//! A conflict is a set of live references sharing a simple identity but
//! requesting distinct versions. For each conflict set the resolver picks
//! exactly one winner:
//!
//! 1. primaries beat dependencies;
//! 2. higher versions beat lower ones;
//! 3. a newer chosen file beats an older one;
//! 4. a higher-priority (lower-index) search-path entry wins.
//!
//! Losers are marked victims with the reason the deciding rule implies.
//! Two primaries that disagree form an insoluble conflict: the higher
//! version is still marked victor so downstream consumers get one answer,
//! but both primaries stay in the output tables and diagnostics escalate
//! to warnings.
//!
//! Every conflict with a winner also yields a suggested binding redirect
//! (`0.0.0.0-<winner> → <winner>`); in auto-unify mode the engine feeds
//! these back into the redirect set and recomputes the closure once.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::identity::SimpleKey;
use crate::redirect::{BindingRedirect, RedirectSource, VersionRange};
use crate::reference::{
    ConflictLossReason, ConflictState, Reference, ReferenceId, ReferenceTable,
};

/// One resolved conflict: the winner and its victims, for diagnostics.
#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    pub winner: ReferenceId,
    pub victims: Vec<(ReferenceId, ConflictLossReason)>,
    pub insoluble: bool,
}

/// Everything conflict resolution produced.
#[derive(Debug, Default)]
pub struct ConflictOutcome {
    pub conflicts: Vec<ResolvedConflict>,
    pub suggested_redirects: Vec<BindingRedirect>,
}

/// Detect and resolve all conflicts in `table`.
pub fn resolve_conflicts(table: &mut ReferenceTable) -> ConflictOutcome {
    let mut outcome = ConflictOutcome::default();

    // Group live ids by simple identity. BTreeMap keeps conflict order
    // deterministic across runs.
    let mut groups: BTreeMap<SimpleKey, Vec<ReferenceId>> = BTreeMap::new();
    for (id, reference) in table.iter() {
        groups.entry(reference.simple_key()).or_default().push(id);
    }

    for (_, ids) in groups {
        if ids.len() < 2 {
            continue;
        }
        let resolved = resolve_group(table, &ids);

        for &(victim_id, reason) in &resolved.victims {
            if let Some(victim) = table.get_mut(victim_id) {
                victim.conflict_state = ConflictState::Victim {
                    reason,
                    winner: resolved.winner,
                };
            }
        }
        let Some(winner) = table.get_mut(resolved.winner) else {
            continue;
        };
        let suggestion = {
            winner.conflict_state = ConflictState::Victor;
            winner.comparison_identity().version.map(|version| BindingRedirect {
                identity: winner.comparison_identity().partial(),
                old_versions: VersionRange {
                    low: crate::identity::AssemblyVersion::ZERO,
                    high: version,
                },
                new_version: version,
                source: RedirectSource::AutoUnify,
            })
        };
        if let Some(redirect) = suggestion {
            if !resolved.victims.is_empty() {
                outcome.suggested_redirects.push(redirect);
            }
        }
        outcome.conflicts.push(resolved);
    }

    outcome
}

fn resolve_group(table: &ReferenceTable, ids: &[ReferenceId]) -> ResolvedConflict {
    let mut ordered: Vec<ReferenceId> = ids.to_vec();
    ordered.sort_by(|&a, &b| match (table.get(a), table.get(b)) {
        (Some(left), Some(right)) => rank(left, right).then_with(|| a.cmp(&b)),
        _ => a.cmp(&b),
    });

    let winner = ordered[0];
    let winner_primary = table.get(winner).map(|r| r.is_primary).unwrap_or(false);
    let winner_version = table
        .get(winner)
        .map(|r| r.comparison_identity().version_or_zero())
        .unwrap_or_default();
    let primaries = ids
        .iter()
        .filter(|&&id| table.get(id).map(|r| r.is_primary).unwrap_or(false))
        .count();
    let insoluble = primaries >= 2;

    let victims = ordered[1..]
        .iter()
        .filter_map(|&id| {
            let loser = table.get(id)?;
            let reason = if insoluble && loser.is_primary {
                ConflictLossReason::InsolubleConflict
            } else if winner_primary && !loser.is_primary {
                ConflictLossReason::WasNotPrimary
            } else if loser.comparison_identity().version_or_zero() < winner_version {
                ConflictLossReason::HadLowerVersion
            } else {
                ConflictLossReason::FusionEquivalentWithSameVersion
            };
            Some((id, reason))
        })
        .collect();

    ResolvedConflict {
        winner,
        victims,
        insoluble,
    }
}

/// Winner-selection ordering: `Less` means `left` beats `right`.
fn rank(left: &Reference, right: &Reference) -> Ordering {
    // Rule 1: prefer primaries.
    right
        .is_primary
        .cmp(&left.is_primary)
        // Rule 2: prefer the higher version.
        .then_with(|| {
            right
                .comparison_identity()
                .version_or_zero()
                .cmp(&left.comparison_identity().version_or_zero())
        })
        // Rule 3: prefer the newer chosen file.
        .then_with(|| {
            let mtime = |r: &Reference| {
                r.resolved_location
                    .as_ref()
                    .and_then(|l| l.modified)
                    .unwrap_or(i64::MIN)
            };
            mtime(right).cmp(&mtime(left))
        })
        // Rule 4: prefer the higher-priority search-path entry.
        .then_with(|| {
            let index = |r: &Reference| {
                r.resolved_location
                    .as_ref()
                    .map(|l| l.search_path_index)
                    .unwrap_or(usize::MAX)
            };
            index(left).cmp(&index(right))
        })
}
