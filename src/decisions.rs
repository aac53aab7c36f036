//! # Decision Log
//!
//! Structured, append-only record of every choice the resolver makes. The
//! log is the resolver's explanation of itself: inputs first, then one
//! block per reference (primaries before dependencies), then conflicts,
//! then suggested redirects, then everything advisory that happened along
//! the way.
//!
//! The backend is pluggable: the library ships a `log`-crate bridge for
//! CLI diagnostics and a null backend for embedding. Events are always
//! retained in order regardless of backend, so two invocations with equal
//! inputs produce equal event sequences.

use serde::Serialize;

use crate::reference::{ConflictLossReason, CopyLocalState, UnificationReason};

/// Diagnostic codes used in warnings and errors.
pub mod codes {
    pub const RESOLUTION_FAILED: &str = "RS1001";
    pub const CONFLICT: &str = "RS1002";
    pub const INSOLUBLE_CONFLICT: &str = "RS1003";
    pub const ARCH_MISMATCH: &str = "RS1004";
    pub const DEPENDENCY_FAILED: &str = "RS1005";
    pub const BAD_IMAGE: &str = "RS1006";
    pub const INVALID_PARAMETER: &str = "RS1007";
    pub const INVALID_CONFIG_FILE: &str = "RS1008";
}

/// Whether a reference block describes a primary or a discovered
/// dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReferenceKind {
    Primary,
    Dependency,
}

/// One event of the decision stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum Decision {
    Input {
        name: String,
        value: String,
    },
    PrimaryOrDependency {
        identity: String,
        reference_kind: ReferenceKind,
    },
    Considered {
        location: String,
        reason: Option<String>,
    },
    Resolved {
        identity: String,
        location: String,
    },
    Unified {
        identity: String,
        from: String,
        to: String,
        reason: UnificationReason,
    },
    Conflict {
        winner: String,
        loser: String,
        reason: ConflictLossReason,
    },
    SuggestedRedirect {
        identity: String,
        new_version: String,
    },
    CopyLocalDecision {
        identity: String,
        state: CopyLocalState,
    },
    ExclusionApplied {
        identity: String,
        subset: String,
    },
    Advisory {
        message: String,
    },
    Warning {
        code: String,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Decision {
    /// Events belonging to the per-reference block, suppressed by `silent`.
    fn is_reference_block(&self) -> bool {
        matches!(
            self,
            Decision::PrimaryOrDependency { .. }
                | Decision::Considered { .. }
                | Decision::Resolved { .. }
                | Decision::Unified { .. }
                | Decision::CopyLocalDecision { .. }
        )
    }
}

/// Sink receiving events as they are sequenced.
pub trait DecisionBackend: Send {
    fn emit(&mut self, event: &Decision);
}

/// Backend discarding everything; the log still retains its events.
#[derive(Debug, Default)]
pub struct NullBackend;

impl DecisionBackend for NullBackend {
    fn emit(&mut self, _event: &Decision) {}
}

/// Backend bridging onto the `log` crate for CLI diagnostics.
#[derive(Debug, Default)]
pub struct LogBackend;

impl DecisionBackend for LogBackend {
    fn emit(&mut self, event: &Decision) {
        match event {
            Decision::Error { code, message } => log::error!("{code}: {message}"),
            Decision::Warning { code, message } => log::warn!("{code}: {message}"),
            Decision::Advisory { message } => log::info!("{message}"),
            Decision::Input { name, value } => log::debug!("input {name} = {value}"),
            Decision::PrimaryOrDependency {
                identity,
                reference_kind,
            } => log::info!("{reference_kind:?} reference: {identity}"),
            Decision::Considered { location, reason } => match reason {
                Some(reason) => log::debug!("considered {location}: {reason}"),
                None => log::debug!("considered {location}"),
            },
            Decision::Resolved { identity, location } => {
                log::info!("resolved {identity} -> {location}")
            }
            Decision::Unified {
                identity,
                from,
                to,
                reason,
            } => log::info!("unified {identity}: {from} -> {to} ({reason:?})"),
            Decision::Conflict {
                winner,
                loser,
                reason,
            } => log::info!("conflict: '{winner}' beat '{loser}' ({reason:?})"),
            Decision::SuggestedRedirect {
                identity,
                new_version,
            } => log::info!("suggested redirect: {identity} -> {new_version}"),
            Decision::CopyLocalDecision { identity, state } => {
                log::debug!("copy-local {identity}: {state:?}")
            }
            Decision::ExclusionApplied { identity, subset } => {
                log::info!("excluded {identity} (not in subset '{subset}')")
            }
        }
    }
}

/// The ordered decision stream under construction.
pub struct DecisionLog {
    backend: Box<dyn DecisionBackend>,
    silent: bool,
    verbose_search: bool,
    events: Vec<Decision>,
    /// Advisories, warnings and errors raised mid-run; they are sequenced
    /// into the trailing exceptions section by `finish`.
    trailing: Vec<Decision>,
    error_count: usize,
    warning_count: usize,
}

impl DecisionLog {
    pub fn new(backend: Box<dyn DecisionBackend>, silent: bool, verbose_search: bool) -> Self {
        Self {
            backend,
            silent,
            verbose_search,
            events: Vec::new(),
            trailing: Vec::new(),
            error_count: 0,
            warning_count: 0,
        }
    }

    /// Record a sequenced event (inputs, reference blocks, conflicts,
    /// suggested redirects).
    pub fn record(&mut self, event: Decision) {
        let suppress = (self.silent && event.is_reference_block())
            || (matches!(event, Decision::Considered { .. }) && !self.verbose_search);
        if !suppress {
            self.backend.emit(&event);
        }
        self.events.push(event);
    }

    /// Record an advisory for the trailing section.
    pub fn advisory(&mut self, message: impl Into<String>) {
        let event = Decision::Advisory {
            message: message.into(),
        };
        self.backend.emit(&event);
        self.trailing.push(event);
    }

    /// Record a warning for the trailing section.
    pub fn warning(&mut self, code: &str, message: impl Into<String>) {
        let event = Decision::Warning {
            code: code.to_string(),
            message: message.into(),
        };
        self.backend.emit(&event);
        self.warning_count += 1;
        self.trailing.push(event);
    }

    /// Record an error for the trailing section. Any error makes the
    /// invocation unsuccessful.
    pub fn error(&mut self, code: &str, message: impl Into<String>) {
        let event = Decision::Error {
            code: code.to_string(),
            message: message.into(),
        };
        self.backend.emit(&event);
        self.error_count += 1;
        self.trailing.push(event);
    }

    /// Seal the log: the trailing section is appended after everything
    /// sequenced so far.
    pub fn finish(&mut self) {
        self.events.append(&mut self.trailing);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn events(&self) -> &[Decision] {
        &self.events
    }

    pub fn into_events(mut self) -> Vec<Decision> {
        self.finish();
        self.events
    }
}
