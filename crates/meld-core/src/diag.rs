//! Build diagnostics boundary.
//!
//! Non-fatal findings (kind conflicts, skipped dynamic fields) are emitted
//! as structured events so callers can assert on them; they never change
//! the fatal/success outcome of a build.

use crate::field::FieldKind;
use derive_more::Display;
use serde::Serialize;

///
/// DynamicSkipReason
///

#[derive(Clone, Debug, Display, Eq, PartialEq, Serialize)]
pub enum DynamicSkipReason {
    #[display("backing column is missing")]
    BackingMissing,

    #[display("backing column shape {found} cannot hold declared kind {declared}")]
    ShapeMismatch { declared: String, found: String },

    #[display("comodel '{comodel}' is not registered")]
    ComodelMissing { comodel: String },

    #[display("entity '{entity}' is not registered")]
    EntityMissing { entity: String },

    #[display("manual field name must start with '{prefix}'")]
    BadName { prefix: &'static str },

    #[display("declared kind '{kind}' is not constructible")]
    UnknownKind { kind: String },
}

///
/// Diagnostic
///

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Diagnostic {
    /// An override chain mixed persisted and derived kinds with no
    /// acknowledgment; resolution proceeded last-wins.
    KindConflict {
        entity: String,
        field: String,
        /// Every contributing declaration that set a kind, chain order.
        origins: Vec<String>,
        kinds: Vec<FieldKind>,
    },

    /// A persisted field record failed validation and only that field was
    /// dropped from the merge.
    DynamicFieldSkipped {
        entity: String,
        field: String,
        reason: DynamicSkipReason,
    },

    /// A fragment removed a name no contributing fragment declares.
    RemovedUnknownField {
        entity: String,
        field: String,
        origin: String,
    },
}

///
/// DiagnosticSink
///

pub trait DiagnosticSink {
    fn emit(&mut self, diag: Diagnostic);
}

///
/// DiagnosticLog
/// Default collecting sink; owned by the registry for the build's lifetime.
///

#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    /// Kind conflicts recorded for one entity field.
    pub fn kind_conflicts(&self, entity: &str, field: &str) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |diag| {
            matches!(
                diag,
                Diagnostic::KindConflict { entity: e, field: f, .. }
                    if e == entity && f == field
            )
        })
    }
}

impl DiagnosticSink for DiagnosticLog {
    fn emit(&mut self, diag: Diagnostic) {
        self.entries.push(diag);
    }
}
