use crate::types::{AttrValue, Cardinality, OnDelete, StorageKind};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

///
/// FieldKind
///

#[derive(Clone, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[remain::sorted]
pub enum FieldKind {
    /// Derived in code; carries a dependency list, never a column.
    Computed,
    /// Synthesized pass-through to a delegation target. Never declared.
    Delegated,
    /// Derived by following a dotted path through a relation field.
    Related,
    /// Link to another entity.
    Relation,
    /// Persisted column of the given shape.
    Stored(StorageKind),
}

impl FieldKind {
    /// Whether this kind owns backing storage (a column on the entity's table).
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Stored(_) | Self::Relation)
    }

    /// Whether two kinds can share one override chain without acknowledgment.
    #[must_use]
    pub const fn agrees_with(&self, other: &Self) -> bool {
        self.is_persisted() == other.is_persisted()
    }
}

///
/// Provenance
/// Which fragment (and entity) a declaration came from.
///

#[derive(Clone, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[display("{origin}({entity})")]
pub struct Provenance {
    pub origin: String,
    pub entity: String,
}

impl Provenance {
    #[must_use]
    pub fn new(origin: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            entity: entity.into(),
        }
    }
}

///
/// FieldDecl
///
/// One fragment's declaration of a named attribute. Every parameter is
/// optional so the resolver can tell "explicitly set" from "inherited":
/// an override chain merges attribute-by-attribute, not whole-object.
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FieldDecl {
    pub name: String,
    pub origin: Option<Provenance>,
    pub kind: Option<FieldKind>,
    pub required: Option<bool>,
    pub readonly: Option<bool>,
    pub copy: Option<bool>,
    pub restricted: Option<bool>,
    pub default: Option<AttrValue>,
    pub depends: Option<Vec<String>>,
    pub related: Option<String>,
    pub comodel: Option<String>,
    pub cardinality: Option<Cardinality>,
    pub on_delete: Option<OnDelete>,
    /// Acknowledges a kind change over earlier declarations of this name.
    pub supersedes: bool,
    /// Sourced from persisted metadata rather than code.
    pub dynamic: bool,

    /// Shared resolved form for the single-declaration fast path.
    /// Filled at most once; safe to share across registries because the
    /// declaration itself is immutable after registration.
    #[serde(skip)]
    pub(crate) resolved: OnceLock<Arc<Field>>,
}

impl FieldDecl {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stored(name: impl Into<String>, shape: StorageKind) -> Self {
        let mut decl = Self::new(name);
        decl.kind = Some(FieldKind::Stored(shape));
        decl
    }

    #[must_use]
    pub fn computed(name: impl Into<String>, depends: &[&str]) -> Self {
        let mut decl = Self::new(name);
        decl.kind = Some(FieldKind::Computed);
        decl.depends = Some(depends.iter().map(ToString::to_string).collect());
        decl
    }

    #[must_use]
    pub fn related(name: impl Into<String>, path: impl Into<String>) -> Self {
        let mut decl = Self::new(name);
        decl.kind = Some(FieldKind::Related);
        decl.related = Some(path.into());
        decl
    }

    #[must_use]
    pub fn relation(name: impl Into<String>, comodel: impl Into<String>) -> Self {
        let mut decl = Self::new(name);
        decl.kind = Some(FieldKind::Relation);
        decl.comodel = Some(comodel.into());
        decl
    }

    #[must_use]
    pub fn required(mut self, value: bool) -> Self {
        self.required = Some(value);
        self
    }

    #[must_use]
    pub fn readonly(mut self, value: bool) -> Self {
        self.readonly = Some(value);
        self
    }

    #[must_use]
    pub fn copy(mut self, value: bool) -> Self {
        self.copy = Some(value);
        self
    }

    #[must_use]
    pub fn restricted(mut self, value: bool) -> Self {
        self.restricted = Some(value);
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<AttrValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn cardinality(mut self, value: Cardinality) -> Self {
        self.cardinality = Some(value);
        self
    }

    #[must_use]
    pub fn on_delete(mut self, value: OnDelete) -> Self {
        self.on_delete = Some(value);
        self
    }

    #[must_use]
    pub fn supersedes(mut self) -> Self {
        self.supersedes = true;
        self
    }

    /// Direct declarations (persisted, no cross-entity derivation) are the
    /// only ones eligible for the shared fast path.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.related.is_none()
            && self
                .kind
                .as_ref()
                .is_some_and(|kind| matches!(kind, FieldKind::Stored(_) | FieldKind::Relation))
    }
}

///
/// Field
///
/// The single authoritative resolution of one override chain. Merged fields
/// are always registry-local; unmerged direct fields are shared across
/// registries through the declaration's resolved cell (identity is used as
/// a cache key for per-instance computed state, so shared fields must never
/// have been touched by override, inheritance, or delegation).
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub readonly: bool,
    pub copy: bool,
    pub restricted: bool,
    pub default: Option<AttrValue>,
    pub depends: Vec<String>,
    pub related: Option<String>,
    pub comodel: Option<String>,
    pub cardinality: Cardinality,
    pub on_delete: Option<OnDelete>,
    /// Local relation field a delegated field reads through.
    pub delegated_via: Option<String>,
    /// Contributing declarations, chain order (lowest precedence first).
    pub origins: Vec<Provenance>,
    /// True when no code fragment declares the name.
    pub dynamic: bool,
}

impl Field {
    /// Kind-dependent fallbacks for attributes no declaration set.
    #[must_use]
    pub(crate) const fn implied_readonly(kind: &FieldKind) -> bool {
        !kind.is_persisted()
    }

    #[must_use]
    pub(crate) const fn implied_copy(kind: &FieldKind) -> bool {
        kind.is_persisted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_declarations_are_persisted_kinds_only() {
        assert!(FieldDecl::stored("name", StorageKind::Text).is_direct());
        assert!(FieldDecl::relation("partner_id", "partner").is_direct());
        assert!(!FieldDecl::computed("total", &["qty"]).is_direct());
        assert!(!FieldDecl::related("carrier", "tracking_id.carrier").is_direct());
        assert!(!FieldDecl::new("untyped").is_direct());
    }

    #[test]
    fn kind_agreement_splits_on_persistence() {
        let stored = FieldKind::Stored(StorageKind::Int);
        assert!(stored.agrees_with(&FieldKind::Relation));
        assert!(FieldKind::Computed.agrees_with(&FieldKind::Related));
        assert!(!stored.agrees_with(&FieldKind::Computed));
    }

    #[test]
    fn builder_setters_mark_attributes_explicit() {
        let decl = FieldDecl::stored("qty", StorageKind::Int)
            .required(true)
            .default_value(1_i64);

        assert_eq!(decl.required, Some(true));
        assert_eq!(decl.default, Some(AttrValue::Int(1)));
        assert_eq!(decl.readonly, None, "unset attributes must stay None");
    }
}
