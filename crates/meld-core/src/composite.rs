use crate::{
    field::{Field, FieldDecl},
    fragment::Fragment,
};
use derive_more::Display;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

///
/// SetupState
///

#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq, Serialize)]
pub enum SetupState {
    #[default]
    Pending,
    StructuralDone,
    SetupDone,
}

///
/// EntityType
///
/// The merged runtime type for one entity name. Created the first time the
/// name is registered, re-derived (never destroyed) whenever a new fragment
/// extends it; lives for the registry's lifetime.
///

#[derive(Clone, Debug)]
pub struct EntityType {
    pub name: String,
    /// Contributing fragments, registration order.
    pub fragments: Vec<Arc<Fragment>>,
    /// Structural bases, lowest override-precedence first; duplicates
    /// collapsed to their most recent position.
    pub bases: Vec<String>,
    /// Authoritative field mapping, exactly one field per name.
    pub fields: BTreeMap<String, Arc<Field>>,
    /// Delegation targets: comodel name -> local relation field.
    pub delegated_from: BTreeMap<String, String>,
    /// Entities whose bases include this one; used for re-derivation.
    pub children: BTreeSet<String>,
    /// Entities delegating into this one; re-derived when this one changes.
    /// Never pruned, a stale entry only re-derives redundantly.
    pub delegation_dependents: BTreeSet<String>,
    /// Field declarations patched in from persisted metadata, lowest
    /// priority in every override chain.
    pub dynamic_decls: BTreeMap<String, FieldDecl>,
    pub state: SetupState,
    pub abstract_entity: bool,
    pub transient: bool,
    pub rec_name: Option<String>,
    pub active_name: Option<String>,
}

impl EntityType {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fragments: Vec::new(),
            bases: Vec::new(),
            fields: BTreeMap::new(),
            delegated_from: BTreeMap::new(),
            children: BTreeSet::new(),
            delegation_dependents: BTreeSet::new(),
            dynamic_decls: BTreeMap::new(),
            state: SetupState::Pending,
            abstract_entity: false,
            transient: false,
            rec_name: None,
            active_name: None,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    #[must_use]
    pub const fn is_setup_done(&self) -> bool {
        matches!(self.state, SetupState::SetupDone)
    }

    /// Delegation declarations merged across fragments; a later fragment
    /// re-targeting a field wins.
    #[must_use]
    pub fn delegations(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for fragment in &self.fragments {
            for (field, target) in &fragment.delegations {
                merged.insert(field.clone(), target.clone());
            }
        }

        merged
    }

    /// Names removed by any contributing fragment.
    #[must_use]
    pub fn removed_names(&self) -> BTreeSet<String> {
        let mut removed = BTreeSet::new();
        for fragment in &self.fragments {
            removed.extend(fragment.removed.iter().cloned());
        }

        removed
    }

    /// Code-declared override chain for one name, registration order.
    pub(crate) fn own_decls<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a FieldDecl> {
        self.fragments
            .iter()
            .filter_map(move |fragment| fragment.fields.get(name))
    }

    /// Field names declared by this entity's own fragments.
    pub(crate) fn own_declared_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for fragment in &self.fragments {
            names.extend(fragment.fields.keys().cloned());
        }

        names
    }
}

/// Collapse a base sequence into a stable ordered set: a name's position is
/// its most recent occurrence, its first occurrence decides nothing beyond
/// membership. Keeps override precedence deterministic for any fixed
/// registration order.
pub(crate) fn ordered_set_last_wins(names: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut collapsed = Vec::with_capacity(names.len());
    for name in names.iter().rev() {
        if seen.insert(name.clone()) {
            collapsed.push(name.clone());
        }
    }
    collapsed.reverse();

    collapsed
}
