use crate::{
    MAX_ENTITY_NAME_LEN, MAX_FIELD_NAME_LEN,
    field::{FieldDecl, Provenance},
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

///
/// Fragment
///
/// One component's contribution to an entity: declared fields, the bases it
/// extends, delegation declarations, and classification metadata. Immutable
/// once registered; owned (shared) by the registry.
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct Fragment {
    /// Contributing component/module id.
    pub origin: String,
    /// Entity this fragment targets.
    pub entity_name: String,
    /// Entity names this fragment extends, declaration order.
    pub extends: Vec<String>,
    /// Declared fields, one declaration per name within a fragment.
    pub fields: BTreeMap<String, FieldDecl>,
    /// Delegation declarations: local relation field -> target entity.
    pub delegations: BTreeMap<String, String>,
    /// Names removed from the composed field set.
    pub removed: BTreeSet<String>,
    pub abstract_entity: Option<bool>,
    pub transient: Option<bool>,
    pub rec_name: Option<String>,
    pub active_name: Option<String>,
}

impl Fragment {
    #[must_use]
    pub fn new(origin: impl Into<String>, entity_name: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            entity_name: entity_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn extend(mut self, entity_name: impl Into<String>) -> Self {
        let name = entity_name.into();
        if !self.extends.contains(&name) {
            self.extends.push(name);
        }
        self
    }

    /// Declare a field, stamping this fragment as its provenance.
    #[must_use]
    pub fn field(mut self, mut decl: FieldDecl) -> Self {
        decl.origin = Some(Provenance::new(&self.origin, &self.entity_name));
        self.fields.insert(decl.name.clone(), decl);
        self
    }

    /// Declare delegation of a local relation field to a target entity.
    #[must_use]
    pub fn delegate(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.delegations.insert(field.into(), target.into());
        self
    }

    /// Remove a name from the composed field set.
    #[must_use]
    pub fn remove(mut self, field: impl Into<String>) -> Self {
        self.removed.insert(field.into());
        self
    }

    #[must_use]
    pub const fn mark_abstract(mut self, value: bool) -> Self {
        self.abstract_entity = Some(value);
        self
    }

    #[must_use]
    pub const fn mark_transient(mut self, value: bool) -> Self {
        self.transient = Some(value);
        self
    }

    #[must_use]
    pub fn with_rec_name(mut self, field: impl Into<String>) -> Self {
        self.rec_name = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_active_name(mut self, field: impl Into<String>) -> Self {
        self.active_name = Some(field.into());
        self
    }

    /// Structural sanity of the fragment itself, before registration.
    pub(crate) fn validate(&self) -> Result<(), String> {
        validate_name("entity", &self.entity_name, MAX_ENTITY_NAME_LEN)?;
        if self.origin.is_empty() {
            return Err("fragment origin is empty".to_string());
        }
        for name in self.fields.keys() {
            validate_name("field", name, MAX_FIELD_NAME_LEN)?;
        }
        for field in self.delegations.keys() {
            validate_name("field", field, MAX_FIELD_NAME_LEN)?;
        }

        Ok(())
    }
}

/// Ensure identifiers are non-empty, ASCII, and within the maximum length.
pub(crate) fn validate_name(what: &str, name: &str, max_len: usize) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{what} name is empty"));
    }
    if name.len() > max_len {
        return Err(format!("{what} name '{name}' exceeds max length {max_len}"));
    }
    if !name.is_ascii() {
        return Err(format!("{what} name '{name}' must be ASCII"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageKind;

    #[test]
    fn declared_fields_carry_fragment_provenance() {
        let fragment = Fragment::new("sale", "line")
            .field(FieldDecl::stored("name", StorageKind::Text))
            .field(FieldDecl::stored("qty", StorageKind::Int).default_value(1_i64));

        let qty = fragment.fields.get("qty").expect("declared field present");
        let origin = qty.origin.as_ref().expect("provenance stamped");
        assert_eq!(origin.origin, "sale");
        assert_eq!(origin.entity, "line");
    }

    #[test]
    fn duplicate_extends_collapse_in_declaration_order() {
        let fragment = Fragment::new("sale", "line")
            .extend("mixin")
            .extend("audit")
            .extend("mixin");

        assert_eq!(fragment.extends, vec!["mixin", "audit"]);
    }

    #[test]
    fn validation_rejects_bad_identifiers() {
        let long = "x".repeat(MAX_ENTITY_NAME_LEN + 1);
        assert!(Fragment::new("sale", long).validate().is_err());
        assert!(Fragment::new("sale", "ligne_commandé").validate().is_err());
        assert!(Fragment::new("", "line").validate().is_err());
        assert!(Fragment::new("sale", "line").validate().is_ok());
    }
}
