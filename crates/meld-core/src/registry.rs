use crate::{
    composite::{EntityType, SetupState},
    diag::{Diagnostic, DiagnosticLog},
    field::FieldDecl,
    fragment::Fragment,
    types::StorageKind,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use thiserror::Error as ThisError;

/// Implicit universal base every concrete entity structurally depends on.
pub const ROOT_ENTITY: &str = "base";

///
/// RegistryError
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("entity '{entity}' extends unregistered entity '{base}'")]
    UnknownBase { entity: String, base: String },

    #[error("fragment '{origin}' flips {what} classification of entity '{entity}'")]
    ClassificationFlip {
        entity: String,
        origin: String,
        what: &'static str,
    },

    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    #[error("entity '{0}' has not completed setup")]
    NotReady(String),
}

///
/// Registry
///
/// The name -> EntityType table for one build. An explicit context object
/// with a build/teardown lifecycle: independent registries never share
/// mutable state, so parallel builds (test fixtures, workers) are safe.
/// Callers must serialize register/setup/dynamic-merge against one registry.
///

#[derive(Debug)]
pub struct Registry {
    entities: BTreeMap<String, EntityType>,
    pub(crate) diagnostics: DiagnosticLog,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry seeded with the universal root entity.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            entities: BTreeMap::new(),
            diagnostics: DiagnosticLog::new(),
        };

        let root = Fragment::new("core", ROOT_ENTITY)
            .mark_abstract(true)
            .field(
                FieldDecl::stored("id", StorageKind::Int)
                    .required(true)
                    .readonly(true)
                    .copy(false),
            )
            .field(FieldDecl::computed("display_name", &[]).readonly(true));

        registry
            .register(root)
            .expect("seeding the root entity cannot fail");

        registry
    }

    /// Register one fragment: create the entity on first sight, append and
    /// mark for re-derivation otherwise.
    pub fn register(&mut self, fragment: Fragment) -> Result<(), RegistryError> {
        fragment.validate().map_err(RegistryError::InvalidFragment)?;

        let name = fragment.entity_name.clone();
        for base in &fragment.extends {
            if !self.entities.contains_key(base) {
                return Err(RegistryError::UnknownBase {
                    entity: name,
                    base: base.clone(),
                });
            }
        }

        let entity = self
            .entities
            .entry(name.clone())
            .or_insert_with(|| EntityType::new(&name));
        Self::apply_classification(entity, &fragment)?;
        if let Some(rec_name) = &fragment.rec_name {
            entity.rec_name = Some(rec_name.clone());
        }
        if let Some(active_name) = &fragment.active_name {
            entity.active_name = Some(active_name.clone());
        }

        let bases = fragment.extends.clone();
        entity.fragments.push(Arc::new(fragment));

        for base in &bases {
            if base != &name
                && let Some(base_entity) = self.entities.get_mut(base)
            {
                base_entity.children.insert(name.clone());
            }
        }

        self.mark_pending(&name);
        Ok(())
    }

    /// Classification must agree across every fragment targeting the entity.
    fn apply_classification(
        entity: &mut EntityType,
        fragment: &Fragment,
    ) -> Result<(), RegistryError> {
        for (what, prior, declared) in [
            (
                "abstract",
                entity
                    .fragments
                    .iter()
                    .find_map(|f| f.abstract_entity),
                fragment.abstract_entity,
            ),
            (
                "transient",
                entity.fragments.iter().find_map(|f| f.transient),
                fragment.transient,
            ),
        ] {
            match (prior, declared) {
                (Some(prior), Some(declared)) if prior != declared => {
                    return Err(RegistryError::ClassificationFlip {
                        entity: entity.name.clone(),
                        origin: fragment.origin.clone(),
                        what,
                    });
                }
                (None, Some(declared)) => match what {
                    "abstract" => entity.abstract_entity = declared,
                    _ => entity.transient = declared,
                },
                _ => {}
            }
        }

        Ok(())
    }

    /// Run the setup pipeline over every pending entity.
    pub fn setup(&mut self) -> Result<(), crate::pipeline::SetupError> {
        crate::pipeline::run(self)
    }

    /// Look up an entity regardless of setup state.
    pub fn get(&self, name: &str) -> Result<&EntityType, RegistryError> {
        self.entities
            .get(name)
            .ok_or_else(|| RegistryError::UnknownEntity(name.to_string()))
    }

    /// Read API for business-rule modules: valid only after setup completed.
    pub fn composite_type(&self, name: &str) -> Result<&EntityType, RegistryError> {
        let entity = self.get(name)?;
        if !entity.is_setup_done() {
            return Err(RegistryError::NotReady(name.to_string()));
        }

        Ok(entity)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut EntityType, RegistryError> {
        self.entities
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownEntity(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Entity names in deterministic order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntityType)> {
        self.entities.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Transitive closure of the entities to re-derive when `name` changes:
    /// entities extending it plus entities delegating into it.
    #[must_use]
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            let Some(entity) = self.entities.get(&current) else {
                continue;
            };
            for dependent in entity.children.iter().chain(&entity.delegation_dependents) {
                if found.insert(dependent.clone()) {
                    stack.push(dependent.clone());
                }
            }
        }

        found
    }

    /// Mark an entity and every descendant for re-derivation.
    pub(crate) fn mark_pending(&mut self, name: &str) {
        let affected = self.descendants(name);
        if let Some(entity) = self.entities.get_mut(name) {
            entity.state = SetupState::Pending;
        }
        for name in affected {
            if let Some(entity) = self.entities.get_mut(&name) {
                entity.state = SetupState::Pending;
            }
        }
    }

    /// Release every entity type; used between independent builds. Never
    /// touches another registry's state.
    pub fn teardown(&mut self) {
        self.entities.clear();
        self.diagnostics.clear();
    }

    /// Structured non-fatal findings from pipeline and dynamic-field runs.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.entries()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.drain()
    }
}
