//! Dependency-ordered setup pipeline.
//!
//! Drives every pending entity through two phases: structural (bases,
//! override chains, delegated fields) then semantic (computed/related
//! wiring and metadata checks). Both phases are deterministic for a fixed
//! fragment-registration order, and re-running on an unchanged registry is
//! a no-op.

use crate::{
    composite::{SetupState, ordered_set_last_wins},
    diag::{Diagnostic, DiagnosticLog, DiagnosticSink},
    error::ErrorTree,
    field::{Field, FieldDecl, FieldKind},
    fragment::Fragment,
    registry::{ROOT_ENTITY, Registry, RegistryError},
    resolve::{ResolveError, resolve_chain},
    types::Cardinality,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use thiserror::Error as ThisError;

///
/// SetupError
///

#[derive(Debug, ThisError)]
pub enum SetupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("base cycle detected through entity '{0}'")]
    BaseCycle(String),

    #[error("delegation cycle among entities: {}", .0.join(", "))]
    DelegationCycle(Vec<String>),

    #[error("delegation field '{field}' on entity '{entity}' is invalid: {reason}")]
    InvalidDelegation {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("semantic validation failed:\n{0}")]
    Validation(ErrorTree),
}

/// Run both phases over every pending entity.
pub(crate) fn run(registry: &mut Registry) -> Result<(), SetupError> {
    let pending: Vec<String> = registry
        .iter()
        .filter(|(_, entity)| entity.state == SetupState::Pending)
        .map(|(name, _)| name.to_string())
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    structural(registry, &pending)?;
    semantic(registry, &pending)
}

// ---------------------------------------------------------------------------
// Structural pass
// ---------------------------------------------------------------------------

fn structural(registry: &mut Registry, pending: &[String]) -> Result<(), SetupError> {
    recompute_bases(registry, pending)?;
    for name in pending {
        resolve_entity_fields(registry, name)?;
    }
    merge_delegations(registry, pending)
}

/// Recompute `bases` for every pending entity from its fragments and the
/// current bases of everything it extends.
fn recompute_bases(registry: &mut Registry, pending: &[String]) -> Result<(), SetupError> {
    // Bases as they were before this run; self-extension splices these in
    // instead of recursing.
    let prior: BTreeMap<String, Vec<String>> = registry
        .iter()
        .map(|(name, entity)| (name.to_string(), entity.bases.clone()))
        .collect();

    let mut memo = BTreeMap::new();
    for name in pending {
        let mut visiting = BTreeSet::new();
        linearize(registry, name, &prior, &mut memo, &mut visiting)?;
    }
    for name in pending {
        let bases = memo
            .get(name)
            .cloned()
            .unwrap_or_default();
        registry.get_mut(name)?.bases = bases;
    }

    Ok(())
}

fn linearize(
    registry: &Registry,
    name: &str,
    prior: &BTreeMap<String, Vec<String>>,
    memo: &mut BTreeMap<String, Vec<String>>,
    visiting: &mut BTreeSet<String>,
) -> Result<Vec<String>, SetupError> {
    if let Some(done) = memo.get(name) {
        return Ok(done.clone());
    }
    if !visiting.insert(name.to_string()) {
        return Err(SetupError::BaseCycle(name.to_string()));
    }

    let entity = registry.get(name)?;
    let mut seq = Vec::new();
    if name != ROOT_ENTITY {
        seq.push(ROOT_ENTITY.to_string());
    }
    for fragment in &entity.fragments {
        for base in &fragment.extends {
            if base == name {
                seq.extend(prior.get(name).cloned().unwrap_or_default());
            } else {
                seq.extend(linearize(registry, base, prior, memo, visiting)?);
                seq.push(base.clone());
            }
        }
    }

    let collapsed = ordered_set_last_wins(&seq);
    visiting.remove(name);
    memo.insert(name.to_string(), collapsed.clone());

    Ok(collapsed)
}

/// One contributing entity in an override chain: its fragments plus any
/// dynamic declarations patched onto it.
struct Source {
    fragments: Vec<Arc<Fragment>>,
    dynamic: BTreeMap<String, FieldDecl>,
}

/// Resolve every override chain for one entity (delegated fields come later).
fn resolve_entity_fields(registry: &mut Registry, name: &str) -> Result<(), SetupError> {
    let entity = registry.get(name)?;
    let mut source_names = entity.bases.clone();
    source_names.push(name.to_string());

    let mut sources = Vec::with_capacity(source_names.len());
    for source_name in &source_names {
        let source = registry.get(source_name)?;
        sources.push(Source {
            fragments: source.fragments.clone(),
            dynamic: source.dynamic_decls.clone(),
        });
    }

    // Union of declared names, then explicit removals.
    let mut names = BTreeSet::new();
    let mut removed: BTreeMap<String, String> = BTreeMap::new();
    for source in &sources {
        for fragment in &source.fragments {
            names.extend(fragment.fields.keys().cloned());
            for field in &fragment.removed {
                removed.insert(field.clone(), fragment.origin.clone());
            }
        }
        names.extend(source.dynamic.keys().cloned());
    }

    let mut log = DiagnosticLog::new();
    for (field, origin) in &removed {
        if !names.contains(field) {
            log.emit(Diagnostic::RemovedUnknownField {
                entity: name.to_string(),
                field: field.clone(),
                origin: origin.clone(),
            });
        }
    }

    let removed_names: BTreeSet<String> = removed.keys().cloned().collect();
    let mut fields = BTreeMap::new();
    for field_name in names.difference(&removed_names) {
        // Dynamic declarations sit at the lowest priority of the chain;
        // code-declared fields always win.
        let mut chain: Vec<&FieldDecl> = Vec::new();
        for source in &sources {
            if let Some(decl) = source.dynamic.get(field_name) {
                chain.push(decl);
            }
        }
        for source in &sources {
            for fragment in &source.fragments {
                if let Some(decl) = fragment.fields.get(field_name) {
                    chain.push(decl);
                }
            }
        }

        let field = resolve_chain(name, &chain, &mut log)?;
        fields.insert(field_name.clone(), field);
    }

    let entity = registry.get_mut(name)?;
    entity.fields = fields;
    entity.delegated_from.clear();
    for diag in log.drain() {
        registry.diagnostics.emit(diag);
    }

    Ok(())
}

/// Propagate delegated fields once targets are structurally resolved.
/// Targets with unresolved bases are deferred and retried; a stalled
/// worklist is a true cycle and fatal.
fn merge_delegations(registry: &mut Registry, pending: &[String]) -> Result<(), SetupError> {
    let mut remaining: BTreeSet<String> = pending.iter().cloned().collect();

    while !remaining.is_empty() {
        let mut progressed = false;

        for name in remaining.clone() {
            let delegations = registry.get(&name)?.delegations();

            // Unknown targets are fatal; targets still in the worklist defer
            // this entity to a later round.
            let mut ready = true;
            for target in delegations.values() {
                registry.get(target)?;
                if remaining.contains(target) {
                    ready = false;
                }
            }
            if !ready {
                continue;
            }

            apply_delegations(registry, &name, &delegations)?;
            registry.get_mut(&name)?.state = SetupState::StructuralDone;
            remaining.remove(&name);
            progressed = true;
        }

        if !remaining.is_empty() && !progressed {
            return Err(SetupError::DelegationCycle(
                remaining.into_iter().collect(),
            ));
        }
    }

    Ok(())
}

fn apply_delegations(
    registry: &mut Registry,
    name: &str,
    delegations: &BTreeMap<String, String>,
) -> Result<(), SetupError> {
    for (field_name, target) in delegations {
        let relation = registry
            .get(name)?
            .field(field_name)
            .cloned()
            .ok_or_else(|| SetupError::InvalidDelegation {
                entity: name.to_string(),
                field: field_name.clone(),
                reason: "field is not declared".to_string(),
            })?;
        validate_delegation_field(name, field_name, &relation, target)?;

        // Changes to the target must re-derive this entity.
        registry
            .get_mut(target)?
            .delegation_dependents
            .insert(name.to_string());

        let target_fields: Vec<(String, Arc<Field>)> = registry
            .get(target)?
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let entity = registry.get_mut(name)?;
        for (target_field, origin) in target_fields {
            if entity.fields.contains_key(&target_field) {
                continue;
            }
            entity.fields.insert(
                target_field.clone(),
                Arc::new(Field {
                    name: target_field,
                    kind: FieldKind::Delegated,
                    required: origin.required,
                    readonly: origin.readonly,
                    copy: origin.copy,
                    // Reads through the delegation never escalate past the
                    // delegating entity's own access rules.
                    restricted: origin.restricted || relation.restricted,
                    default: origin.default.clone(),
                    depends: origin.depends.clone(),
                    related: origin.related.clone(),
                    // The origin's own relation target; the delegation
                    // target lives in delegated_via/delegated_from.
                    comodel: origin.comodel.clone(),
                    cardinality: origin.cardinality,
                    on_delete: origin.on_delete,
                    delegated_via: Some(field_name.clone()),
                    origins: origin.origins.clone(),
                    dynamic: origin.dynamic,
                }),
            );
        }
        entity
            .delegated_from
            .insert(target.clone(), field_name.clone());
    }

    Ok(())
}

fn validate_delegation_field(
    entity: &str,
    field_name: &str,
    relation: &Field,
    target: &str,
) -> Result<(), SetupError> {
    let invalid = |reason: String| SetupError::InvalidDelegation {
        entity: entity.to_string(),
        field: field_name.to_string(),
        reason,
    };

    if relation.kind != FieldKind::Relation {
        return Err(invalid(format!(
            "expected a relation field, found {}",
            relation.kind
        )));
    }
    if relation.comodel.as_deref() != Some(target) {
        return Err(invalid(format!(
            "relation targets '{}', delegation targets '{target}'",
            relation.comodel.as_deref().unwrap_or("nothing")
        )));
    }
    if !relation.required {
        return Err(invalid("delegation requires a required relation".to_string()));
    }
    if relation.cardinality != Cardinality::One {
        return Err(invalid(format!(
            "delegation requires a single-target relation, found {}",
            relation.cardinality
        )));
    }
    match relation.on_delete {
        Some(mode) if mode.supports_delegation() => Ok(()),
        Some(mode) => Err(invalid(format!(
            "deletion mode {mode} does not support delegation"
        ))),
        None => Err(invalid(
            "delegation requires a defined deletion-propagation mode".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Semantic pass
// ---------------------------------------------------------------------------

/// Wire computed/related dependencies and metadata, bases before dependents.
fn semantic(registry: &mut Registry, pending: &[String]) -> Result<(), SetupError> {
    // `bases` holds every transitive ancestor, so its length is a valid
    // topological key.
    let mut order: Vec<String> = pending.to_vec();
    order.sort_by_key(|name| {
        registry
            .get(name)
            .map_or(0, |entity| entity.bases.len())
    });

    let mut errs = ErrorTree::new();
    for name in &order {
        let mut entity_errs = ErrorTree::new();
        validate_entity_semantics(registry, name, &mut entity_errs)?;
        errs.merge_at(name, entity_errs);
    }
    errs.result().map_err(SetupError::Validation)?;

    for name in &order {
        registry.get_mut(name)?.state = SetupState::SetupDone;
    }

    Ok(())
}

fn validate_entity_semantics(
    registry: &Registry,
    name: &str,
    errs: &mut ErrorTree,
) -> Result<(), SetupError> {
    let entity = registry.get(name)?;

    for (field_name, field) in &entity.fields {
        match &field.kind {
            FieldKind::Relation => {
                match &field.comodel {
                    Some(comodel) if !registry.contains(comodel) => {
                        errs.add_at(
                            field_name,
                            format!("relation comodel '{comodel}' is not registered"),
                        );
                    }
                    None => errs.add_at(field_name, "relation field declares no comodel"),
                    _ => {}
                }
            }
            FieldKind::Computed => {
                for dep in &field.depends {
                    if let Err(reason) = validate_path(registry, entity.name.as_str(), dep) {
                        errs.add_at(field_name, format!("dependency '{dep}': {reason}"));
                    }
                }
            }
            FieldKind::Related => match &field.related {
                Some(path) => {
                    if !path.contains('.') {
                        errs.add_at(
                            field_name,
                            format!("related path '{path}' must traverse a relation"),
                        );
                    } else if let Err(reason) =
                        validate_path(registry, entity.name.as_str(), path)
                    {
                        errs.add_at(field_name, format!("related path '{path}': {reason}"));
                    }
                }
                None => errs.add_at(field_name, "related field declares no path"),
            },
            FieldKind::Delegated | FieldKind::Stored(_) => {}
        }
    }

    for (what, target) in [("rec_name", &entity.rec_name), ("active_name", &entity.active_name)] {
        if let Some(target) = target
            && !entity.has_field(target)
        {
            errs.add(format!("{what} '{target}' is not a field of '{name}'"));
        }
    }

    Ok(())
}

/// Validate a dependency path, hopping relations for dotted segments.
fn validate_path(registry: &Registry, entity: &str, path: &str) -> Result<(), String> {
    let mut current = entity.to_string();
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let holder = registry
            .get(&current)
            .map_err(|_| format!("entity '{current}' is not registered"))?;
        let Some(field) = holder.field(segment) else {
            return Err(format!("'{segment}' is not a field of '{current}'"));
        };

        if segments.peek().is_none() {
            return Ok(());
        }
        match (&field.kind, &field.comodel) {
            (FieldKind::Relation | FieldKind::Delegated, Some(comodel)) => {
                current = comodel.clone();
            }
            _ => {
                return Err(format!(
                    "'{segment}' on '{current}' is not a relation, cannot traverse further"
                ));
            }
        }
    }

    Ok(())
}
