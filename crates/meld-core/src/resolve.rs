use crate::{
    diag::{Diagnostic, DiagnosticSink},
    field::{Field, FieldDecl, FieldKind, Provenance},
    types::Cardinality,
};
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// ResolveError
///

#[derive(Debug, ThisError)]
pub enum ResolveError {
    #[error("field '{field}' on entity '{entity}' never declares a kind")]
    MissingKind { entity: String, field: String },

    #[error("field '{field}' on entity '{entity}' resolved from an empty chain")]
    EmptyChain { entity: String, field: String },
}

/// Resolve one override chain (lowest precedence first) into the single
/// authoritative field.
///
/// A chain of exactly one direct declaration takes the sharing fast path:
/// the resolved field is cached on the declaration and reused as-is across
/// independently built registries. Any other chain synthesizes a
/// registry-local field by attribute-level merge: for each attribute the
/// latest declaration that explicitly sets it wins, and attributes no
/// override ever set keep the earliest declared value.
pub(crate) fn resolve_chain(
    entity: &str,
    chain: &[&FieldDecl],
    sink: &mut dyn DiagnosticSink,
) -> Result<Arc<Field>, ResolveError> {
    let [decl] = chain else {
        return merge_chain(entity, chain, sink).map(Arc::new);
    };

    if decl.is_direct() {
        let mut scratch = crate::diag::DiagnosticLog::new();
        let field = merge_chain(entity, chain, &mut scratch)?;
        return Ok(decl.resolved.get_or_init(|| Arc::new(field)).clone());
    }

    merge_chain(entity, chain, sink).map(Arc::new)
}

fn merge_chain(
    entity: &str,
    chain: &[&FieldDecl],
    sink: &mut dyn DiagnosticSink,
) -> Result<Field, ResolveError> {
    let Some(first) = chain.first() else {
        return Err(ResolveError::EmptyChain {
            entity: entity.to_string(),
            field: String::new(),
        });
    };
    let name = first.name.clone();

    // Declarations that set a kind, chain order; needed for conflict checks.
    let mut kind_setters: Vec<(&FieldDecl, &FieldKind)> = Vec::new();

    let mut kind: Option<FieldKind> = None;
    let mut required: Option<bool> = None;
    let mut readonly: Option<bool> = None;
    let mut copy: Option<bool> = None;
    let mut restricted: Option<bool> = None;
    let mut default = None;
    let mut depends: Option<Vec<String>> = None;
    let mut related: Option<String> = None;
    let mut comodel: Option<String> = None;
    let mut cardinality: Option<Cardinality> = None;
    let mut on_delete = None;
    let mut origins = Vec::with_capacity(chain.len());
    let mut acknowledged = false;

    for decl in chain {
        if let Some(declared) = &decl.kind {
            kind_setters.push((decl, declared));
            kind = Some(declared.clone());
            // An acknowledgment only covers declarations before it.
            acknowledged = decl.supersedes;
        }
        if let Some(v) = decl.required {
            required = Some(v);
        }
        if let Some(v) = decl.readonly {
            readonly = Some(v);
        }
        if let Some(v) = decl.copy {
            copy = Some(v);
        }
        if let Some(v) = decl.restricted {
            restricted = Some(v);
        }
        if let Some(v) = &decl.default {
            default = Some(v.clone());
        }
        if let Some(v) = &decl.depends {
            depends = Some(v.clone());
        }
        if let Some(v) = &decl.related {
            related = Some(v.clone());
        }
        if let Some(v) = &decl.comodel {
            comodel = Some(v.clone());
        }
        if let Some(v) = decl.cardinality {
            cardinality = Some(v);
        }
        if let Some(v) = decl.on_delete {
            on_delete = Some(v);
        }
        origins.push(decl.origin.clone().unwrap_or_else(|| {
            Provenance::new(if decl.dynamic { "dynamic" } else { "unknown" }, entity)
        }));
    }

    let Some(kind) = kind else {
        return Err(ResolveError::MissingKind {
            entity: entity.to_string(),
            field: name,
        });
    };

    let conflicting = kind_setters
        .iter()
        .any(|(_, declared)| !declared.agrees_with(&kind));
    if conflicting && !acknowledged {
        sink.emit(Diagnostic::KindConflict {
            entity: entity.to_string(),
            field: name.clone(),
            origins: kind_setters
                .iter()
                .map(|(decl, _)| {
                    decl.origin
                        .as_ref()
                        .map_or_else(|| "dynamic".to_string(), ToString::to_string)
                })
                .collect(),
            kinds: kind_setters
                .iter()
                .map(|(_, declared)| (*declared).clone())
                .collect(),
        });
    }

    let dynamic = chain.iter().all(|decl| decl.dynamic);

    Ok(Field {
        name,
        required: required.unwrap_or(false),
        readonly: readonly.unwrap_or_else(|| Field::implied_readonly(&kind)),
        copy: copy.unwrap_or_else(|| Field::implied_copy(&kind)),
        restricted: restricted.unwrap_or(false),
        default,
        depends: depends.unwrap_or_default(),
        related,
        comodel,
        cardinality: cardinality.unwrap_or_default(),
        on_delete,
        delegated_via: None,
        origins,
        dynamic,
        kind,
    })
}
