//! Dynamic field loader.
//!
//! Merges field declarations sourced from persisted metadata into an
//! already set-up registry. Validation happens against the backing store
//! before anything is applied, so a failed shape query leaves the registry
//! untouched; an invalid record drops exactly that field and nothing else.

use crate::{
    DYNAMIC_FIELD_PREFIX,
    composite::SetupState,
    diag::{Diagnostic, DiagnosticSink, DynamicSkipReason},
    field::{FieldDecl, FieldKind, Provenance},
    pipeline::{self, SetupError},
    registry::Registry,
    types::{AttrValue, StorageKind},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, str::FromStr};
use thiserror::Error as ThisError;

///
/// DynamicError
///

#[derive(Debug, ThisError)]
pub enum DynamicError {
    #[error("registry has pending entities; dynamic fields merge only into a set-up registry")]
    RegistryNotReady,

    #[error("backing shape query failed for '{entity}.{field}': {message}")]
    ShapeQuery {
        entity: String,
        field: String,
        message: String,
    },

    #[error(transparent)]
    Setup(#[from] SetupError),
}

///
/// FieldState
/// Lifecycle of a persisted field record.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum FieldState {
    /// Mirrors a code declaration; code always wins on conflicts.
    #[default]
    Base,
    /// Authored through the metadata store; must carry the dynamic prefix.
    Manual,
}

///
/// StoredFieldRecord
/// One persisted field declaration, as enumerated by the metadata store.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StoredFieldRecord {
    pub entity: String,
    pub field: String,
    /// Storage shape name (`Text`, `Int`, ...) or `relation`.
    pub kind: String,
    pub comodel: Option<String>,
    pub state: FieldState,
    pub required: Option<bool>,
    pub readonly: Option<bool>,
    pub copy: Option<bool>,
    pub default: Option<AttrValue>,
}

///
/// ShapeInfo
/// Backing-column shape reported by the persistence layer.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ShapeInfo {
    pub kind: StorageKind,
    pub nullable: bool,
}

///
/// ShapeProvider
///
/// Synchronous lookup into the persistence layer, used only here. Failures
/// are retryable reads; this loader never leaves partial state behind one.
///

pub trait ShapeProvider {
    fn backing_shape(&self, entity: &str, field: &str) -> Result<Option<ShapeInfo>, String>;
}

///
/// DynamicMergeReport
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct DynamicMergeReport {
    /// `(entity, field)` pairs merged into the registry.
    pub applied: Vec<(String, String)>,
    pub skipped: usize,
}

/// Merge persisted field records into a fully set-up registry, then re-run
/// the pipeline for the affected entities and their descendants.
pub fn merge_dynamic_fields(
    registry: &mut Registry,
    provider: &impl ShapeProvider,
    records: &[StoredFieldRecord],
) -> Result<DynamicMergeReport, DynamicError> {
    if registry
        .iter()
        .any(|(_, entity)| entity.state != SetupState::SetupDone)
    {
        return Err(DynamicError::RegistryNotReady);
    }

    // Phase 1: validate every record read-only. Shape-query failures abort
    // with no side effects; invalid records are skipped with a diagnostic.
    let mut accepted: Vec<(String, String, FieldDecl)> = Vec::new();
    let mut skipped = Vec::new();
    for record in records {
        match validate_record(registry, provider, record)? {
            Ok(decl) => accepted.push((record.entity.clone(), record.field.clone(), decl)),
            Err(reason) => skipped.push(Diagnostic::DynamicFieldSkipped {
                entity: record.entity.clone(),
                field: record.field.clone(),
                reason,
            }),
        }
    }

    // Phase 2: apply and re-derive.
    let mut report = DynamicMergeReport {
        skipped: skipped.len(),
        ..DynamicMergeReport::default()
    };
    for diag in skipped {
        registry.diagnostics.emit(diag);
    }

    let mut affected = BTreeSet::new();
    for (entity, field, decl) in accepted {
        if let Ok(target) = registry.get_mut(&entity) {
            target.dynamic_decls.insert(field.clone(), decl);
            affected.insert(entity.clone());
            report.applied.push((entity, field));
        }
    }
    for entity in &affected {
        registry.mark_pending(entity);
    }
    pipeline::run(registry)?;

    Ok(report)
}

/// Outer error: the shape query itself failed (retryable). Inner error: the
/// record is invalid and must be skipped.
fn validate_record(
    registry: &Registry,
    provider: &impl ShapeProvider,
    record: &StoredFieldRecord,
) -> Result<Result<FieldDecl, DynamicSkipReason>, DynamicError> {
    if !registry.contains(&record.entity) {
        return Ok(Err(DynamicSkipReason::EntityMissing {
            entity: record.entity.clone(),
        }));
    }
    if record.state == FieldState::Manual && !record.field.starts_with(DYNAMIC_FIELD_PREFIX) {
        return Ok(Err(DynamicSkipReason::BadName {
            prefix: DYNAMIC_FIELD_PREFIX,
        }));
    }

    let kind = if record.kind.eq_ignore_ascii_case("relation") {
        let Some(comodel) = &record.comodel else {
            return Ok(Err(DynamicSkipReason::UnknownKind {
                kind: "relation without comodel".to_string(),
            }));
        };
        if !registry.contains(comodel) {
            return Ok(Err(DynamicSkipReason::ComodelMissing {
                comodel: comodel.clone(),
            }));
        }
        FieldKind::Relation
    } else {
        match StorageKind::from_str(&record.kind) {
            Ok(shape) => FieldKind::Stored(shape),
            Err(_) => {
                return Ok(Err(DynamicSkipReason::UnknownKind {
                    kind: record.kind.clone(),
                }));
            }
        }
    };

    // The backing column must still exist with a compatible shape.
    let shape = provider
        .backing_shape(&record.entity, &record.field)
        .map_err(|message| DynamicError::ShapeQuery {
            entity: record.entity.clone(),
            field: record.field.clone(),
            message,
        })?;
    let Some(shape) = shape else {
        return Ok(Err(DynamicSkipReason::BackingMissing));
    };
    let declared_shape = match &kind {
        FieldKind::Stored(declared) => *declared,
        // Relation columns are integer foreign keys.
        _ => StorageKind::Int,
    };
    if !shape.kind.is_compatible_with(declared_shape) {
        return Ok(Err(DynamicSkipReason::ShapeMismatch {
            declared: declared_shape.to_string(),
            found: shape.kind.to_string(),
        }));
    }

    let mut decl = FieldDecl::new(&record.field);
    decl.origin = Some(Provenance::new("dynamic", &record.entity));
    decl.kind = Some(kind);
    decl.comodel = record.comodel.clone();
    decl.required = record.required;
    decl.readonly = record.readonly;
    decl.copy = record.copy;
    decl.default = record.default.clone();
    decl.dynamic = true;

    Ok(Ok(decl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fragment::Fragment, registry::Registry, types::StorageKind};
    use std::collections::BTreeMap;

    /// Shape provider backed by a fixed column table.
    struct FixedShapes(BTreeMap<(String, String), ShapeInfo>);

    impl FixedShapes {
        fn new(columns: &[(&str, &str, StorageKind)]) -> Self {
            Self(
                columns
                    .iter()
                    .map(|(entity, field, kind)| {
                        (
                            ((*entity).to_string(), (*field).to_string()),
                            ShapeInfo {
                                kind: *kind,
                                nullable: true,
                            },
                        )
                    })
                    .collect(),
            )
        }
    }

    impl ShapeProvider for FixedShapes {
        fn backing_shape(&self, entity: &str, field: &str) -> Result<Option<ShapeInfo>, String> {
            Ok(self
                .0
                .get(&(entity.to_string(), field.to_string()))
                .copied())
        }
    }

    struct FailingShapes;

    impl ShapeProvider for FailingShapes {
        fn backing_shape(&self, _: &str, _: &str) -> Result<Option<ShapeInfo>, String> {
            Err("storage offline".to_string())
        }
    }

    fn record(entity: &str, field: &str, kind: &str) -> StoredFieldRecord {
        StoredFieldRecord {
            entity: entity.to_string(),
            field: field.to_string(),
            kind: kind.to_string(),
            comodel: None,
            state: FieldState::Manual,
            required: None,
            readonly: None,
            copy: None,
            default: None,
        }
    }

    fn partner_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                Fragment::new("contacts", "partner")
                    .field(crate::field::FieldDecl::stored("name", StorageKind::Text)),
            )
            .expect("registration");
        registry.setup().expect("setup");
        registry
    }

    #[test]
    fn valid_record_merges_as_a_stored_field() {
        let mut registry = partner_registry();
        let provider = FixedShapes::new(&[("partner", "x_note", StorageKind::Text)]);

        let report = merge_dynamic_fields(&mut registry, &provider, &[record(
            "partner", "x_note", "Text",
        )])
        .expect("merge should succeed");

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.skipped, 0);

        let partner = registry.composite_type("partner").expect("set up");
        let note = partner.field("x_note").expect("dynamic field present");
        assert!(note.dynamic);
        assert_eq!(note.kind, FieldKind::Stored(StorageKind::Text));
    }

    #[test]
    fn bad_shape_skips_only_that_field() {
        let mut registry = partner_registry();
        let provider = FixedShapes::new(&[
            ("partner", "x_note", StorageKind::Int),
            ("partner", "x_ref", StorageKind::Text),
        ]);

        let report = merge_dynamic_fields(&mut registry, &provider, &[
            record("partner", "x_note", "Text"),
            record("partner", "x_ref", "Text"),
        ])
        .expect("merge continues past one bad record");

        assert_eq!(report.applied, vec![(
            "partner".to_string(),
            "x_ref".to_string()
        )]);
        assert_eq!(report.skipped, 1);

        let partner = registry.composite_type("partner").expect("set up");
        assert!(!partner.has_field("x_note"), "invalid field must be absent");
        assert!(partner.has_field("x_ref"));
        assert!(partner.has_field("name"), "code fields remain intact");

        assert!(registry.diagnostics().iter().any(|diag| matches!(
            diag,
            Diagnostic::DynamicFieldSkipped {
                field,
                reason: DynamicSkipReason::ShapeMismatch { .. },
                ..
            } if field == "x_note"
        )));
    }

    #[test]
    fn code_declared_fields_win_over_dynamic_ones() {
        let mut registry = partner_registry();
        let provider = FixedShapes::new(&[("partner", "name", StorageKind::Text)]);

        let mut rec = record("partner", "name", "Text");
        rec.state = FieldState::Base;
        rec.required = Some(true);
        rec.readonly = Some(true);
        merge_dynamic_fields(&mut registry, &provider, &[rec]).expect("merge");

        let partner = registry.composite_type("partner").expect("set up");
        let name = partner.field("name").expect("field present");
        assert!(!name.dynamic, "code declaration keeps authority");
        assert!(
            name.required && name.readonly,
            "attributes code never set fall back to the dynamic entry"
        );
        assert_eq!(
            name.kind,
            FieldKind::Stored(StorageKind::Text),
            "the code-declared kind always wins"
        );
    }

    #[test]
    fn manual_records_require_the_dynamic_prefix() {
        let mut registry = partner_registry();
        let provider = FixedShapes::new(&[("partner", "note", StorageKind::Text)]);

        let report =
            merge_dynamic_fields(&mut registry, &provider, &[record("partner", "note", "Text")])
                .expect("merge");
        assert_eq!(report.skipped, 1);
        assert!(!registry.composite_type("partner").expect("set up").has_field("note"));
    }

    #[test]
    fn shape_query_failure_aborts_with_no_partial_state() {
        let mut registry = partner_registry();
        let err = merge_dynamic_fields(&mut registry, &FailingShapes, &[record(
            "partner", "x_note", "Text",
        )])
        .expect_err("query failure must surface");

        assert!(err.to_string().contains("storage offline"));
        let partner = registry.composite_type("partner").expect("still set up");
        assert!(!partner.has_field("x_note"));
    }

    #[test]
    fn merge_requires_a_set_up_registry() {
        let mut registry = Registry::new();
        registry
            .register(Fragment::new("contacts", "partner"))
            .expect("registration");

        let provider = FixedShapes::new(&[]);
        let err = merge_dynamic_fields(&mut registry, &provider, &[])
            .expect_err("pending registry must be rejected");
        assert!(matches!(err, DynamicError::RegistryNotReady));
    }
}
