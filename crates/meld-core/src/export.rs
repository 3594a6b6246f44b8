//! Storage-schema view.
//!
//! Read-only projection of a set-up registry for the persistence layer:
//! every persisted field becomes a column spec. No DDL is issued here.

use crate::{
    field::FieldKind,
    registry::{Registry, RegistryError},
    types::StorageKind,
};
use serde::Serialize;

///
/// ColumnSpec
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub entity: String,
    pub field: String,
    pub kind: StorageKind,
    pub nullable: bool,
    /// Foreign-key target for relation columns.
    pub references: Option<String>,
    pub dynamic: bool,
}

/// Columns for one entity, deterministic order. Abstract entities own no
/// table and yield nothing.
pub fn entity_columns(registry: &Registry, name: &str) -> Result<Vec<ColumnSpec>, RegistryError> {
    let entity = registry.composite_type(name)?;
    if entity.abstract_entity {
        return Ok(Vec::new());
    }

    let mut columns = Vec::new();
    for (field_name, field) in &entity.fields {
        let (kind, references) = match &field.kind {
            FieldKind::Stored(shape) => (*shape, None),
            // Relation columns are integer foreign keys.
            FieldKind::Relation => (StorageKind::Int, field.comodel.clone()),
            FieldKind::Computed | FieldKind::Delegated | FieldKind::Related => continue,
        };
        columns.push(ColumnSpec {
            entity: name.to_string(),
            field: field_name.clone(),
            kind,
            nullable: !field.required,
            references,
            dynamic: field.dynamic,
        });
    }

    Ok(columns)
}

/// Columns for every concrete entity in the registry.
pub fn storage_columns(registry: &Registry) -> Result<Vec<ColumnSpec>, RegistryError> {
    let mut columns = Vec::new();
    for name in registry.names() {
        columns.extend(entity_columns(registry, &name)?);
    }

    Ok(columns)
}

///
/// ExportError
///

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON manifest of the full storage view, for schema tooling and migration
/// diffing.
pub fn storage_manifest(registry: &Registry) -> Result<String, ExportError> {
    let columns = storage_columns(registry)?;

    Ok(serde_json::to_string_pretty(&columns)?)
}
