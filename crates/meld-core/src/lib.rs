pub mod access;
pub mod composite;
pub mod diag;
pub mod dynamic;
pub mod error;
pub mod export;
pub mod field;
pub mod fragment;
pub mod pipeline;
pub mod registry;
pub mod resolve;
pub mod types;

/// Maximum length for entity identifiers.
pub const MAX_ENTITY_NAME_LEN: usize = 64;

/// Maximum length for field identifiers.
pub const MAX_FIELD_NAME_LEN: usize = 64;

/// Name prefix required of manually authored dynamic fields.
pub const DYNAMIC_FIELD_PREFIX: &str = "x_";

use crate::{
    access::AccessError, dynamic::DynamicError, export::ExportError, pipeline::SetupError,
    registry::RegistryError, resolve::ResolveError,
};
use thiserror::Error as ThisError;

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        access::{AccessContext, Accessor, ComputeProvider, NoCompute, Record},
        composite::{EntityType, SetupState},
        diag::{Diagnostic, DiagnosticSink, DynamicSkipReason},
        dynamic::{ShapeInfo, ShapeProvider, StoredFieldRecord, merge_dynamic_fields},
        err,
        error::ErrorTree,
        export::{ColumnSpec, entity_columns, storage_columns, storage_manifest},
        field::{Field, FieldDecl, FieldKind, Provenance},
        fragment::Fragment,
        registry::{ROOT_ENTITY, Registry},
        types::{AttrValue, Cardinality, OnDelete, StorageKind},
    };
}

///
/// Error
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    AccessError(#[from] AccessError),

    #[error(transparent)]
    DynamicError(#[from] DynamicError),

    #[error(transparent)]
    ExportError(#[from] ExportError),

    #[error(transparent)]
    RegistryError(#[from] RegistryError),

    #[error(transparent)]
    ResolveError(#[from] ResolveError),

    #[error(transparent)]
    SetupError(#[from] SetupError),
}
