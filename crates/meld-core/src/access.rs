//! Field-access boundary for business-rule modules.
//!
//! Reads and writes dispatch through resolved field metadata: stored values
//! come from the record (or the field default), delegated fields hop through
//! the linked record, computed fields go to a caller-supplied provider.

use crate::{
    field::FieldKind,
    registry::{Registry, RegistryError},
    types::AttrValue,
};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

///
/// AccessError
///

#[derive(Debug, ThisError)]
pub enum AccessError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    #[error("field '{field}' on entity '{entity}' is access-restricted")]
    Restricted { entity: String, field: String },

    #[error("field '{field}' on entity '{entity}' is not writable")]
    NotWritable { entity: String, field: String },

    #[error("no linked record through '{via}' on entity '{entity}'")]
    MissingLink { entity: String, via: String },

    #[error("computing '{field}' on entity '{entity}' failed: {message}")]
    ComputeFailed {
        entity: String,
        field: String,
        message: String,
    },
}

///
/// Record
/// In-memory value bag for one entity instance, with links to the instances
/// its relation fields point at.
///

#[derive(Clone, Debug, Default)]
pub struct Record {
    pub entity: String,
    values: BTreeMap<String, AttrValue>,
    links: BTreeMap<String, Record>,
}

impl Record {
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_link(mut self, field: impl Into<String>, linked: Self) -> Self {
        self.links.insert(field.into(), linked);
        self
    }

    #[must_use]
    pub fn value(&self, field: &str) -> Option<&AttrValue> {
        self.values.get(field)
    }

    #[must_use]
    pub fn link(&self, field: &str) -> Option<&Self> {
        self.links.get(field)
    }

    pub fn link_mut(&mut self, field: &str) -> Option<&mut Self> {
        self.links.get_mut(field)
    }
}

///
/// AccessContext
///

#[derive(Clone, Copy, Debug, Default)]
pub struct AccessContext {
    pub allow_restricted: bool,
}

impl AccessContext {
    #[must_use]
    pub const fn privileged() -> Self {
        Self {
            allow_restricted: true,
        }
    }
}

///
/// ComputeProvider
/// Caller-supplied evaluation of computed fields; this engine only wires
/// the metadata.
///

pub trait ComputeProvider {
    fn compute(&self, entity: &str, field: &str, record: &Record) -> Result<AttrValue, String>;
}

///
/// NoCompute
///

pub struct NoCompute;

impl ComputeProvider for NoCompute {
    fn compute(&self, _: &str, _: &str, _: &Record) -> Result<AttrValue, String> {
        Err("no compute provider installed".to_string())
    }
}

///
/// Accessor
///

pub struct Accessor<'a> {
    registry: &'a Registry,
}

impl<'a> Accessor<'a> {
    #[must_use]
    pub const fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Read one field of a record through its resolved metadata.
    /// `Ok(None)` means the value is genuinely absent (no stored value, no
    /// default, or a missing link), which callers may treat as null.
    pub fn read(
        &self,
        record: &Record,
        field_name: &str,
        ctx: &AccessContext,
        compute: &dyn ComputeProvider,
    ) -> Result<Option<AttrValue>, AccessError> {
        let entity = self.registry.composite_type(&record.entity)?;
        let field = entity
            .field(field_name)
            .ok_or_else(|| AccessError::UnknownField {
                entity: record.entity.clone(),
                field: field_name.to_string(),
            })?;
        if field.restricted && !ctx.allow_restricted {
            return Err(AccessError::Restricted {
                entity: record.entity.clone(),
                field: field_name.to_string(),
            });
        }

        match &field.kind {
            FieldKind::Stored(_) | FieldKind::Relation => Ok(record
                .value(field_name)
                .cloned()
                .or_else(|| field.default.clone())),
            FieldKind::Computed => compute
                .compute(&record.entity, field_name, record)
                .map(Some)
                .map_err(|message| AccessError::ComputeFailed {
                    entity: record.entity.clone(),
                    field: field_name.to_string(),
                    message,
                }),
            FieldKind::Related => {
                let path = field.related.clone().unwrap_or_default();
                self.read_path(record, &path, ctx, compute)
            }
            FieldKind::Delegated => {
                let via = field.delegated_via.clone().unwrap_or_default();
                match record.link(&via) {
                    Some(linked) => self.read(linked, field_name, ctx, compute),
                    None => Ok(None),
                }
            }
        }
    }

    fn read_path(
        &self,
        record: &Record,
        path: &str,
        ctx: &AccessContext,
        compute: &dyn ComputeProvider,
    ) -> Result<Option<AttrValue>, AccessError> {
        let mut current = record;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                return self.read(current, segment, ctx, compute);
            }
            match current.link(segment) {
                Some(linked) => current = linked,
                None => return Ok(None),
            }
        }

        Ok(None)
    }

    /// Write one field of a record through its resolved metadata. Delegated
    /// fields pass the write through to the linked record.
    pub fn write(
        &self,
        record: &mut Record,
        field_name: &str,
        value: AttrValue,
        ctx: &AccessContext,
    ) -> Result<(), AccessError> {
        let entity = self.registry.composite_type(&record.entity)?;
        let field = entity
            .field(field_name)
            .ok_or_else(|| AccessError::UnknownField {
                entity: record.entity.clone(),
                field: field_name.to_string(),
            })?
            .clone();
        if field.restricted && !ctx.allow_restricted {
            return Err(AccessError::Restricted {
                entity: record.entity.clone(),
                field: field_name.to_string(),
            });
        }
        if field.readonly {
            return Err(AccessError::NotWritable {
                entity: record.entity.clone(),
                field: field_name.to_string(),
            });
        }

        match &field.kind {
            FieldKind::Stored(_) | FieldKind::Relation => {
                record.values.insert(field_name.to_string(), value);
                Ok(())
            }
            FieldKind::Delegated => {
                let via = field.delegated_via.clone().unwrap_or_default();
                let entity_name = record.entity.clone();
                let linked =
                    record
                        .link_mut(&via)
                        .ok_or_else(|| AccessError::MissingLink {
                            entity: entity_name,
                            via: via.clone(),
                        })?;
                self.write(linked, field_name, value, ctx)
            }
            FieldKind::Computed | FieldKind::Related => Err(AccessError::NotWritable {
                entity: record.entity.clone(),
                field: field_name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        field::FieldDecl,
        fragment::Fragment,
        types::{OnDelete, StorageKind},
    };

    fn order_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                Fragment::new("stock", "tracking")
                    .field(FieldDecl::stored("carrier_name", StorageKind::Text))
                    .field(FieldDecl::stored("secret_code", StorageKind::Text).restricted(true)),
            )
            .expect("registration");
        registry
            .register(
                Fragment::new("sale", "order")
                    .field(FieldDecl::stored("reference", StorageKind::Text))
                    .field(FieldDecl::stored("qty", StorageKind::Int).default_value(1_i64))
                    .field(
                        FieldDecl::relation("tracking_id", "tracking")
                            .required(true)
                            .on_delete(OnDelete::Cascade),
                    )
                    .delegate("tracking_id", "tracking"),
            )
            .expect("registration");
        registry.setup().expect("setup");
        registry
    }

    #[test]
    fn stored_reads_fall_back_to_defaults() {
        let registry = order_registry();
        let accessor = Accessor::new(&registry);
        let record = Record::new("order").with_value("reference", "SO-1");

        let ctx = AccessContext::default();
        let reference = accessor
            .read(&record, "reference", &ctx, &NoCompute)
            .expect("stored read");
        assert_eq!(reference.as_ref().and_then(|v| v.as_text()), Some("SO-1"));

        let qty = accessor.read(&record, "qty", &ctx, &NoCompute).expect("default read");
        assert_eq!(qty.as_ref().and_then(AttrValue::as_int), Some(1));
    }

    #[test]
    fn delegated_reads_hop_through_the_link() {
        let registry = order_registry();
        let accessor = Accessor::new(&registry);
        let record = Record::new("order").with_link(
            "tracking_id",
            Record::new("tracking").with_value("carrier_name", "acme freight"),
        );

        let carrier = accessor
            .read(&record, "carrier_name", &AccessContext::default(), &NoCompute)
            .expect("delegated read");
        assert_eq!(
            carrier.as_ref().and_then(|v| v.as_text()),
            Some("acme freight")
        );
    }

    #[test]
    fn delegated_writes_pass_through_to_the_linked_record() {
        let registry = order_registry();
        let accessor = Accessor::new(&registry);
        let mut record =
            Record::new("order").with_link("tracking_id", Record::new("tracking"));

        accessor
            .write(
                &mut record,
                "carrier_name",
                AttrValue::from("acme freight"),
                &AccessContext::default(),
            )
            .expect("delegated write");

        let linked = record.link("tracking_id").expect("link present");
        assert_eq!(
            linked.value("carrier_name").and_then(|v| v.as_text()),
            Some("acme freight")
        );
    }

    #[test]
    fn restricted_fields_require_privilege() {
        let registry = order_registry();
        let accessor = Accessor::new(&registry);
        let record = Record::new("order").with_link(
            "tracking_id",
            Record::new("tracking").with_value("secret_code", "k9"),
        );

        let err = accessor
            .read(&record, "secret_code", &AccessContext::default(), &NoCompute)
            .expect_err("delegated reads must not escalate privilege");
        assert!(matches!(err, AccessError::Restricted { .. }));

        let value = accessor
            .read(&record, "secret_code", &AccessContext::privileged(), &NoCompute)
            .expect("privileged read");
        assert_eq!(value.as_ref().and_then(|v| v.as_text()), Some("k9"));
    }

    #[test]
    fn unknown_fields_propagate_to_the_caller() {
        let registry = order_registry();
        let accessor = Accessor::new(&registry);
        let record = Record::new("order");

        let err = accessor
            .read(&record, "nonesuch", &AccessContext::default(), &NoCompute)
            .expect_err("unknown field is the caller's policy decision");
        assert!(matches!(err, AccessError::UnknownField { .. }));
    }

    #[test]
    fn computed_reads_use_the_provider_and_reject_writes() {
        struct Doubler;
        impl ComputeProvider for Doubler {
            fn compute(&self, _: &str, _: &str, record: &Record) -> Result<AttrValue, String> {
                let qty = record.value("qty").and_then(AttrValue::as_int).unwrap_or(0);
                Ok(AttrValue::Int(qty * 2))
            }
        }

        let mut registry = Registry::new();
        registry
            .register(
                Fragment::new("sale", "line")
                    .field(FieldDecl::stored("qty", StorageKind::Int))
                    .field(FieldDecl::computed("total", &["qty"])),
            )
            .expect("registration");
        registry.setup().expect("setup");

        let accessor = Accessor::new(&registry);
        let mut record = Record::new("line").with_value("qty", 3_i64);
        let ctx = AccessContext::default();

        let total = accessor
            .read(&record, "total", &ctx, &Doubler)
            .expect("computed read");
        assert_eq!(total.as_ref().and_then(AttrValue::as_int), Some(6));

        let err = accessor
            .write(&mut record, "total", AttrValue::Int(9), &ctx)
            .expect_err("computed fields are not writable");
        assert!(matches!(err, AccessError::NotWritable { .. }));
    }

    #[test]
    fn reads_before_setup_are_rejected() {
        let mut registry = Registry::new();
        registry
            .register(Fragment::new("sale", "order"))
            .expect("registration");

        let accessor = Accessor::new(&registry);
        let err = accessor
            .read(
                &Record::new("order"),
                "id",
                &AccessContext::default(),
                &NoCompute,
            )
            .expect_err("composite types are unusable before setup");
        assert!(matches!(
            err,
            AccessError::Registry(RegistryError::NotReady(_))
        ));
    }
}
