use derive_more::{Display, FromStr};
use serde::{Deserialize, Serialize};

///
/// StorageKind
/// Persisted column shape for stored fields and backing-column checks.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, FromStr, PartialEq, Serialize)]
#[remain::sorted]
pub enum StorageKind {
    Binary,
    Bool,
    Date,
    Decimal,
    Float,
    Int,
    Text,
    Timestamp,
}

impl StorageKind {
    /// Whether a backing column of this shape can hold a field of `declared`.
    #[must_use]
    pub const fn is_compatible_with(self, declared: Self) -> bool {
        matches!(
            (self, declared),
            (Self::Binary, Self::Binary)
                | (Self::Bool, Self::Bool)
                | (Self::Date, Self::Date | Self::Timestamp)
                | (Self::Decimal, Self::Decimal | Self::Int)
                | (Self::Float, Self::Float | Self::Int)
                | (Self::Int, Self::Int)
                | (Self::Text, Self::Text)
                | (Self::Timestamp, Self::Timestamp)
        )
    }
}

///
/// Cardinality
///

#[derive(
    Clone, Copy, Default, Debug, Deserialize, Display, Eq, FromStr, PartialEq, Serialize,
)]
pub enum Cardinality {
    #[default]
    One,
    Opt,
    Many,
}

impl Cardinality {
    /// Single-target relations are the only ones delegation may ride on.
    #[must_use]
    pub const fn is_single(self) -> bool {
        matches!(self, Self::One | Self::Opt)
    }
}

///
/// OnDelete
/// Deletion-propagation mode for relation fields.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, FromStr, PartialEq, Serialize)]
#[remain::sorted]
pub enum OnDelete {
    Cascade,
    Restrict,
    SetNull,
}

impl OnDelete {
    /// Delegation requires a mode that keeps the linked row's lifetime defined.
    #[must_use]
    pub const fn supports_delegation(self) -> bool {
        matches!(self, Self::Cascade | Self::Restrict)
    }
}

///
/// AttrValue
/// Small literal carried by field defaults and record values.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn storage_kind_round_trips_through_display() {
        for kind in [StorageKind::Bool, StorageKind::Decimal, StorageKind::Text] {
            let parsed = StorageKind::from_str(&kind.to_string())
                .expect("displayed kind should parse back");
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn widened_numeric_columns_accept_int_fields() {
        assert!(StorageKind::Decimal.is_compatible_with(StorageKind::Int));
        assert!(StorageKind::Float.is_compatible_with(StorageKind::Int));
        assert!(!StorageKind::Int.is_compatible_with(StorageKind::Float));
        assert!(!StorageKind::Text.is_compatible_with(StorageKind::Int));
    }

    #[test]
    fn delegation_rejects_set_null() {
        assert!(OnDelete::Cascade.supports_delegation());
        assert!(OnDelete::Restrict.supports_delegation());
        assert!(!OnDelete::SetNull.supports_delegation());
    }
}
